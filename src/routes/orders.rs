use std::collections::HashMap;

use anyhow::{Context, anyhow};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, RunQueryDsl};
use rand::Rng;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    cache,
    middleware::{self, AuthUser, Role},
    models::{
        CreateOrderEntity, CreateOrderItemEntity, OrderEntity, OrderItemEntity, OrderStatus,
        PRODUCT_STATUS_AVAILABLE,
    },
    routes::{merchant_catalog_patterns, merchant_id_for_user},
    schema::{cart_items, items_master, merchant_products, merchants, order_items, orders},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/orders",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(create_order))
            .merge(
                OpenApiRouter::new()
                    .routes(utoipa_axum::routes!(get_orders))
                    .route_layer(axum::middleware::from_fn(middleware::admin_authorization)),
            )
            .merge(
                OpenApiRouter::new()
                    .routes(utoipa_axum::routes!(get_merchant_orders))
                    .route_layer(axum::middleware::from_fn(middleware::merchant_authorization)),
            )
            .merge(
                OpenApiRouter::new()
                    .routes(utoipa_axum::routes!(get_my_orders))
                    .routes(utoipa_axum::routes!(get_order))
                    .route_layer(axum::middleware::from_fn(middleware::user_authorization)),
            )
            .merge(
                OpenApiRouter::new()
                    .routes(utoipa_axum::routes!(update_order_status))
                    .route_layer(axum::middleware::from_fn(middleware::staff_authorization)),
            ),
    )
}

/// Time-based order number with a random suffix, so that checkouts landing
/// on the same millisecond still get distinct numbers.
fn generate_order_number() -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().gen_range(0..1000);
    format!("ORD{millis}{suffix:03}")
}

#[derive(Deserialize, ToSchema)]
pub struct CheckoutItem {
    pub merchant_product_id: i32,
    pub quantity: i32,
}

#[derive(Deserialize, ToSchema)]
pub struct CheckoutReq {
    pub merchant_id: i32,
    pub delivery_address: String,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub guest_phone: Option<String>,
    pub items: Vec<CheckoutItem>,
}

fn is_blank(value: Option<&String>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

/// Reject malformed checkout requests before any store access.
fn validate_checkout(body: &CheckoutReq, user_id: Option<i32>) -> Result<(), AppError> {
    if body.items.is_empty() || body.delivery_address.trim().is_empty() {
        return Err(AppError::BadRequest(
            "Merchant, delivery address, and items are required".into(),
        ));
    }
    if body.items.iter().any(|item| item.quantity < 1) {
        return Err(AppError::BadRequest(
            "Item quantities must be at least 1".into(),
        ));
    }
    if user_id.is_none()
        && (is_blank(body.guest_name.as_ref())
            || is_blank(body.guest_email.as_ref())
            || is_blank(body.guest_phone.as_ref()))
    {
        return Err(AppError::BadRequest(
            "Guest name, email, and phone are required for guest checkout".into(),
        ));
    }
    Ok(())
}

#[derive(Serialize, ToSchema)]
pub struct CheckoutRes {
    pub order: OrderEntity,
    pub order_items: Vec<OrderItemEntity>,
}

/// Checkout: turn a list of product/quantity pairs into a persisted order.
///
/// Everything from the availability reads to the cart clear runs inside one
/// transaction; a failure at any step leaves no order, no order items, and
/// no stock change. Stock is decremented with a conditional relative update
/// so concurrent checkouts serialize on the row and can never drive stock
/// negative.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Orders"],
    request_body = CheckoutReq,
    responses(
        (status = 201, description = "Order placed successfully", body = StdResponse<CheckoutRes, String>),
        (status = 400, description = "Invalid checkout request"),
        (status = 409, description = "A product is unavailable or out of stock")
    )
)]
async fn create_order(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Json(body): Json<CheckoutReq>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user.map(|u| u.id);
    validate_checkout(&body, user_id)?;
    let product_ids: Vec<i32> = body
        .items
        .iter()
        .map(|item| item.merchant_product_id)
        .collect();

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let (order, created_items) = conn
        .transaction(move |conn| {
            Box::pin(async move {
                // Read price, status, and display name for every requested
                // item. Prices observed here are the ones frozen into the
                // order; they are never re-read.
                let mut total_amount = 0.0_f64;
                let mut lines: Vec<(i32, String, f64, i32)> =
                    Vec::with_capacity(body.items.len());
                for item in &body.items {
                    let row: Option<(f64, String, Option<String>, String)> =
                        merchant_products::table
                            .inner_join(items_master::table)
                            .filter(merchant_products::id.eq(item.merchant_product_id))
                            .filter(merchant_products::merchant_id.eq(body.merchant_id))
                            .select((
                                merchant_products::price,
                                merchant_products::status,
                                merchant_products::custom_name,
                                items_master::name,
                            ))
                            .first(conn)
                            .await
                            .optional()
                            .context("Failed to read product for checkout")?;

                    let Some((price, status, custom_name, item_name)) = row else {
                        return Err(AppError::Unavailable(format!(
                            "Product {} is not available",
                            item.merchant_product_id
                        )));
                    };
                    if status != PRODUCT_STATUS_AVAILABLE {
                        return Err(AppError::Unavailable(format!(
                            "Product {} is not available",
                            item.merchant_product_id
                        )));
                    }

                    total_amount += price * f64::from(item.quantity);
                    lines.push((
                        item.merchant_product_id,
                        custom_name.unwrap_or(item_name),
                        price,
                        item.quantity,
                    ));
                }

                let order: OrderEntity = diesel::insert_into(orders::table)
                    .values(CreateOrderEntity {
                        order_number: generate_order_number(),
                        user_id,
                        merchant_id: body.merchant_id,
                        guest_name: body.guest_name.clone(),
                        guest_email: body.guest_email.clone(),
                        guest_phone: body.guest_phone.clone(),
                        delivery_address: body.delivery_address.clone(),
                        total_amount,
                        payment_method: body
                            .payment_method
                            .clone()
                            .unwrap_or_else(|| "cod".to_string()),
                        status: OrderStatus::Pending.as_str().to_string(),
                        notes: body.notes.clone(),
                    })
                    .returning(OrderEntity::as_returning())
                    .get_result(conn)
                    .await
                    .context("Failed to create order")?;

                let mut created_items = Vec::with_capacity(lines.len());
                for (product_id, product_name, price, quantity) in lines {
                    let order_item: OrderItemEntity = diesel::insert_into(order_items::table)
                        .values(CreateOrderItemEntity {
                            order_id: order.id,
                            merchant_product_id: product_id,
                            product_name,
                            price,
                            quantity,
                            subtotal: price * f64::from(quantity),
                        })
                        .returning(OrderItemEntity::as_returning())
                        .get_result(conn)
                        .await
                        .context("Failed to create order item")?;
                    created_items.push(order_item);

                    // Conditional relative decrement: the row lock taken by
                    // the update serializes concurrent checkouts, and the
                    // stock guard refuses to go below zero.
                    let decremented = diesel::update(
                        merchant_products::table
                            .find(product_id)
                            .filter(merchant_products::stock_quantity.ge(quantity)),
                    )
                    .set(
                        merchant_products::stock_quantity
                            .eq(merchant_products::stock_quantity - quantity),
                    )
                    .execute(conn)
                    .await
                    .context("Failed to decrement stock")?;
                    if decremented == 0 {
                        return Err(AppError::Unavailable(format!(
                            "Insufficient stock for product {product_id}"
                        )));
                    }
                }

                if let Some(user_id) = user_id {
                    diesel::delete(cart_items::table.filter(cart_items::user_id.eq(user_id)))
                        .execute(conn)
                        .await
                        .context("Failed to clear cart")?;
                }

                Ok::<(OrderEntity, Vec<OrderItemEntity>), AppError>((order, created_items))
            })
        })
        .await?;

    // The catalog's cached stock counts are stale now that the commit
    // succeeded. This covers the public and merchant-scoped listings plus
    // every touched product detail.
    for pattern in merchant_catalog_patterns(order.merchant_id) {
        cache::invalidate_pattern(&state.cache, &pattern).await;
    }
    for product_id in &product_ids {
        cache::invalidate_pattern(&state.cache, &format!("product:{product_id}")).await;
    }

    tracing::info!(
        "Order {} placed for merchant {} (total {:.2})",
        order.order_number,
        order.merchant_id,
        order.total_amount
    );

    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(CheckoutRes {
                order,
                order_items: created_items,
            }),
            message: Some("Order placed successfully"),
        },
    ))
}

/// Order joined to the owning merchant's display name.
#[derive(Serialize, ToSchema)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: OrderEntity,
    pub merchant_name: String,
}

#[derive(Deserialize, IntoParams)]
struct ListOrdersQuery {
    status: Option<String>,
    merchant_id: Option<i32>,
}

/// List all orders in the system (admin).
#[utoipa::path(
    get,
    path = "/",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(ListOrdersQuery),
    responses(
        (status = 200, description = "List all orders", body = StdResponse<Vec<OrderView>, String>)
    )
)]
async fn get_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let mut list = orders::table.inner_join(merchants::table).into_boxed();
    if let Some(status) = &query.status {
        list = list.filter(orders::status.eq(status.clone()));
    }
    if let Some(merchant_id) = query.merchant_id {
        list = list.filter(orders::merchant_id.eq(merchant_id));
    }

    let rows: Vec<(OrderEntity, String)> = list
        .order_by(orders::created_at.desc())
        .select((OrderEntity::as_select(), merchants::business_name))
        .get_results(conn)
        .await
        .context("Failed to get orders")?;

    let orders: Vec<OrderView> = rows
        .into_iter()
        .map(|(order, merchant_name)| OrderView {
            order,
            merchant_name,
        })
        .collect();

    Ok(StdResponse {
        data: Some(orders),
        message: Some("Get orders successfully"),
    })
}

#[derive(Deserialize, IntoParams)]
struct MerchantOrdersQuery {
    status: Option<String>,
}

/// Orders placed against the authenticated merchant.
#[utoipa::path(
    get,
    path = "/merchant/orders",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(MerchantOrdersQuery),
    responses(
        (status = 200, description = "List merchant orders", body = StdResponse<Vec<OrderEntity>, String>)
    )
)]
async fn get_merchant_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<MerchantOrdersQuery>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;
    let merchant_id = merchant_id_for_user(conn, user.id).await?;

    let mut list = orders::table
        .filter(orders::merchant_id.eq(merchant_id))
        .into_boxed();
    if let Some(status) = &query.status {
        list = list.filter(orders::status.eq(status.clone()));
    }

    let orders: Vec<OrderEntity> = list
        .order_by(orders::created_at.desc())
        .select(OrderEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get merchant orders")?;

    Ok(StdResponse {
        data: Some(orders),
        message: Some("Get merchant orders successfully"),
    })
}

/// Orders placed by the authenticated user.
#[utoipa::path(
    get,
    path = "/my/orders",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List my orders", body = StdResponse<Vec<OrderView>, String>)
    )
)]
async fn get_my_orders(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let rows: Vec<(OrderEntity, String)> = orders::table
        .inner_join(merchants::table)
        .filter(orders::user_id.eq(user.id))
        .order_by(orders::created_at.desc())
        .select((OrderEntity::as_select(), merchants::business_name))
        .get_results(conn)
        .await
        .context("Failed to get my orders")?;

    let orders: Vec<OrderView> = rows
        .into_iter()
        .map(|(order, merchant_name)| OrderView {
            order,
            merchant_name,
        })
        .collect();

    Ok(StdResponse {
        data: Some(orders),
        message: Some("Get my orders successfully"),
    })
}

#[derive(Serialize, ToSchema)]
struct GetOrderRes {
    #[serde(flatten)]
    pub order: OrderView,
    pub items: Vec<OrderItemEntity>,
}

/// Fetch a single order with its line items. Visible to the placing user,
/// the owning merchant, and administrators.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Order ID to fetch")),
    responses(
        (status = 200, description = "Get order successfully", body = StdResponse<GetOrderRes, String>)
    )
)]
async fn get_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let row: Option<(OrderEntity, String)> = orders::table
        .inner_join(merchants::table)
        .filter(orders::id.eq(id))
        .select((OrderEntity::as_select(), merchants::business_name))
        .first(conn)
        .await
        .optional()
        .context("Failed to get order")?;
    let (order, merchant_name) = row.ok_or(AppError::NotFound)?;

    match user.role {
        Role::SuperAdmin => {}
        Role::Merchant => {
            let merchant_id = merchant_id_for_user(conn, user.id).await?;
            if order.merchant_id != merchant_id {
                return Err(AppError::NotFound);
            }
        }
        Role::User => {
            if order.user_id != Some(user.id) {
                return Err(AppError::NotFound);
            }
        }
    }

    let items: Vec<OrderItemEntity> = order_items::table
        .filter(order_items::order_id.eq(order.id))
        .order_by(order_items::id.asc())
        .select(OrderItemEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get order items")?;

    Ok(StdResponse {
        data: Some(GetOrderRes {
            order: OrderView {
                order,
                merchant_name,
            },
            items,
        }),
        message: Some("Get order successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct UpdateOrderStatusReq {
    status: String,
    /// Per-line availability keyed by the item's position in the order.
    /// Positional by contract with the storefront client.
    #[serde(rename = "itemAvailability")]
    item_availability: Option<HashMap<usize, bool>>,
}

/// Drive an order through its fulfilment state machine. Only the owning
/// merchant or an administrator may transition an order; merchants may also
/// flag individual line items as unavailable while accepting.
#[utoipa::path(
    patch,
    path = "/{id}/status",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Order ID to update")),
    request_body = UpdateOrderStatusReq,
    responses(
        (status = 200, description = "Order status updated successfully", body = StdResponse<OrderEntity, String>),
        (status = 400, description = "Unknown status or invalid transition"),
        (status = 403, description = "Caller does not own this order")
    )
)]
async fn update_order_status(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<UpdateOrderStatusReq>,
) -> Result<impl IntoResponse, AppError> {
    let next = OrderStatus::parse(&body.status)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown order status: {}", body.status)))?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let updated_order = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let order: OrderEntity = orders::table
                    .find(id)
                    .select(OrderEntity::as_select())
                    .first(conn)
                    .await?;

                if user.role == Role::Merchant {
                    let merchant_id = merchant_id_for_user(conn, user.id).await?;
                    if order.merchant_id != merchant_id {
                        return Err(AppError::ForbiddenResource(
                            "Order does not belong to this merchant".into(),
                        ));
                    }
                }

                let current = OrderStatus::parse(&order.status).ok_or_else(|| {
                    AppError::Other(anyhow!(
                        "Order {} has unrecognized status {}",
                        order.id,
                        order.status
                    ))
                })?;
                if !current.can_transition_to(next) {
                    return Err(AppError::BadRequest(format!(
                        "Cannot transition order from {} to {}",
                        current.as_str(),
                        next.as_str()
                    )));
                }

                if user.role == Role::Merchant {
                    if let Some(availability) = &body.item_availability {
                        let item_ids: Vec<i32> = order_items::table
                            .filter(order_items::order_id.eq(order.id))
                            .order_by(order_items::id.asc())
                            .select(order_items::id)
                            .get_results(conn)
                            .await
                            .context("Failed to get order items")?;

                        for (position, item_id) in item_ids.into_iter().enumerate() {
                            let is_available =
                                availability.get(&position).copied().unwrap_or(true);
                            diesel::update(order_items::table.find(item_id))
                                .set(order_items::is_available.eq(is_available))
                                .execute(conn)
                                .await
                                .context("Failed to update item availability")?;
                        }
                    }
                }

                let updated_order: OrderEntity = diesel::update(orders::table.find(order.id))
                    .set((
                        orders::status.eq(next.as_str()),
                        orders::updated_at.eq(diesel::dsl::now),
                    ))
                    .returning(OrderEntity::as_returning())
                    .get_result(conn)
                    .await
                    .context("Failed to update order status")?;

                Ok::<OrderEntity, AppError>(updated_order)
            })
        })
        .await?;

    tracing::info!(
        "Order {} transitioned to {}",
        updated_order.order_number,
        updated_order.status
    );

    Ok(StdResponse {
        data: Some(updated_order),
        message: Some("Order status updated successfully"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(items: Vec<CheckoutItem>) -> CheckoutReq {
        CheckoutReq {
            merchant_id: 1,
            delivery_address: "12 Market Road".into(),
            payment_method: None,
            notes: None,
            guest_name: None,
            guest_email: None,
            guest_phone: None,
            items,
        }
    }

    fn item(quantity: i32) -> CheckoutItem {
        CheckoutItem {
            merchant_product_id: 9,
            quantity,
        }
    }

    #[test]
    fn order_numbers_carry_prefix_and_suffix() {
        let number = generate_order_number();
        assert!(number.starts_with("ORD"));
        assert!(number.len() >= 3 + 13 + 3);
        assert!(number[3..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn empty_item_list_is_rejected() {
        let err = validate_checkout(&request(vec![]), Some(1)).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn blank_delivery_address_is_rejected() {
        let mut req = request(vec![item(1)]);
        req.delivery_address = "  ".into();
        assert!(validate_checkout(&req, Some(1)).is_err());
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        assert!(validate_checkout(&request(vec![item(0)]), Some(1)).is_err());
        assert!(validate_checkout(&request(vec![item(-2)]), Some(1)).is_err());
    }

    #[test]
    fn guest_checkout_requires_contact_details() {
        let mut req = request(vec![item(2)]);
        assert!(validate_checkout(&req, None).is_err());

        req.guest_name = Some("Asha".into());
        req.guest_email = Some("asha@example.com".into());
        assert!(validate_checkout(&req, None).is_err());

        req.guest_phone = Some("5550100".into());
        assert!(validate_checkout(&req, None).is_ok());
    }

    #[test]
    fn authenticated_checkout_skips_guest_fields() {
        assert!(validate_checkout(&request(vec![item(1)]), Some(7)).is_ok());
    }

    #[test]
    fn item_availability_defaults_to_true_for_unlisted_positions() {
        let availability: HashMap<usize, bool> = [(1, false)].into_iter().collect();
        assert!(availability.get(&0).copied().unwrap_or(true));
        assert!(!availability.get(&1).copied().unwrap_or(true));
        assert!(availability.get(&2).copied().unwrap_or(true));
    }
}
