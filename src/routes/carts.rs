use anyhow::Context;
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    middleware::{self, AuthUser},
    models::{CartItemEntity, PRODUCT_STATUS_AVAILABLE},
    schema::{cart_items, items_master, merchant_products, merchants},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/cart",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_cart))
            .routes(utoipa_axum::routes!(add_item))
            .routes(utoipa_axum::routes!(update_item))
            .routes(utoipa_axum::routes!(remove_item))
            .routes(utoipa_axum::routes!(clear_cart))
            .route_layer(axum::middleware::from_fn(middleware::user_authorization)),
    )
}

/// Cart entry joined to the live product. Price and availability always
/// reflect the catalog's current state, never a snapshot.
#[derive(Serialize, ToSchema)]
pub struct CartLine {
    pub id: i32,
    pub merchant_product_id: i32,
    pub quantity: i32,
    pub product_name: String,
    pub unit: Option<String>,
    pub price: f64,
    pub status: String,
    pub merchant_id: i32,
    pub merchant_name: String,
    pub subtotal: f64,
}

#[derive(Serialize, ToSchema)]
struct GetCartRes {
    pub cart_items: Vec<CartLine>,
    pub total: f64,
    pub item_count: usize,
}

/// Fetch the caller's cart with a live-priced total.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Cart"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Get cart successfully", body = StdResponse<GetCartRes, String>)
    )
)]
async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    type CartRow = (
        CartItemEntity,
        i32,
        Option<String>,
        f64,
        String,
        String,
        Option<String>,
        i32,
        String,
    );
    let rows: Vec<CartRow> = cart_items::table
        .inner_join(
            merchant_products::table
                .inner_join(items_master::table)
                .inner_join(merchants::table),
        )
        .filter(cart_items::user_id.eq(user.id))
        .order_by(cart_items::created_at.desc())
        .select((
            CartItemEntity::as_select(),
            merchant_products::id,
            merchant_products::custom_name,
            merchant_products::price,
            merchant_products::status,
            items_master::name,
            items_master::unit,
            merchants::id,
            merchants::business_name,
        ))
        .get_results(conn)
        .await
        .context("Failed to get cart items")?;

    let cart_items: Vec<CartLine> = rows
        .into_iter()
        .map(
            |(entry, product_id, custom_name, price, status, item_name, unit, merchant_id, merchant_name)| {
                CartLine {
                    id: entry.id,
                    merchant_product_id: product_id,
                    quantity: entry.quantity,
                    product_name: custom_name.unwrap_or(item_name),
                    unit,
                    price,
                    status,
                    merchant_id,
                    merchant_name,
                    subtotal: price * f64::from(entry.quantity),
                }
            },
        )
        .collect();

    let total: f64 = cart_items.iter().map(|line| line.subtotal).sum();
    let item_count = cart_items.len();

    Ok(StdResponse {
        data: Some(GetCartRes {
            cart_items,
            total,
            item_count,
        }),
        message: Some("Get cart successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct AddCartItemReq {
    merchant_product_id: i32,
    quantity: i32,
}

/// Add a product to the cart. Re-adding an existing product increments its
/// quantity instead of creating a duplicate entry.
#[utoipa::path(
    post,
    path = "/items",
    tags = ["Cart"],
    security(("bearerAuth" = [])),
    request_body = AddCartItemReq,
    responses(
        (status = 200, description = "Added item to cart successfully", body = StdResponse<CartItemEntity, String>)
    )
)]
async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<AddCartItemReq>,
) -> Result<impl IntoResponse, AppError> {
    if body.quantity < 1 {
        return Err(AppError::BadRequest(
            "Valid product ID and quantity are required".into(),
        ));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let status: Option<String> = merchant_products::table
        .find(body.merchant_product_id)
        .select(merchant_products::status)
        .first(conn)
        .await
        .optional()
        .context("Failed to check product")?;
    let status = status.ok_or(AppError::NotFound)?;
    if status != PRODUCT_STATUS_AVAILABLE {
        return Err(AppError::BadRequest("Product is not available".into()));
    }

    let entry: CartItemEntity = diesel::insert_into(cart_items::table)
        .values((
            cart_items::user_id.eq(user.id),
            cart_items::merchant_product_id.eq(body.merchant_product_id),
            cart_items::quantity.eq(body.quantity),
        ))
        .on_conflict((cart_items::user_id, cart_items::merchant_product_id))
        .do_update()
        .set((
            cart_items::quantity.eq(cart_items::quantity + body.quantity),
            cart_items::updated_at.eq(diesel::dsl::now),
        ))
        .returning(CartItemEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to upsert cart item")?;

    Ok(StdResponse {
        data: Some(entry),
        message: Some("Item added to cart successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct UpdateCartItemReq {
    quantity: i32,
}

/// Set the quantity of an owned cart entry.
#[utoipa::path(
    put,
    path = "/items/{id}",
    tags = ["Cart"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Cart item ID to update")),
    request_body = UpdateCartItemReq,
    responses(
        (status = 200, description = "Updated cart successfully", body = StdResponse<CartItemEntity, String>)
    )
)]
async fn update_item(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<UpdateCartItemReq>,
) -> Result<impl IntoResponse, AppError> {
    if body.quantity < 1 {
        return Err(AppError::BadRequest("Valid quantity is required".into()));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let entry: CartItemEntity = diesel::update(
        cart_items::table
            .find(id)
            .filter(cart_items::user_id.eq(user.id)),
    )
    .set((
        cart_items::quantity.eq(body.quantity),
        cart_items::updated_at.eq(diesel::dsl::now),
    ))
    .returning(CartItemEntity::as_returning())
    .get_result(conn)
    .await?;

    Ok(StdResponse {
        data: Some(entry),
        message: Some("Cart updated successfully"),
    })
}

/// Remove a single entry from the cart.
#[utoipa::path(
    delete,
    path = "/items/{id}",
    tags = ["Cart"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Cart item ID to remove")),
    responses(
        (status = 200, description = "Removed item from cart successfully", body = StdResponse<String, String>)
    )
)]
async fn remove_item(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let deleted = diesel::delete(
        cart_items::table
            .find(id)
            .filter(cart_items::user_id.eq(user.id)),
    )
    .execute(conn)
    .await
    .context("Failed to remove cart item")?;
    if deleted == 0 {
        return Err(AppError::NotFound);
    }

    Ok(StdResponse::<(), _> {
        data: None,
        message: Some("Item removed from cart successfully"),
    })
}

/// Drop every entry in the caller's cart.
#[utoipa::path(
    delete,
    path = "/",
    tags = ["Cart"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Cleared cart successfully", body = StdResponse<String, String>)
    )
)]
async fn clear_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    diesel::delete(cart_items::table.filter(cart_items::user_id.eq(user.id)))
        .execute(conn)
        .await
        .context("Failed to clear cart")?;

    Ok(StdResponse::<(), _> {
        data: None,
        message: Some("Cart cleared successfully"),
    })
}
