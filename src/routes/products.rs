use anyhow::Context;
use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use diesel::{
    ExpressionMethods, NullableExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper,
};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    cache::{self, DETAIL_TTL, LIST_TTL},
    middleware::{self, AuthUser},
    models::{
        CreateMerchantProductEntity, MerchantProductEntity, PRODUCT_STATUS_AVAILABLE,
        PRODUCT_STATUSES,
    },
    routes::{key_segment, merchant_catalog_patterns, merchant_id_for_user},
    schema::{categories, items_master, merchant_products, merchants},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/products",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_products))
            .routes(utoipa_axum::routes!(get_product))
            .merge(
                OpenApiRouter::new()
                    .routes(utoipa_axum::routes!(get_own_products))
                    .routes(utoipa_axum::routes!(create_product))
                    .routes(utoipa_axum::routes!(update_product))
                    .routes(utoipa_axum::routes!(update_product_status))
                    .routes(utoipa_axum::routes!(delete_product))
                    .route_layer(axum::middleware::from_fn(middleware::merchant_authorization)),
            ),
    )
}

/// Sellable product joined to its catalog item, category, and merchant.
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ProductView {
    #[serde(flatten)]
    pub product: MerchantProductEntity,
    pub item_name: String,
    pub unit: Option<String>,
    pub category_name: Option<String>,
    pub merchant_name: String,
}

type ProductRow = (
    MerchantProductEntity,
    String,
    Option<String>,
    Option<String>,
    String,
);

fn into_view(row: ProductRow) -> ProductView {
    let (product, item_name, unit, category_name, merchant_name) = row;
    ProductView {
        product,
        item_name,
        unit,
        category_name,
        merchant_name,
    }
}

async fn fetch_product_view(
    conn: &mut AsyncPgConnection,
    id: i32,
) -> Result<Option<ProductView>, AppError> {
    let row: Option<ProductRow> = merchant_products::table
        .inner_join(items_master::table.left_join(categories::table))
        .inner_join(merchants::table)
        .filter(merchant_products::id.eq(id))
        .select((
            MerchantProductEntity::as_select(),
            items_master::name,
            items_master::unit,
            categories::name.nullable(),
            merchants::business_name,
        ))
        .first(conn)
        .await
        .optional()
        .context("Failed to get product")?;
    Ok(row.map(into_view))
}

#[derive(Deserialize, IntoParams)]
struct ListProductsQuery {
    merchant_id: Option<i32>,
    status: Option<String>,
    category_id: Option<i32>,
}

impl ListProductsQuery {
    fn cache_key(&self) -> String {
        format!(
            "products:{}:{}:{}",
            key_segment(self.merchant_id.as_ref()),
            key_segment(self.status.as_ref()),
            key_segment(self.category_id.as_ref()),
        )
    }
}

/// Public product listing. Only products of verified, active merchants with
/// an active subscription are visible.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Products"],
    params(ListProductsQuery),
    responses(
        (status = 200, description = "List products", body = StdResponse<Vec<ProductView>, String>)
    )
)]
async fn get_products(
    State(state): State<AppState>,
    Query(query): Query<ListProductsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let products = cache::get_cached(&state.cache, &query.cache_key(), LIST_TTL, || async {
        let conn = &mut state
            .db_pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        let mut list = merchant_products::table
            .inner_join(items_master::table.left_join(categories::table))
            .inner_join(merchants::table)
            .filter(merchants::is_verified.eq(true))
            .filter(merchants::is_active.eq(true))
            .filter(merchants::subscription_status.eq("active"))
            .into_boxed();

        if let Some(merchant_id) = query.merchant_id {
            list = list.filter(merchant_products::merchant_id.eq(merchant_id));
        }
        if let Some(status) = &query.status {
            list = list.filter(merchant_products::status.eq(status.clone()));
        }
        if let Some(category_id) = query.category_id {
            list = list.filter(items_master::category_id.eq(category_id));
        }

        let rows: Vec<ProductRow> = list
            .order_by(merchant_products::created_at.desc())
            .select((
                MerchantProductEntity::as_select(),
                items_master::name,
                items_master::unit,
                categories::name.nullable(),
                merchants::business_name,
            ))
            .get_results(conn)
            .await
            .context("Failed to get products")?;

        Ok(rows.into_iter().map(into_view).collect::<Vec<_>>())
    })
    .await?;

    Ok(StdResponse {
        data: Some(products),
        message: Some("Get products successfully"),
    })
}

#[derive(Deserialize, IntoParams)]
struct OwnProductsQuery {
    status: Option<String>,
}

/// The authenticated merchant's own products, including hidden ones.
#[utoipa::path(
    get,
    path = "/my/products",
    tags = ["Products"],
    security(("bearerAuth" = [])),
    params(OwnProductsQuery),
    responses(
        (status = 200, description = "List own products", body = StdResponse<Vec<ProductView>, String>)
    )
)]
async fn get_own_products(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OwnProductsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;
    let merchant_id = merchant_id_for_user(conn, user.id).await?;

    let cache_key = format!(
        "merchant:{merchant_id}:products:{}",
        key_segment(query.status.as_ref())
    );
    let products = cache::get_cached(&state.cache, &cache_key, LIST_TTL, || async {
        let conn = &mut state
            .db_pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        let mut list = merchant_products::table
            .inner_join(items_master::table.left_join(categories::table))
            .inner_join(merchants::table)
            .filter(merchant_products::merchant_id.eq(merchant_id))
            .into_boxed();
        if let Some(status) = &query.status {
            list = list.filter(merchant_products::status.eq(status.clone()));
        }

        let rows: Vec<ProductRow> = list
            .order_by(merchant_products::created_at.desc())
            .select((
                MerchantProductEntity::as_select(),
                items_master::name,
                items_master::unit,
                categories::name.nullable(),
                merchants::business_name,
            ))
            .get_results(conn)
            .await
            .context("Failed to get own products")?;

        Ok(rows.into_iter().map(into_view).collect::<Vec<_>>())
    })
    .await?;

    Ok(StdResponse {
        data: Some(products),
        message: Some("Get own products successfully"),
    })
}

/// Public product detail, subject to the same merchant gate as the listing.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Products"],
    params(("id" = i32, Path, description = "Product ID to fetch")),
    responses(
        (status = 200, description = "Get product successfully", body = StdResponse<ProductView, String>)
    )
)]
async fn get_product(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let product = cache::get_cached(&state.cache, &format!("product:{id}"), DETAIL_TTL, || async {
        let conn = &mut state
            .db_pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        let row: Option<ProductRow> = merchant_products::table
            .inner_join(items_master::table.left_join(categories::table))
            .inner_join(merchants::table)
            .filter(merchant_products::id.eq(id))
            .filter(merchants::is_verified.eq(true))
            .filter(merchants::is_active.eq(true))
            .filter(merchants::subscription_status.eq("active"))
            .select((
                MerchantProductEntity::as_select(),
                items_master::name,
                items_master::unit,
                categories::name.nullable(),
                merchants::business_name,
            ))
            .first(conn)
            .await
            .optional()
            .context("Failed to get product")?;

        row.map(into_view).ok_or(AppError::NotFound)
    })
    .await?;

    Ok(StdResponse {
        data: Some(product),
        message: Some("Get product successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct ProductReq {
    item_master_id: i32,
    custom_name: Option<String>,
    description: Option<String>,
    price: f64,
    stock_quantity: Option<i32>,
    status: Option<String>,
    is_active: Option<bool>,
}

fn validate_product_status(status: &str) -> Result<(), AppError> {
    if PRODUCT_STATUSES.contains(&status) {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "Valid status is required ({})",
            PRODUCT_STATUSES.join(", ")
        )))
    }
}

/// Create a product for the authenticated merchant.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Products"],
    security(("bearerAuth" = [])),
    request_body = ProductReq,
    responses(
        (status = 200, description = "Created product successfully", body = StdResponse<ProductView, String>)
    )
)]
async fn create_product(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<ProductReq>,
) -> Result<impl IntoResponse, AppError> {
    if body.price <= 0.0 {
        return Err(AppError::BadRequest(
            "Item master ID and a positive price are required".into(),
        ));
    }
    let status = body
        .status
        .unwrap_or_else(|| PRODUCT_STATUS_AVAILABLE.to_string());
    validate_product_status(&status)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;
    let merchant_id = merchant_id_for_user(conn, user.id).await?;

    let product: MerchantProductEntity = diesel::insert_into(merchant_products::table)
        .values(CreateMerchantProductEntity {
            merchant_id,
            item_master_id: body.item_master_id,
            custom_name: body.custom_name,
            description: body.description,
            price: body.price,
            stock_quantity: body.stock_quantity.unwrap_or(0),
            status,
            is_active: body.is_active.unwrap_or(true),
        })
        .returning(MerchantProductEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to create product")?;

    let view = fetch_product_view(conn, product.id)
        .await?
        .ok_or(AppError::NotFound)?;

    for pattern in merchant_catalog_patterns(merchant_id) {
        cache::invalidate_pattern(&state.cache, &pattern).await;
    }

    Ok(StdResponse {
        data: Some(view),
        message: Some("Product created successfully"),
    })
}

/// Update an owned product.
#[utoipa::path(
    put,
    path = "/{id}",
    tags = ["Products"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Product ID to update")),
    request_body = ProductReq,
    responses(
        (status = 200, description = "Updated product successfully", body = StdResponse<ProductView, String>)
    )
)]
async fn update_product(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<ProductReq>,
) -> Result<impl IntoResponse, AppError> {
    if body.price <= 0.0 {
        return Err(AppError::BadRequest(
            "Item master ID and a positive price are required".into(),
        ));
    }
    let status = body
        .status
        .unwrap_or_else(|| PRODUCT_STATUS_AVAILABLE.to_string());
    validate_product_status(&status)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;
    let merchant_id = merchant_id_for_user(conn, user.id).await?;

    let updated = diesel::update(
        merchant_products::table
            .find(id)
            .filter(merchant_products::merchant_id.eq(merchant_id)),
    )
    .set((
        merchant_products::item_master_id.eq(body.item_master_id),
        merchant_products::custom_name.eq(body.custom_name),
        merchant_products::description.eq(body.description),
        merchant_products::price.eq(body.price),
        merchant_products::stock_quantity.eq(body.stock_quantity.unwrap_or(0)),
        merchant_products::status.eq(status),
        merchant_products::is_active.eq(body.is_active.unwrap_or(true)),
        merchant_products::updated_at.eq(diesel::dsl::now),
    ))
    .execute(conn)
    .await
    .context("Failed to update product")?;
    if updated == 0 {
        return Err(AppError::NotFound);
    }

    let view = fetch_product_view(conn, id).await?.ok_or(AppError::NotFound)?;

    for pattern in merchant_catalog_patterns(merchant_id) {
        cache::invalidate_pattern(&state.cache, &pattern).await;
    }
    cache::invalidate_pattern(&state.cache, &format!("product:{id}")).await;

    Ok(StdResponse {
        data: Some(view),
        message: Some("Product updated successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct ProductStatusReq {
    status: String,
}

/// Flip an owned product's availability status.
#[utoipa::path(
    patch,
    path = "/{id}/status",
    tags = ["Products"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Product ID to update")),
    request_body = ProductStatusReq,
    responses(
        (status = 200, description = "Updated product status successfully", body = StdResponse<String, String>)
    )
)]
async fn update_product_status(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<ProductStatusReq>,
) -> Result<impl IntoResponse, AppError> {
    validate_product_status(&body.status)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;
    let merchant_id = merchant_id_for_user(conn, user.id).await?;

    let updated = diesel::update(
        merchant_products::table
            .find(id)
            .filter(merchant_products::merchant_id.eq(merchant_id)),
    )
    .set((
        merchant_products::status.eq(body.status),
        merchant_products::updated_at.eq(diesel::dsl::now),
    ))
    .execute(conn)
    .await
    .context("Failed to update product status")?;
    if updated == 0 {
        return Err(AppError::NotFound);
    }

    for pattern in merchant_catalog_patterns(merchant_id) {
        cache::invalidate_pattern(&state.cache, &pattern).await;
    }
    cache::invalidate_pattern(&state.cache, &format!("product:{id}")).await;

    Ok(StdResponse::<(), _> {
        data: None,
        message: Some("Product status updated successfully"),
    })
}

/// Delete an owned product.
#[utoipa::path(
    delete,
    path = "/{id}",
    tags = ["Products"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Product ID to delete")),
    responses(
        (status = 200, description = "Deleted product successfully", body = StdResponse<String, String>)
    )
)]
async fn delete_product(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;
    let merchant_id = merchant_id_for_user(conn, user.id).await?;

    let deleted = diesel::delete(
        merchant_products::table
            .find(id)
            .filter(merchant_products::merchant_id.eq(merchant_id)),
    )
    .execute(conn)
    .await
    .context("Failed to delete product")?;
    if deleted == 0 {
        return Err(AppError::NotFound);
    }

    for pattern in merchant_catalog_patterns(merchant_id) {
        cache::invalidate_pattern(&state.cache, &pattern).await;
    }
    cache::invalidate_pattern(&state.cache, &format!("product:{id}")).await;

    Ok(StdResponse::<(), _> {
        data: None,
        message: Some("Product deleted successfully"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_a_valid_status() {
        assert!(validate_product_status(PRODUCT_STATUS_AVAILABLE).is_ok());
        for status in PRODUCT_STATUSES {
            assert!(validate_product_status(status).is_ok());
        }
    }

    #[test]
    fn unknown_statuses_are_rejected() {
        assert!(validate_product_status("discontinued").is_err());
        assert!(validate_product_status("").is_err());
    }
}
