use anyhow::Context;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use diesel::{
    ExpressionMethods, NullableExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper,
};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    cache,
    middleware::{self, AuthUser},
    models::{CreateMerchantEntity, MerchantEntity},
    routes::merchant_catalog_patterns,
    schema::{cart_items, categories, merchant_products, merchants, orders, subscription_payments},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/merchants",
        OpenApiRouter::new()
            .merge(
                OpenApiRouter::new()
                    .routes(utoipa_axum::routes!(get_my_profile))
                    .routes(utoipa_axum::routes!(update_my_profile))
                    .route_layer(axum::middleware::from_fn(middleware::merchant_authorization)),
            )
            .merge(
                OpenApiRouter::new()
                    .routes(utoipa_axum::routes!(get_merchants))
                    .routes(utoipa_axum::routes!(create_merchant))
                    .routes(utoipa_axum::routes!(get_merchant))
                    .routes(utoipa_axum::routes!(update_merchant))
                    .routes(utoipa_axum::routes!(verify_merchant))
                    .routes(utoipa_axum::routes!(update_merchant_status))
                    .routes(utoipa_axum::routes!(delete_merchant))
                    .route_layer(axum::middleware::from_fn(middleware::admin_authorization)),
            ),
    )
}

fn validate_business_name(name: &str) -> Result<(), AppError> {
    if name.trim().is_empty() {
        return Err(AppError::BadRequest("Business name is required".into()));
    }
    Ok(())
}

/// Merchant joined to its category name.
#[derive(Serialize, ToSchema)]
pub struct MerchantView {
    #[serde(flatten)]
    pub merchant: MerchantEntity,
    pub category_name: Option<String>,
}

type MerchantRow = (MerchantEntity, Option<String>);

fn into_view(row: MerchantRow) -> MerchantView {
    let (merchant, category_name) = row;
    MerchantView {
        merchant,
        category_name,
    }
}

/// Drop every cached view of a merchant's catalog. Gate flips change what the
/// public may see, so the listings and each product detail key must go.
async fn invalidate_catalog(
    state: &AppState,
    conn: &mut AsyncPgConnection,
    merchant_id: i32,
) -> Result<(), AppError> {
    let product_ids: Vec<i32> = merchant_products::table
        .filter(merchant_products::merchant_id.eq(merchant_id))
        .select(merchant_products::id)
        .get_results(conn)
        .await
        .context("Failed to get merchant products")?;

    for pattern in merchant_catalog_patterns(merchant_id) {
        cache::invalidate_pattern(&state.cache, &pattern).await;
    }
    for product_id in product_ids {
        cache::invalidate_pattern(&state.cache, &format!("product:{product_id}")).await;
    }
    Ok(())
}

async fn fetch_merchant_view(
    conn: &mut AsyncPgConnection,
    id: i32,
) -> Result<MerchantView, AppError> {
    let row: Option<MerchantRow> = merchants::table
        .left_join(categories::table)
        .filter(merchants::id.eq(id))
        .select((MerchantEntity::as_select(), categories::name.nullable()))
        .first(conn)
        .await
        .optional()
        .context("Failed to get merchant")?;
    row.map(into_view).ok_or(AppError::NotFound)
}

#[derive(Deserialize, IntoParams)]
struct ListMerchantsQuery {
    subscription_status: Option<String>,
}

/// List merchants (admin).
#[utoipa::path(
    get,
    path = "/",
    tags = ["Merchants"],
    security(("bearerAuth" = [])),
    params(ListMerchantsQuery),
    responses(
        (status = 200, description = "List merchants", body = StdResponse<Vec<MerchantView>, String>)
    )
)]
async fn get_merchants(
    State(state): State<AppState>,
    Query(query): Query<ListMerchantsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let mut list = merchants::table.left_join(categories::table).into_boxed();
    if let Some(status) = &query.subscription_status {
        list = list.filter(merchants::subscription_status.eq(status.clone()));
    }

    let rows: Vec<MerchantRow> = list
        .order_by(merchants::created_at.desc())
        .select((MerchantEntity::as_select(), categories::name.nullable()))
        .get_results(conn)
        .await
        .context("Failed to get merchants")?;

    Ok(StdResponse {
        data: Some(rows.into_iter().map(into_view).collect::<Vec<_>>()),
        message: Some("Get merchants successfully"),
    })
}

/// Fetch one merchant (admin).
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Merchants"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Merchant ID to fetch")),
    responses(
        (status = 200, description = "Get merchant successfully", body = StdResponse<MerchantView, String>)
    )
)]
async fn get_merchant(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let merchant = fetch_merchant_view(conn, id).await?;

    Ok(StdResponse {
        data: Some(merchant),
        message: Some("Get merchant successfully"),
    })
}

/// The authenticated merchant's own profile.
#[utoipa::path(
    get,
    path = "/my/profile",
    tags = ["Merchants"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Get merchant profile successfully", body = StdResponse<MerchantView, String>)
    )
)]
async fn get_my_profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let row: Option<MerchantRow> = merchants::table
        .left_join(categories::table)
        .filter(merchants::user_id.eq(user.id))
        .select((MerchantEntity::as_select(), categories::name.nullable()))
        .first(conn)
        .await
        .optional()
        .context("Failed to get merchant profile")?;
    let merchant = row.map(into_view).ok_or(AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(merchant),
        message: Some("Get merchant profile successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct CreateMerchantReq {
    user_id: i32,
    business_name: String,
    category_id: Option<i32>,
}

/// Register a merchant profile for a gateway user (admin). The profile starts
/// unverified with an inactive subscription, so it stays invisible to the
/// public catalog until verification and a completed payment.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Merchants"],
    security(("bearerAuth" = [])),
    request_body = CreateMerchantReq,
    responses(
        (status = 201, description = "Merchant created successfully", body = StdResponse<MerchantView, String>),
        (status = 400, description = "Invalid profile or duplicate user")
    )
)]
async fn create_merchant(
    State(state): State<AppState>,
    Json(body): Json<CreateMerchantReq>,
) -> Result<impl IntoResponse, AppError> {
    validate_business_name(&body.business_name)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let existing: Option<i32> = merchants::table
        .filter(merchants::user_id.eq(body.user_id))
        .select(merchants::id)
        .first(conn)
        .await
        .optional()
        .context("Failed to check for existing merchant")?;
    if existing.is_some() {
        return Err(AppError::BadRequest(
            "User already has a merchant profile".into(),
        ));
    }

    let merchant: MerchantEntity = diesel::insert_into(merchants::table)
        .values(CreateMerchantEntity {
            user_id: body.user_id,
            business_name: body.business_name,
            category_id: body.category_id,
        })
        .returning(MerchantEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to create merchant")?;

    let view = fetch_merchant_view(conn, merchant.id).await?;

    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(view),
            message: Some("Merchant created successfully"),
        },
    ))
}

#[derive(Deserialize, ToSchema)]
struct UpdateMerchantReq {
    business_name: String,
    category_id: Option<i32>,
    subscription_status: Option<String>,
    is_verified: Option<bool>,
    is_active: Option<bool>,
}

/// Full merchant update (admin). Gate fields changed here affect public
/// catalog visibility, so the product caches are invalidated.
#[utoipa::path(
    put,
    path = "/{id}",
    tags = ["Merchants"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Merchant ID to update")),
    request_body = UpdateMerchantReq,
    responses(
        (status = 200, description = "Merchant updated successfully", body = StdResponse<MerchantView, String>)
    )
)]
async fn update_merchant(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Json(body): Json<UpdateMerchantReq>,
) -> Result<impl IntoResponse, AppError> {
    validate_business_name(&body.business_name)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let current: MerchantEntity = merchants::table
        .find(id)
        .select(MerchantEntity::as_select())
        .first(conn)
        .await?;

    diesel::update(merchants::table.find(id))
        .set((
            merchants::business_name.eq(body.business_name),
            merchants::category_id.eq(body.category_id),
            merchants::subscription_status.eq(body
                .subscription_status
                .unwrap_or(current.subscription_status)),
            merchants::is_verified.eq(body.is_verified.unwrap_or(current.is_verified)),
            merchants::is_active.eq(body.is_active.unwrap_or(current.is_active)),
            merchants::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)
        .await
        .context("Failed to update merchant")?;

    let view = fetch_merchant_view(conn, id).await?;

    invalidate_catalog(&state, conn, id).await?;

    Ok(StdResponse {
        data: Some(view),
        message: Some("Merchant updated successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct UpdateMyProfileReq {
    business_name: String,
    category_id: Option<i32>,
}

/// Update the authenticated merchant's own profile. Gate fields are not
/// touchable from here.
#[utoipa::path(
    put,
    path = "/my/profile",
    tags = ["Merchants"],
    security(("bearerAuth" = [])),
    request_body = UpdateMyProfileReq,
    responses(
        (status = 200, description = "Merchant profile updated successfully", body = StdResponse<MerchantView, String>)
    )
)]
async fn update_my_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<UpdateMyProfileReq>,
) -> Result<impl IntoResponse, AppError> {
    validate_business_name(&body.business_name)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let merchant: MerchantEntity = diesel::update(
        merchants::table.filter(merchants::user_id.eq(user.id)),
    )
    .set((
        merchants::business_name.eq(body.business_name),
        merchants::category_id.eq(body.category_id),
        merchants::updated_at.eq(diesel::dsl::now),
    ))
    .returning(MerchantEntity::as_returning())
    .get_result(conn)
    .await?;

    let view = fetch_merchant_view(conn, merchant.id).await?;

    Ok(StdResponse {
        data: Some(view),
        message: Some("Merchant profile updated successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct VerifyMerchantReq {
    is_verified: bool,
}

/// Verify or unverify a merchant (admin). Flips one side of the public
/// visibility gate.
#[utoipa::path(
    put,
    path = "/{id}/verify",
    tags = ["Merchants"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Merchant ID to verify")),
    request_body = VerifyMerchantReq,
    responses(
        (status = 200, description = "Merchant verification updated", body = StdResponse<MerchantEntity, String>)
    )
)]
async fn verify_merchant(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Json(body): Json<VerifyMerchantReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let merchant: MerchantEntity = diesel::update(merchants::table.find(id))
        .set((
            merchants::is_verified.eq(body.is_verified),
            merchants::updated_at.eq(diesel::dsl::now),
        ))
        .returning(MerchantEntity::as_returning())
        .get_result(conn)
        .await?;

    invalidate_catalog(&state, conn, id).await?;

    tracing::info!(
        "Merchant {} {}",
        merchant.id,
        if merchant.is_verified {
            "verified"
        } else {
            "unverified"
        }
    );

    Ok(StdResponse {
        data: Some(merchant),
        message: Some("Merchant verification updated successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct MerchantStatusReq {
    is_active: bool,
}

/// Activate or deactivate a merchant (admin).
#[utoipa::path(
    put,
    path = "/{id}/status",
    tags = ["Merchants"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Merchant ID to update")),
    request_body = MerchantStatusReq,
    responses(
        (status = 200, description = "Merchant status updated", body = StdResponse<MerchantEntity, String>)
    )
)]
async fn update_merchant_status(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Json(body): Json<MerchantStatusReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let merchant: MerchantEntity = diesel::update(merchants::table.find(id))
        .set((
            merchants::is_active.eq(body.is_active),
            merchants::updated_at.eq(diesel::dsl::now),
        ))
        .returning(MerchantEntity::as_returning())
        .get_result(conn)
        .await?;

    invalidate_catalog(&state, conn, id).await?;

    Ok(StdResponse {
        data: Some(merchant),
        message: Some("Merchant status updated successfully"),
    })
}

/// Delete a merchant and its catalog (admin). Merchants with order history
/// cannot be deleted; deactivate them instead so the history stays intact.
#[utoipa::path(
    delete,
    path = "/{id}",
    tags = ["Merchants"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Merchant ID to delete")),
    responses(
        (status = 200, description = "Merchant deleted successfully", body = StdResponse<String, String>),
        (status = 400, description = "Merchant has order history")
    )
)]
async fn delete_merchant(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let product_ids = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let order_count: i64 = orders::table
                    .filter(orders::merchant_id.eq(id))
                    .count()
                    .get_result(conn)
                    .await
                    .context("Failed to count merchant orders")?;
                if order_count > 0 {
                    return Err(AppError::BadRequest(
                        "Merchant has order history and cannot be deleted; deactivate it instead"
                            .into(),
                    ));
                }

                let product_ids: Vec<i32> = merchant_products::table
                    .filter(merchant_products::merchant_id.eq(id))
                    .select(merchant_products::id)
                    .get_results(conn)
                    .await
                    .context("Failed to get merchant products")?;

                diesel::delete(
                    cart_items::table.filter(cart_items::merchant_product_id.eq_any(&product_ids)),
                )
                .execute(conn)
                .await
                .context("Failed to delete cart entries")?;

                diesel::delete(
                    merchant_products::table.filter(merchant_products::merchant_id.eq(id)),
                )
                .execute(conn)
                .await
                .context("Failed to delete merchant products")?;

                diesel::delete(
                    subscription_payments::table.filter(subscription_payments::merchant_id.eq(id)),
                )
                .execute(conn)
                .await
                .context("Failed to delete subscription payments")?;

                let deleted = diesel::delete(merchants::table.find(id))
                    .execute(conn)
                    .await
                    .context("Failed to delete merchant")?;
                if deleted == 0 {
                    return Err(AppError::NotFound);
                }

                Ok::<Vec<i32>, AppError>(product_ids)
            })
        })
        .await?;

    for pattern in merchant_catalog_patterns(id) {
        cache::invalidate_pattern(&state.cache, &pattern).await;
    }
    for product_id in product_ids {
        cache::invalidate_pattern(&state.cache, &format!("product:{product_id}")).await;
    }

    Ok(StdResponse::<(), _> {
        data: None,
        message: Some("Merchant deleted successfully"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_business_names_are_rejected() {
        assert!(validate_business_name("").is_err());
        assert!(validate_business_name("   ").is_err());
        assert!(validate_business_name("Corner Grocery").is_ok());
    }
}
