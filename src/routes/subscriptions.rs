use anyhow::Context;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::NaiveDate;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    cache,
    middleware::{self, AuthUser},
    models::{CreateSubscriptionPaymentEntity, SubscriptionPaymentEntity},
    routes::{merchant_catalog_patterns, merchant_id_for_user},
    schema::{merchants, subscription_payments},
};

pub const PAYMENT_STATUS_COMPLETED: &str = "completed";

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/subscriptions",
        OpenApiRouter::new()
            .merge(
                OpenApiRouter::new()
                    .routes(utoipa_axum::routes!(get_my_subscriptions))
                    .route_layer(axum::middleware::from_fn(middleware::merchant_authorization)),
            )
            .merge(
                OpenApiRouter::new()
                    .routes(utoipa_axum::routes!(get_subscriptions))
                    .routes(utoipa_axum::routes!(create_subscription))
                    .routes(utoipa_axum::routes!(get_subscription))
                    .routes(utoipa_axum::routes!(update_subscription))
                    .routes(utoipa_axum::routes!(delete_subscription))
                    .route_layer(axum::middleware::from_fn(middleware::admin_authorization)),
            ),
    )
}

/// A payment that moved into `completed` activates the merchant's
/// subscription; one that was already completed does not re-activate.
fn should_activate(new_status: &str, old_status: Option<&str>) -> bool {
    new_status == PAYMENT_STATUS_COMPLETED && old_status != Some(PAYMENT_STATUS_COMPLETED)
}

/// Mirror a completed payment onto the merchant row: mark the subscription
/// active and stamp the paid window and amount.
async fn activate_merchant_subscription(
    conn: &mut AsyncPgConnection,
    payment: &SubscriptionPaymentEntity,
) -> Result<(), AppError> {
    diesel::update(merchants::table.find(payment.merchant_id))
        .set((
            merchants::subscription_status.eq("active"),
            merchants::subscription_start_date.eq(Some(payment.subscription_start_date)),
            merchants::subscription_end_date.eq(Some(payment.subscription_end_date)),
            merchants::subscription_amount.eq(Some(payment.amount)),
            merchants::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)
        .await
        .context("Failed to activate merchant subscription")?;
    Ok(())
}

/// Subscription payment joined to the merchant's display name.
#[derive(Serialize, ToSchema)]
pub struct SubscriptionView {
    #[serde(flatten)]
    pub payment: SubscriptionPaymentEntity,
    pub merchant_name: String,
}

#[derive(Deserialize, IntoParams)]
struct ListSubscriptionsQuery {
    payment_status: Option<String>,
    merchant_id: Option<i32>,
}

/// List all subscription payments (admin).
#[utoipa::path(
    get,
    path = "/",
    tags = ["Subscriptions"],
    security(("bearerAuth" = [])),
    params(ListSubscriptionsQuery),
    responses(
        (status = 200, description = "List subscription payments", body = StdResponse<Vec<SubscriptionView>, String>)
    )
)]
async fn get_subscriptions(
    State(state): State<AppState>,
    Query(query): Query<ListSubscriptionsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let mut list = subscription_payments::table
        .inner_join(merchants::table)
        .into_boxed();
    if let Some(status) = &query.payment_status {
        list = list.filter(subscription_payments::payment_status.eq(status.clone()));
    }
    if let Some(merchant_id) = query.merchant_id {
        list = list.filter(subscription_payments::merchant_id.eq(merchant_id));
    }

    let rows: Vec<(SubscriptionPaymentEntity, String)> = list
        .order_by(subscription_payments::created_at.desc())
        .select((
            SubscriptionPaymentEntity::as_select(),
            merchants::business_name,
        ))
        .get_results(conn)
        .await
        .context("Failed to get subscription payments")?;

    let subscriptions: Vec<SubscriptionView> = rows
        .into_iter()
        .map(|(payment, merchant_name)| SubscriptionView {
            payment,
            merchant_name,
        })
        .collect();

    Ok(StdResponse {
        data: Some(subscriptions),
        message: Some("Get subscription payments successfully"),
    })
}

/// Payment history for the authenticated merchant.
#[utoipa::path(
    get,
    path = "/my",
    tags = ["Subscriptions"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List my subscription payments", body = StdResponse<Vec<SubscriptionPaymentEntity>, String>)
    )
)]
async fn get_my_subscriptions(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;
    let merchant_id = merchant_id_for_user(conn, user.id).await?;

    let payments: Vec<SubscriptionPaymentEntity> = subscription_payments::table
        .filter(subscription_payments::merchant_id.eq(merchant_id))
        .order_by(subscription_payments::created_at.desc())
        .select(SubscriptionPaymentEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get my subscription payments")?;

    Ok(StdResponse {
        data: Some(payments),
        message: Some("Get my subscription payments successfully"),
    })
}

/// Fetch one subscription payment (admin).
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Subscriptions"],
    security(("bearerAuth" = [])),
    params(("id" = Uuid, Path, description = "Subscription payment ID")),
    responses(
        (status = 200, description = "Get subscription payment successfully", body = StdResponse<SubscriptionView, String>)
    )
)]
async fn get_subscription(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let row: Option<(SubscriptionPaymentEntity, String)> = subscription_payments::table
        .inner_join(merchants::table)
        .filter(subscription_payments::id.eq(id))
        .select((
            SubscriptionPaymentEntity::as_select(),
            merchants::business_name,
        ))
        .first(conn)
        .await
        .optional()
        .context("Failed to get subscription payment")?;
    let (payment, merchant_name) = row.ok_or(AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(SubscriptionView {
            payment,
            merchant_name,
        }),
        message: Some("Get subscription payment successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct CreateSubscriptionReq {
    merchant_id: i32,
    amount: f64,
    payment_method: String,
    payment_status: Option<String>,
    transaction_id: Option<String>,
    payment_date: Option<NaiveDate>,
    subscription_start_date: NaiveDate,
    subscription_end_date: NaiveDate,
    notes: Option<String>,
}

/// Record a subscription payment for a merchant. A payment created in the
/// `completed` state activates the merchant's subscription in the same
/// transaction.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Subscriptions"],
    security(("bearerAuth" = [])),
    request_body = CreateSubscriptionReq,
    responses(
        (status = 201, description = "Subscription payment created successfully", body = StdResponse<SubscriptionPaymentEntity, String>),
        (status = 400, description = "Invalid payment")
    )
)]
async fn create_subscription(
    State(state): State<AppState>,
    Json(body): Json<CreateSubscriptionReq>,
) -> Result<impl IntoResponse, AppError> {
    if body.amount <= 0.0 {
        return Err(AppError::BadRequest("Amount must be positive".into()));
    }
    if body.subscription_end_date <= body.subscription_start_date {
        return Err(AppError::BadRequest(
            "Subscription end date must be after the start date".into(),
        ));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let (payment, activated) = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let merchant_exists: Option<i32> = merchants::table
                    .find(body.merchant_id)
                    .select(merchants::id)
                    .first(conn)
                    .await
                    .optional()
                    .context("Failed to look up merchant")?;
                if merchant_exists.is_none() {
                    return Err(AppError::BadRequest("Merchant not found".into()));
                }

                let payment: SubscriptionPaymentEntity =
                    diesel::insert_into(subscription_payments::table)
                        .values(CreateSubscriptionPaymentEntity {
                            merchant_id: body.merchant_id,
                            amount: body.amount,
                            payment_method: body.payment_method,
                            payment_status: body
                                .payment_status
                                .unwrap_or_else(|| "pending".to_string()),
                            transaction_id: body.transaction_id,
                            payment_date: body.payment_date,
                            subscription_start_date: body.subscription_start_date,
                            subscription_end_date: body.subscription_end_date,
                            notes: body.notes,
                        })
                        .returning(SubscriptionPaymentEntity::as_returning())
                        .get_result(conn)
                        .await
                        .context("Failed to create subscription payment")?;

                let activated = should_activate(&payment.payment_status, None);
                if activated {
                    activate_merchant_subscription(conn, &payment).await?;
                }

                Ok::<(SubscriptionPaymentEntity, bool), AppError>((payment, activated))
            })
        })
        .await?;

    tracing::info!(
        "Subscription payment {} recorded for merchant {}",
        payment.id,
        payment.merchant_id
    );

    // Activation flips the public visibility gate; the cached catalog must
    // not keep hiding the merchant's products.
    if activated {
        for pattern in merchant_catalog_patterns(payment.merchant_id) {
            cache::invalidate_pattern(&state.cache, &pattern).await;
        }
    }

    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(payment),
            message: Some("Subscription payment created successfully"),
        },
    ))
}

#[derive(Deserialize, ToSchema)]
struct UpdateSubscriptionReq {
    amount: Option<f64>,
    payment_method: Option<String>,
    payment_status: Option<String>,
    transaction_id: Option<String>,
    payment_date: Option<NaiveDate>,
    subscription_start_date: Option<NaiveDate>,
    subscription_end_date: Option<NaiveDate>,
    notes: Option<String>,
}

/// Update a subscription payment. Moving the payment into `completed`
/// activates the merchant's subscription, exactly as on create.
#[utoipa::path(
    put,
    path = "/{id}",
    tags = ["Subscriptions"],
    security(("bearerAuth" = [])),
    params(("id" = Uuid, Path, description = "Subscription payment ID")),
    request_body = UpdateSubscriptionReq,
    responses(
        (status = 200, description = "Subscription payment updated successfully", body = StdResponse<SubscriptionPaymentEntity, String>),
        (status = 400, description = "Invalid payment")
    )
)]
async fn update_subscription(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<UpdateSubscriptionReq>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(amount) = body.amount {
        if amount <= 0.0 {
            return Err(AppError::BadRequest("Amount must be positive".into()));
        }
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let (payment, activated) = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let current: SubscriptionPaymentEntity = subscription_payments::table
                    .find(id)
                    .select(SubscriptionPaymentEntity::as_select())
                    .first(conn)
                    .await?;

                let start_date = body
                    .subscription_start_date
                    .unwrap_or(current.subscription_start_date);
                let end_date = body
                    .subscription_end_date
                    .unwrap_or(current.subscription_end_date);
                if end_date <= start_date {
                    return Err(AppError::BadRequest(
                        "Subscription end date must be after the start date".into(),
                    ));
                }

                let updated: SubscriptionPaymentEntity =
                    diesel::update(subscription_payments::table.find(id))
                        .set((
                            subscription_payments::amount
                                .eq(body.amount.unwrap_or(current.amount)),
                            subscription_payments::payment_method.eq(body
                                .payment_method
                                .clone()
                                .unwrap_or_else(|| current.payment_method.clone())),
                            subscription_payments::payment_status.eq(body
                                .payment_status
                                .clone()
                                .unwrap_or_else(|| current.payment_status.clone())),
                            subscription_payments::transaction_id
                                .eq(body.transaction_id.clone().or(current.transaction_id.clone())),
                            subscription_payments::payment_date
                                .eq(body.payment_date.or(current.payment_date)),
                            subscription_payments::subscription_start_date.eq(start_date),
                            subscription_payments::subscription_end_date.eq(end_date),
                            subscription_payments::notes
                                .eq(body.notes.clone().or(current.notes.clone())),
                            subscription_payments::updated_at.eq(diesel::dsl::now),
                        ))
                        .returning(SubscriptionPaymentEntity::as_returning())
                        .get_result(conn)
                        .await
                        .context("Failed to update subscription payment")?;

                let activated =
                    should_activate(&updated.payment_status, Some(&current.payment_status));
                if activated {
                    activate_merchant_subscription(conn, &updated).await?;
                }

                Ok::<(SubscriptionPaymentEntity, bool), AppError>((updated, activated))
            })
        })
        .await?;

    if activated {
        for pattern in merchant_catalog_patterns(payment.merchant_id) {
            cache::invalidate_pattern(&state.cache, &pattern).await;
        }
    }

    Ok(StdResponse {
        data: Some(payment),
        message: Some("Subscription payment updated successfully"),
    })
}

/// Delete a subscription payment record (admin).
#[utoipa::path(
    delete,
    path = "/{id}",
    tags = ["Subscriptions"],
    security(("bearerAuth" = [])),
    params(("id" = Uuid, Path, description = "Subscription payment ID")),
    responses(
        (status = 200, description = "Subscription payment deleted successfully", body = StdResponse<SubscriptionPaymentEntity, String>)
    )
)]
async fn delete_subscription(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let payment: SubscriptionPaymentEntity =
        diesel::delete(subscription_payments::table.find(id))
            .returning(SubscriptionPaymentEntity::as_returning())
            .get_result(conn)
            .await?;

    Ok(StdResponse {
        data: Some(payment),
        message: Some("Subscription payment deleted successfully"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_completed_payment_activates() {
        assert!(should_activate("completed", None));
    }

    #[test]
    fn transition_into_completed_activates() {
        assert!(should_activate("completed", Some("pending")));
        assert!(should_activate("completed", Some("failed")));
    }

    #[test]
    fn already_completed_payment_does_not_reactivate() {
        assert!(!should_activate("completed", Some("completed")));
    }

    #[test]
    fn non_completed_statuses_never_activate() {
        assert!(!should_activate("pending", None));
        assert!(!should_activate("failed", Some("pending")));
        assert!(!should_activate("refunded", Some("completed")));
    }
}
