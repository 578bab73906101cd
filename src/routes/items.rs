use anyhow::Context;
use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use diesel::{
    ExpressionMethods, NullableExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper,
};
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    cache::{self, DETAIL_TTL, LIST_TTL},
    middleware,
    models::{CreateItemMasterEntity, ItemMasterEntity},
    routes::key_segment,
    schema::{categories, items_master},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/items",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_items))
            .routes(utoipa_axum::routes!(get_item))
            .merge(
                OpenApiRouter::new()
                    .routes(utoipa_axum::routes!(create_item))
                    .route_layer(axum::middleware::from_fn(middleware::staff_authorization)),
            )
            .merge(
                OpenApiRouter::new()
                    .routes(utoipa_axum::routes!(update_item))
                    .routes(utoipa_axum::routes!(delete_item))
                    .route_layer(axum::middleware::from_fn(middleware::admin_authorization)),
            ),
    )
}

/// Catalog item joined to its category name.
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ItemView {
    #[serde(flatten)]
    pub item: ItemMasterEntity,
    pub category_name: Option<String>,
}

#[derive(Deserialize, IntoParams)]
struct ListItemsQuery {
    category_id: Option<i32>,
    active_only: Option<bool>,
}

impl ListItemsQuery {
    fn cache_key(&self) -> String {
        format!(
            "items:{}:{}",
            key_segment(self.category_id.as_ref()),
            if self.active_only.unwrap_or(false) {
                "active"
            } else {
                "all"
            }
        )
    }
}

/// List catalog items, filterable by category and active flag.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Items"],
    params(ListItemsQuery),
    responses(
        (status = 200, description = "List catalog items", body = StdResponse<Vec<ItemView>, String>)
    )
)]
async fn get_items(
    State(state): State<AppState>,
    Query(query): Query<ListItemsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let items = cache::get_cached(&state.cache, &query.cache_key(), LIST_TTL, || async {
        let conn = &mut state
            .db_pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        let mut list = items_master::table
            .left_join(categories::table)
            .into_boxed();
        if let Some(category_id) = query.category_id {
            list = list.filter(items_master::category_id.eq(category_id));
        }
        if query.active_only.unwrap_or(false) {
            list = list.filter(items_master::is_active.eq(true));
        }

        let rows: Vec<(ItemMasterEntity, Option<String>)> = list
            .order_by(items_master::name.asc())
            .select((ItemMasterEntity::as_select(), categories::name.nullable()))
            .get_results(conn)
            .await
            .context("Failed to get items")?;

        Ok(rows
            .into_iter()
            .map(|(item, category_name)| ItemView {
                item,
                category_name,
            })
            .collect::<Vec<_>>())
    })
    .await?;

    Ok(StdResponse {
        data: Some(items),
        message: Some("Get items successfully"),
    })
}

/// Fetch a single catalog item.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Items"],
    params(("id" = i32, Path, description = "Item ID to fetch")),
    responses(
        (status = 200, description = "Get item successfully", body = StdResponse<ItemView, String>)
    )
)]
async fn get_item(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let item = cache::get_cached(&state.cache, &format!("item:{id}"), DETAIL_TTL, || async {
        let conn = &mut state
            .db_pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        let row: Option<(ItemMasterEntity, Option<String>)> = items_master::table
            .left_join(categories::table)
            .filter(items_master::id.eq(id))
            .select((ItemMasterEntity::as_select(), categories::name.nullable()))
            .first(conn)
            .await
            .optional()
            .context("Failed to get item")?;

        row.map(|(item, category_name)| ItemView {
            item,
            category_name,
        })
        .ok_or(AppError::NotFound)
    })
    .await?;

    Ok(StdResponse {
        data: Some(item),
        message: Some("Get item successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct ItemReq {
    category_id: i32,
    name: String,
    description: Option<String>,
    base_price: Option<f64>,
    unit: Option<String>,
    is_active: Option<bool>,
}

/// Create a catalog item (merchant or admin).
#[utoipa::path(
    post,
    path = "/",
    tags = ["Items"],
    security(("bearerAuth" = [])),
    request_body = ItemReq,
    responses(
        (status = 200, description = "Created item successfully", body = StdResponse<ItemMasterEntity, String>)
    )
)]
async fn create_item(
    State(state): State<AppState>,
    Json(body): Json<ItemReq>,
) -> Result<impl IntoResponse, AppError> {
    if body.name.trim().is_empty() {
        return Err(AppError::BadRequest("Category and name are required".into()));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let item: ItemMasterEntity = diesel::insert_into(items_master::table)
        .values(CreateItemMasterEntity {
            category_id: body.category_id,
            name: body.name,
            description: body.description,
            base_price: body.base_price,
            unit: body.unit,
            is_active: body.is_active.unwrap_or(true),
        })
        .returning(ItemMasterEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to create item")?;

    cache::invalidate_pattern(&state.cache, "items:*").await;

    Ok(StdResponse {
        data: Some(item),
        message: Some("Item created successfully"),
    })
}

/// Update a catalog item (admin).
#[utoipa::path(
    put,
    path = "/{id}",
    tags = ["Items"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Item ID to update")),
    request_body = ItemReq,
    responses(
        (status = 200, description = "Updated item successfully", body = StdResponse<ItemMasterEntity, String>)
    )
)]
async fn update_item(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Json(body): Json<ItemReq>,
) -> Result<impl IntoResponse, AppError> {
    if body.name.trim().is_empty() {
        return Err(AppError::BadRequest("Category and name are required".into()));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let item: ItemMasterEntity = diesel::update(items_master::table.find(id))
        .set((
            items_master::category_id.eq(body.category_id),
            items_master::name.eq(body.name),
            items_master::description.eq(body.description),
            items_master::base_price.eq(body.base_price),
            items_master::unit.eq(body.unit),
            items_master::is_active.eq(body.is_active.unwrap_or(true)),
            items_master::updated_at.eq(diesel::dsl::now),
        ))
        .returning(ItemMasterEntity::as_returning())
        .get_result(conn)
        .await?;

    cache::invalidate_pattern(&state.cache, "items:*").await;
    cache::invalidate_pattern(&state.cache, &format!("item:{id}")).await;

    Ok(StdResponse {
        data: Some(item),
        message: Some("Item updated successfully"),
    })
}

/// Delete a catalog item (admin).
#[utoipa::path(
    delete,
    path = "/{id}",
    tags = ["Items"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Item ID to delete")),
    responses(
        (status = 200, description = "Deleted item successfully", body = StdResponse<String, String>)
    )
)]
async fn delete_item(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let deleted = diesel::delete(items_master::table.find(id))
        .execute(conn)
        .await
        .context("Failed to delete item")?;
    if deleted == 0 {
        return Err(AppError::NotFound);
    }

    cache::invalidate_pattern(&state.cache, "items:*").await;
    cache::invalidate_pattern(&state.cache, &format!("item:{id}")).await;

    Ok(StdResponse::<(), _> {
        data: None,
        message: Some("Item deleted successfully"),
    })
}
