use anyhow::Context;
use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    cache::{self, DETAIL_TTL, LIST_TTL},
    middleware,
    models::{CategoryEntity, CreateCategoryEntity},
    schema::categories,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/categories",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_categories))
            .routes(utoipa_axum::routes!(get_category))
            .merge(
                OpenApiRouter::new()
                    .routes(utoipa_axum::routes!(create_category))
                    .routes(utoipa_axum::routes!(update_category))
                    .routes(utoipa_axum::routes!(delete_category))
                    .route_layer(axum::middleware::from_fn(middleware::admin_authorization)),
            ),
    )
}

#[derive(Deserialize, IntoParams)]
struct ListCategoriesQuery {
    active_only: Option<bool>,
}

impl ListCategoriesQuery {
    fn cache_key(&self) -> &'static str {
        if self.active_only.unwrap_or(false) {
            "categories:active"
        } else {
            "categories:all"
        }
    }
}

/// List categories, optionally restricted to active ones.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Categories"],
    params(ListCategoriesQuery),
    responses(
        (status = 200, description = "List categories", body = StdResponse<Vec<CategoryEntity>, String>)
    )
)]
async fn get_categories(
    State(state): State<AppState>,
    Query(query): Query<ListCategoriesQuery>,
) -> Result<impl IntoResponse, AppError> {
    let categories = cache::get_cached(&state.cache, query.cache_key(), LIST_TTL, || async {
        let conn = &mut state
            .db_pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        let mut list = categories::table.into_boxed();
        if query.active_only.unwrap_or(false) {
            list = list.filter(categories::is_active.eq(true));
        }

        let categories: Vec<CategoryEntity> = list
            .order_by(categories::name.asc())
            .select(CategoryEntity::as_select())
            .get_results(conn)
            .await
            .context("Failed to get categories")?;
        Ok(categories)
    })
    .await?;

    Ok(StdResponse {
        data: Some(categories),
        message: Some("Get categories successfully"),
    })
}

/// Fetch a single category.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Categories"],
    params(("id" = i32, Path, description = "Category ID to fetch")),
    responses(
        (status = 200, description = "Get category successfully", body = StdResponse<CategoryEntity, String>)
    )
)]
async fn get_category(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let category = cache::get_cached(&state.cache, &format!("category:{id}"), DETAIL_TTL, || async {
        let conn = &mut state
            .db_pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        categories::table
            .find(id)
            .select(CategoryEntity::as_select())
            .first(conn)
            .await
            .optional()
            .context("Failed to get category")?
            .ok_or(AppError::NotFound)
    })
    .await?;

    Ok(StdResponse {
        data: Some(category),
        message: Some("Get category successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct CategoryReq {
    name: String,
    description: Option<String>,
    is_active: Option<bool>,
}

/// Create a new category (admin).
#[utoipa::path(
    post,
    path = "/",
    tags = ["Categories"],
    security(("bearerAuth" = [])),
    request_body = CategoryReq,
    responses(
        (status = 200, description = "Created category successfully", body = StdResponse<CategoryEntity, String>)
    )
)]
async fn create_category(
    State(state): State<AppState>,
    Json(body): Json<CategoryReq>,
) -> Result<impl IntoResponse, AppError> {
    if body.name.trim().is_empty() {
        return Err(AppError::BadRequest("Name is required".into()));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let category: CategoryEntity = diesel::insert_into(categories::table)
        .values(CreateCategoryEntity {
            name: body.name,
            description: body.description,
            is_active: body.is_active.unwrap_or(true),
        })
        .returning(CategoryEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to create category")?;

    cache::invalidate_pattern(&state.cache, "categories:*").await;

    Ok(StdResponse {
        data: Some(category),
        message: Some("Category created successfully"),
    })
}

/// Update a category (admin).
#[utoipa::path(
    put,
    path = "/{id}",
    tags = ["Categories"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Category ID to update")),
    request_body = CategoryReq,
    responses(
        (status = 200, description = "Updated category successfully", body = StdResponse<CategoryEntity, String>)
    )
)]
async fn update_category(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Json(body): Json<CategoryReq>,
) -> Result<impl IntoResponse, AppError> {
    if body.name.trim().is_empty() {
        return Err(AppError::BadRequest("Name is required".into()));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let category: CategoryEntity = diesel::update(categories::table.find(id))
        .set((
            categories::name.eq(body.name),
            categories::description.eq(body.description),
            categories::is_active.eq(body.is_active.unwrap_or(true)),
            categories::updated_at.eq(diesel::dsl::now),
        ))
        .returning(CategoryEntity::as_returning())
        .get_result(conn)
        .await?;

    cache::invalidate_pattern(&state.cache, "categories:*").await;
    cache::invalidate_pattern(&state.cache, &format!("category:{id}")).await;

    Ok(StdResponse {
        data: Some(category),
        message: Some("Category updated successfully"),
    })
}

/// Delete a category (admin).
#[utoipa::path(
    delete,
    path = "/{id}",
    tags = ["Categories"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Category ID to delete")),
    responses(
        (status = 200, description = "Deleted category successfully", body = StdResponse<String, String>)
    )
)]
async fn delete_category(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let deleted = diesel::delete(categories::table.find(id))
        .execute(conn)
        .await
        .context("Failed to delete category")?;
    if deleted == 0 {
        return Err(AppError::NotFound);
    }

    cache::invalidate_pattern(&state.cache, "categories:*").await;
    cache::invalidate_pattern(&state.cache, &format!("category:{id}")).await;

    Ok(StdResponse::<(), _> {
        data: None,
        message: Some("Category deleted successfully"),
    })
}
