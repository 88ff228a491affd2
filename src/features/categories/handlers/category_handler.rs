use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use validator::Validate;

use crate::core::error::{AppError, Result};
use crate::core::extractor::AppJson;
use crate::features::categories::dtos::{
    CategoryPayloadDto, CategoryResponseDto, CategoryTreeDto,
};
use crate::features::categories::services::CategoryService;
use crate::shared::types::{ApiResponse, Meta};

/// List all categories
#[utoipa::path(
    get,
    path = "/api/admin/categories",
    responses(
        (status = 200, description = "List of categories", body = ApiResponse<Vec<CategoryResponseDto>>),
        (status = 500, description = "Backend unavailable")
    ),
    tag = "categories"
)]
pub async fn list_categories(
    State(service): State<Arc<CategoryService>>,
) -> Result<Json<ApiResponse<Vec<CategoryResponseDto>>>> {
    let categories = service.list_all().await?;
    let total = categories.len() as i64;

    Ok(Json(ApiResponse::success(
        Some(categories),
        None,
        Some(Meta { total }),
    )))
}

/// Get the whole category hierarchy
///
/// An empty store yields a tree without roots.
#[utoipa::path(
    get,
    path = "/api/admin/categories/tree",
    responses(
        (status = 200, description = "Category tree", body = ApiResponse<CategoryTreeDto>),
        (status = 500, description = "Backend unavailable")
    ),
    tag = "categories"
)]
pub async fn get_category_tree(
    State(service): State<Arc<CategoryService>>,
) -> Result<Json<ApiResponse<CategoryTreeDto>>> {
    let tree = service.get_tree().await?;
    Ok(Json(ApiResponse::success(Some(tree), None, None)))
}

/// Create a category
///
/// Responds with `Location: category/{id}` and no body.
#[utoipa::path(
    post,
    path = "/api/admin/categories",
    request_body = CategoryPayloadDto,
    responses(
        (status = 201, description = "Category created", headers(("Location" = String, description = "category/{id}"))),
        (status = 400, description = "Validation error or constraint violation"),
        (status = 409, description = "Id was already set")
    ),
    tag = "categories"
)]
pub async fn create_category(
    State(service): State<Arc<CategoryService>>,
    AppJson(dto): AppJson<CategoryPayloadDto>,
) -> Result<impl IntoResponse> {
    dto.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let id = service.create(dto).await?;

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("category/{}", id))],
    ))
}

/// Get a category by id
///
/// An unknown id answers 200 with `data: null`.
#[utoipa::path(
    get,
    path = "/api/admin/categories/{category_id}",
    params(
        ("category_id" = i32, Path, description = "Category ID")
    ),
    responses(
        (status = 200, description = "Category, or null when absent", body = ApiResponse<CategoryResponseDto>)
    ),
    tag = "categories"
)]
pub async fn get_category(
    State(service): State<Arc<CategoryService>>,
    Path(category_id): Path<i32>,
) -> Result<Json<ApiResponse<CategoryResponseDto>>> {
    let category = service.get_by_id(category_id).await?;
    Ok(Json(ApiResponse::success(category, None, None)))
}

/// Replace a category
#[utoipa::path(
    put,
    path = "/api/admin/categories/{category_id}",
    params(
        ("category_id" = i32, Path, description = "Category ID")
    ),
    request_body = CategoryPayloadDto,
    responses(
        (status = 200, description = "Merged category", body = ApiResponse<CategoryResponseDto>),
        (status = 400, description = "Validation error, unknown parent or cycle"),
        (status = 404, description = "Category not found"),
        (status = 409, description = "Version mismatch"),
        (status = 500, description = "Update failed")
    ),
    tag = "categories"
)]
pub async fn update_category(
    State(service): State<Arc<CategoryService>>,
    Path(category_id): Path<i32>,
    AppJson(dto): AppJson<CategoryPayloadDto>,
) -> Result<Json<ApiResponse<CategoryResponseDto>>> {
    dto.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let category = service.update(category_id, dto).await?;
    Ok(Json(ApiResponse::success(Some(category), None, None)))
}

/// Delete a category
#[utoipa::path(
    delete,
    path = "/api/admin/categories/{category_id}",
    params(
        ("category_id" = i32, Path, description = "Category ID")
    ),
    responses(
        (status = 204, description = "Category deleted (or already absent)"),
        (status = 409, description = "Category still has children"),
        (status = 500, description = "Deletion failed")
    ),
    tag = "categories"
)]
pub async fn delete_category(
    State(service): State<Arc<CategoryService>>,
    Path(category_id): Path<i32>,
) -> Result<StatusCode> {
    service.remove(category_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
