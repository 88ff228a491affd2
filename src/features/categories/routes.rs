use std::sync::Arc;

use axum::{routing::get, Router};

use crate::features::categories::handlers;
use crate::features::categories::services::CategoryService;

/// Create routes for the categories admin resource
pub fn routes(service: Arc<CategoryService>) -> Router {
    Router::new()
        .route(
            "/api/admin/categories",
            get(handlers::list_categories).post(handlers::create_category),
        )
        .route("/api/admin/categories/tree", get(handlers::get_category_tree))
        .route(
            "/api/admin/categories/{category_id}",
            get(handlers::get_category)
                .put(handlers::update_category)
                .delete(handlers::delete_category),
        )
        .with_state(service)
}
