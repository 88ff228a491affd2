#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use axum_test::TestServer;

#[cfg(test)]
use crate::features::categories::{repositories::InMemoryCategoryRepository, routes, CategoryService};

/// Category routes backed by a fresh in-memory store
#[cfg(test)]
pub fn category_test_server() -> TestServer {
    let repository = Arc::new(InMemoryCategoryRepository::new());
    let service = Arc::new(CategoryService::new(repository));
    TestServer::new(routes::routes(service)).expect("failed to start test server")
}
