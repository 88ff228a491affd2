//! Persistence seam for the category hierarchy.
//!
//! The service never talks to a database directly. It receives an
//! `Arc<dyn CategoryRepository>` at construction and runs every unit of work
//! through a [`CategoryTransaction`]. A transaction that is dropped without
//! [`CategoryTransaction::commit`] is rolled back.

mod memory;
mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::features::categories::models::{Category, CategoryChanges, NewCategory};

pub use memory::InMemoryCategoryRepository;
pub use postgres::PgCategoryRepository;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Integrity constraint rejected the write (not-null, check, unique, foreign key)
    #[error("{0}")]
    Constraint(String),

    #[error("Category with id {id} was modified concurrently (expected version {expected})")]
    StaleVersion { id: i32, expected: i32 },

    #[error("{0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            // SQLSTATE class 23 covers every integrity constraint violation
            if db_err.code().is_some_and(|code| code.starts_with("23")) {
                return StoreError::Constraint(db_err.message().to_string());
            }
        }
        StoreError::Database(e)
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait CategoryRepository: Send + Sync {
    /// Every stored category, ordered by id
    async fn find_all(&self) -> StoreResult<Vec<Category>>;

    /// Open a unit of work
    async fn begin(&self) -> StoreResult<Box<dyn CategoryTransaction>>;
}

#[async_trait]
pub trait CategoryTransaction: Send {
    async fn find_by_id(&mut self, id: i32) -> StoreResult<Option<Category>>;

    /// Insert and flush, so constraint violations surface here
    async fn insert(&mut self, category: NewCategory) -> StoreResult<Category>;

    /// Overwrite the row with `id`, bumping its version
    async fn merge(&mut self, id: i32, changes: CategoryChanges) -> StoreResult<Category>;

    /// Returns whether a row was removed
    async fn delete(&mut self, id: i32) -> StoreResult<bool>;

    async fn has_children(&mut self, id: i32) -> StoreResult<bool>;

    /// Direct children of `id`, ordered by id
    async fn find_children(&mut self, id: i32) -> StoreResult<Vec<Category>>;

    /// Serialize hierarchy changes until this transaction ends. Must be taken
    /// before reading the ancestor chain that a re-parenting is checked against.
    async fn lock_hierarchy(&mut self) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
