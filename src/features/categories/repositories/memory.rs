use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{CategoryRepository, CategoryTransaction, StoreError, StoreResult};
use crate::features::categories::models::{Category, CategoryChanges, NewCategory};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    rows: BTreeMap<i32, Category>,
    last_id: i32,
}

impl MemoryState {
    /// Same rules as the SQL schema: non-blank name, existing parent, no self
    /// parent, case-insensitive unique name among siblings
    fn check_constraints(
        &self,
        id: Option<i32>,
        parent_id: Option<i32>,
        name: &str,
    ) -> StoreResult<()> {
        if name.trim().is_empty() {
            return Err(StoreError::Constraint(
                "new row for relation \"categories\" violates check constraint \"categories_name_not_blank\"".to_string(),
            ));
        }

        if let Some(parent_id) = parent_id {
            if id == Some(parent_id) {
                return Err(StoreError::Constraint(
                    "new row for relation \"categories\" violates check constraint \"categories_not_own_parent\"".to_string(),
                ));
            }
            if !self.rows.contains_key(&parent_id) {
                return Err(StoreError::Constraint(
                    "insert or update on table \"categories\" violates foreign key constraint \"categories_parent_id_fkey\"".to_string(),
                ));
            }
        }

        let lowered = name.to_lowercase();
        let duplicate = self.rows.values().any(|row| {
            Some(row.id) != id && row.parent_id == parent_id && row.name.to_lowercase() == lowered
        });
        if duplicate {
            return Err(StoreError::Constraint(
                "duplicate key value violates unique constraint \"uq_categories_parent_name\""
                    .to_string(),
            ));
        }

        Ok(())
    }
}

/// Process-local category store.
///
/// A transaction holds the lock for its whole lifetime and works on a copy of
/// the state, which replaces the shared state only on commit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCategoryRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryCategoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CategoryRepository for InMemoryCategoryRepository {
    async fn find_all(&self) -> StoreResult<Vec<Category>> {
        let state = self.state.lock().await;
        Ok(state.rows.values().cloned().collect())
    }

    async fn begin(&self) -> StoreResult<Box<dyn CategoryTransaction>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction { guard, working }))
    }
}

struct InMemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl CategoryTransaction for InMemoryTransaction {
    async fn find_by_id(&mut self, id: i32) -> StoreResult<Option<Category>> {
        Ok(self.working.rows.get(&id).cloned())
    }

    async fn insert(&mut self, category: NewCategory) -> StoreResult<Category> {
        let id = self.working.last_id + 1;
        self.working
            .check_constraints(Some(id), category.parent_id, &category.name)?;

        let now = Utc::now();
        let created = Category {
            id,
            version: 0,
            parent_id: category.parent_id,
            name: category.name,
            description: category.description,
            created_at: now,
            updated_at: now,
        };
        self.working.last_id = id;
        self.working.rows.insert(id, created.clone());

        Ok(created)
    }

    async fn merge(&mut self, id: i32, changes: CategoryChanges) -> StoreResult<Category> {
        let stored_version = match self.working.rows.get(&id) {
            Some(row) => row.version,
            None => return Err(StoreError::Database(sqlx::Error::RowNotFound)),
        };
        if let Some(expected) = changes.expected_version {
            if expected != stored_version {
                return Err(StoreError::StaleVersion { id, expected });
            }
        }
        self.working
            .check_constraints(Some(id), changes.parent_id, &changes.name)?;

        let row = self
            .working
            .rows
            .get_mut(&id)
            .ok_or(StoreError::Database(sqlx::Error::RowNotFound))?;
        row.parent_id = changes.parent_id;
        row.name = changes.name;
        row.description = changes.description;
        row.version += 1;
        row.updated_at = Utc::now();

        Ok(row.clone())
    }

    async fn delete(&mut self, id: i32) -> StoreResult<bool> {
        if self.has_children(id).await? {
            return Err(StoreError::Constraint(
                "update or delete on table \"categories\" violates foreign key constraint \"categories_parent_id_fkey\" on table \"categories\"".to_string(),
            ));
        }
        Ok(self.working.rows.remove(&id).is_some())
    }

    async fn has_children(&mut self, id: i32) -> StoreResult<bool> {
        Ok(self
            .working
            .rows
            .values()
            .any(|row| row.parent_id == Some(id)))
    }

    async fn find_children(&mut self, id: i32) -> StoreResult<Vec<Category>> {
        Ok(self
            .working
            .rows
            .values()
            .filter(|row| row.parent_id == Some(id))
            .cloned()
            .collect())
    }

    /// The transaction already holds the store-wide lock
    async fn lock_hierarchy(&mut self) -> StoreResult<()> {
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let InMemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
