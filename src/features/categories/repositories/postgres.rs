use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use super::{CategoryRepository, CategoryTransaction, StoreError, StoreResult};
use crate::features::categories::models::{Category, CategoryChanges, NewCategory};

/// Advisory lock key guarding parent changes ("cat_tree")
const HIERARCHY_LOCK_KEY: i64 = 0x6361_745f_7472_6565;

const CATEGORY_COLUMNS: &str =
    "id, version, parent_id, name, description, created_at, updated_at";

/// Postgres-backed category store
pub struct PgCategoryRepository {
    pool: PgPool,
}

impl PgCategoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CategoryRepository for PgCategoryRepository {
    async fn find_all(&self) -> StoreResult<Vec<Category>> {
        let query = format!("SELECT {} FROM categories ORDER BY id", CATEGORY_COLUMNS);

        let categories = sqlx::query_as::<_, Category>(&query)
            .fetch_all(&self.pool)
            .await?;

        Ok(categories)
    }

    async fn begin(&self) -> StoreResult<Box<dyn CategoryTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgCategoryTransaction { tx }))
    }
}

/// Wraps a sqlx transaction; sqlx rolls back on drop
struct PgCategoryTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CategoryTransaction for PgCategoryTransaction {
    async fn find_by_id(&mut self, id: i32) -> StoreResult<Option<Category>> {
        let query = format!("SELECT {} FROM categories WHERE id = $1", CATEGORY_COLUMNS);

        let category = sqlx::query_as::<_, Category>(&query)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(category)
    }

    async fn insert(&mut self, category: NewCategory) -> StoreResult<Category> {
        let query = format!(
            r#"
            INSERT INTO categories (parent_id, name, description)
            VALUES ($1, $2, $3)
            RETURNING {}
            "#,
            CATEGORY_COLUMNS
        );

        let created = sqlx::query_as::<_, Category>(&query)
            .bind(category.parent_id)
            .bind(category.name)
            .bind(category.description)
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(created)
    }

    async fn merge(&mut self, id: i32, changes: CategoryChanges) -> StoreResult<Category> {
        let query = format!(
            r#"
            UPDATE categories
            SET parent_id = $2,
                name = $3,
                description = $4,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND ($5::INTEGER IS NULL OR version = $5)
            RETURNING {}
            "#,
            CATEGORY_COLUMNS
        );

        let merged = sqlx::query_as::<_, Category>(&query)
            .bind(id)
            .bind(changes.parent_id)
            .bind(changes.name)
            .bind(changes.description)
            .bind(changes.expected_version)
            .fetch_optional(&mut *self.tx)
            .await?;

        match (merged, changes.expected_version) {
            (Some(category), _) => Ok(category),
            (None, Some(expected)) => Err(StoreError::StaleVersion { id, expected }),
            (None, None) => Err(StoreError::Database(sqlx::Error::RowNotFound)),
        }
    }

    async fn delete(&mut self, id: i32) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn has_children(&mut self, id: i32) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM categories WHERE parent_id = $1)")
                .bind(id)
                .fetch_one(&mut *self.tx)
                .await?;

        Ok(exists)
    }

    async fn find_children(&mut self, id: i32) -> StoreResult<Vec<Category>> {
        let query = format!(
            "SELECT {} FROM categories WHERE parent_id = $1 ORDER BY id",
            CATEGORY_COLUMNS
        );

        let children = sqlx::query_as::<_, Category>(&query)
            .bind(id)
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(children)
    }

    async fn lock_hierarchy(&mut self) -> StoreResult<()> {
        // Released by Postgres at commit or rollback
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(HIERARCHY_LOCK_KEY)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// These run against the database named by `DATABASE_URL` and are skipped
/// when it is unset. Every row they create carries a unique name and is
/// removed afterwards.
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sqlx::postgres::PgPoolOptions;

    use super::*;
    use crate::core::database::run_migrations;
    use crate::core::error::AppError;
    use crate::features::categories::dtos::{CategoryPayloadDto, ParentRefDto};
    use crate::features::categories::services::CategoryService;

    async fn pg() -> Option<(PgPool, CategoryService)> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set, skipping Postgres test");
            return None;
        };

        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(&url)
            .await
            .expect("connect to DATABASE_URL");
        run_migrations(&pool).await.expect("run migrations");

        let service = CategoryService::new(Arc::new(PgCategoryRepository::new(pool.clone())));
        Some((pool, service))
    }

    fn unique(label: &str) -> String {
        format!("{} {}", label, uuid::Uuid::new_v4())
    }

    fn payload(name: &str, parent: Option<i32>) -> CategoryPayloadDto {
        CategoryPayloadDto {
            id: None,
            version: None,
            name: name.to_string(),
            description: None,
            parent: parent.map(|id| ParentRefDto {
                id: Some(id),
                version: None,
            }),
        }
    }

    async fn cleanup(pool: &PgPool, ids: &[i32]) {
        sqlx::query("UPDATE categories SET parent_id = NULL WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM categories WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .execute(pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_sibling_name_is_bad_request() {
        let Some((pool, service)) = pg().await else {
            return;
        };
        let name = unique("Books");
        let books = service.create(payload(&name, None)).await.unwrap();

        let err = service
            .create(payload(&name.to_uppercase(), None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        cleanup(&pool, &[books]).await;
    }

    #[tokio::test]
    async fn test_stale_version_is_conflict() {
        let Some((pool, service)) = pg().await else {
            return;
        };
        let name = unique("Books");
        let books = service.create(payload(&name, None)).await.unwrap();

        let mut first = payload(&format!("{} v1", name), None);
        first.version = Some(0);
        let updated = service.update(books, first).await.unwrap();
        assert_eq!(updated.version, 1);

        let mut stale = payload(&format!("{} v2", name), None);
        stale.version = Some(0);
        let err = service.update(books, stale).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        cleanup(&pool, &[books]).await;
    }

    #[tokio::test]
    async fn test_remove_parent_with_children_is_conflict() {
        let Some((pool, service)) = pg().await else {
            return;
        };
        let books = service
            .create(payload(&unique("Books"), None))
            .await
            .unwrap();
        let fiction = service
            .create(payload(&unique("Fiction"), Some(books)))
            .await
            .unwrap();

        let err = service.remove(books).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(service.get_by_id(books).await.unwrap().is_some());

        cleanup(&pool, &[books, fiction]).await;
    }

    #[tokio::test]
    async fn test_versioned_missing_parent_is_internal_error() {
        let Some((pool, service)) = pg().await else {
            return;
        };
        let name = unique("Books");
        let books = service.create(payload(&name, None)).await.unwrap();

        let mut dto = payload(&name, None);
        dto.parent = Some(ParentRefDto {
            id: Some(i32::MAX),
            version: Some(0),
        });
        let err = service.update(books, dto).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));

        let stored = service.get_by_id(books).await.unwrap().unwrap();
        assert!(stored.parent.is_none());
        assert_eq!(stored.version, 0);

        cleanup(&pool, &[books]).await;
    }

    #[tokio::test]
    async fn test_insert_with_missing_parent_is_constraint_error() {
        let Some((pool, _service)) = pg().await else {
            return;
        };
        let repo = PgCategoryRepository::new(pool);

        let mut tx = repo.begin().await.unwrap();
        let err = tx
            .insert(NewCategory {
                parent_id: Some(i32::MAX),
                name: unique("Orphan"),
                description: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_opposite_moves_cannot_form_a_cycle() {
        let Some((pool, service)) = pg().await else {
            return;
        };

        for _ in 0..20 {
            let a = service.create(payload(&unique("A"), None)).await.unwrap();
            let b = service.create(payload(&unique("B"), None)).await.unwrap();
            let a_name = service.get_by_id(a).await.unwrap().unwrap().name;
            let b_name = service.get_by_id(b).await.unwrap().unwrap().name;

            let (a_under_b, b_under_a) = tokio::join!(
                service.update(a, payload(&a_name, Some(b))),
                service.update(b, payload(&b_name, Some(a))),
            );

            let outcomes = [a_under_b.is_ok(), b_under_a.is_ok()];
            assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
            for result in [a_under_b, b_under_a] {
                if let Err(err) = result {
                    assert!(matches!(err, AppError::BadRequest(_)), "{:?}", err);
                }
            }

            let stored_a = service.get_by_id(a).await.unwrap().unwrap();
            let stored_b = service.get_by_id(b).await.unwrap().unwrap();
            assert_ne!(stored_a.parent.is_some(), stored_b.parent.is_some());

            cleanup(&pool, &[a, b]).await;
        }
    }
}
