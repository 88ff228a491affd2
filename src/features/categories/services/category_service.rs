use std::collections::HashSet;
use std::sync::Arc;

use crate::core::error::{AppError, Result};
use crate::features::categories::dtos::{
    CategoryPayloadDto, CategoryResponseDto, CategoryTreeDto, ParentRefDto,
};
use crate::features::categories::models::{Category, CategoryChanges, NewCategory};
use crate::features::categories::repositories::{
    CategoryRepository, CategoryTransaction, StoreError,
};

/// Deepest allowed nesting, roots being level 1
pub const MAX_HIERARCHY_DEPTH: usize = 32;

/// Anything the store reports that is not a domain outcome
fn internal(e: StoreError) -> AppError {
    tracing::error!("Category store failure: {}", e);
    AppError::Internal(e.to_string())
}

/// Service for category operations
pub struct CategoryService {
    repository: Arc<dyn CategoryRepository>,
}

impl CategoryService {
    pub fn new(repository: Arc<dyn CategoryRepository>) -> Self {
        Self { repository }
    }

    /// List every category, parents embedded
    pub async fn list_all(&self) -> Result<Vec<CategoryResponseDto>> {
        let categories = self.repository.find_all().await.map_err(internal)?;
        Ok(CategoryResponseDto::build_all(categories))
    }

    /// Materialize the whole hierarchy
    pub async fn get_tree(&self) -> Result<CategoryTreeDto> {
        let categories = self.repository.find_all().await.map_err(internal)?;
        Ok(CategoryTreeDto::build_tree(&categories))
    }

    pub async fn get_by_id(&self, id: i32) -> Result<Option<CategoryResponseDto>> {
        let mut tx = self.repository.begin().await.map_err(internal)?;

        let Some(category) = tx.find_by_id(id).await.map_err(internal)? else {
            return Ok(None);
        };
        let ancestors = load_ancestors(tx.as_mut(), category.parent_id)
            .await
            .map_err(internal)?;

        Ok(Some(CategoryResponseDto::from_chain(category, ancestors)))
    }

    /// Create a category and return its new id
    pub async fn create(&self, dto: CategoryPayloadDto) -> Result<i32> {
        if dto.id.is_some() {
            return Err(AppError::Conflict(
                "Unable to create Category, id was already set.".to_string(),
            ));
        }

        let mut tx = self.repository.begin().await.map_err(internal)?;

        let parent_id = match dto.parent {
            Some(parent) => {
                tx.lock_hierarchy().await.map_err(internal)?;
                let parent_id = resolve_parent(tx.as_mut(), &parent).await?;
                check_placement(tx.as_mut(), None, parent_id).await?;
                Some(parent_id)
            }
            None => None,
        };

        let created = tx
            .insert(NewCategory {
                parent_id,
                name: dto.name,
                description: dto.description,
            })
            .await
            .map_err(|e| match e {
                StoreError::Constraint(msg) => AppError::BadRequest(msg),
                other => internal(other),
            })?;

        tx.commit().await.map_err(internal)?;

        tracing::info!(
            "Category {} '{}' created (parent: {:?})",
            created.id,
            created.name,
            created.parent_id
        );

        Ok(created.id)
    }

    /// Replace the stored category `id` with the payload
    pub async fn update(&self, id: i32, dto: CategoryPayloadDto) -> Result<CategoryResponseDto> {
        let mut tx = self.repository.begin().await.map_err(internal)?;

        if tx.find_by_id(id).await.map_err(internal)?.is_none() {
            return Err(AppError::NotFound(format!(
                "Category with id of {} does not exist.",
                id
            )));
        }

        if let Some(body_id) = dto.id {
            if body_id != id {
                return Err(AppError::BadRequest(format!(
                    "Category id {} in body does not match path id {}.",
                    body_id, id
                )));
            }
        }

        if dto.parent.is_some() {
            tx.lock_hierarchy().await.map_err(internal)?;
        }

        let parent_id = match dto.parent {
            // A versioned parent is a loaded entity and is trusted as-is
            Some(ParentRefDto {
                id: Some(parent_id),
                version: Some(_),
            }) => Some(parent_id),
            Some(parent) => Some(resolve_parent(tx.as_mut(), &parent).await?),
            None => None,
        };

        if let Some(parent_id) = parent_id {
            check_placement(tx.as_mut(), Some(id), parent_id).await?;
        }

        let merged = tx
            .merge(
                id,
                CategoryChanges {
                    parent_id,
                    name: dto.name,
                    description: dto.description,
                    expected_version: dto.version,
                },
            )
            .await
            .map_err(|e| match e {
                StoreError::StaleVersion { .. } => AppError::Conflict(e.to_string()),
                other => internal(other),
            })?;

        let ancestors = load_ancestors(tx.as_mut(), merged.parent_id)
            .await
            .map_err(internal)?;

        tx.commit().await.map_err(internal)?;

        tracing::info!("Category {} updated to version {}", merged.id, merged.version);

        Ok(CategoryResponseDto::from_chain(merged, ancestors))
    }

    /// Delete a category. Absent ids are a no-op; categories that still have
    /// children are refused.
    pub async fn remove(&self, id: i32) -> Result<()> {
        let mut tx = self.repository.begin().await.map_err(internal)?;

        if tx.find_by_id(id).await.map_err(internal)?.is_none() {
            tracing::debug!("Category {} already absent, nothing to delete", id);
            return Ok(());
        }

        if tx.has_children(id).await.map_err(internal)? {
            return Err(AppError::Conflict(format!(
                "Category with id {} still has child categories.",
                id
            )));
        }

        tx.delete(id).await.map_err(|e| match e {
            StoreError::Constraint(msg) => AppError::Conflict(msg),
            other => internal(other),
        })?;

        tx.commit().await.map_err(internal)?;

        tracing::info!("Category {} deleted", id);

        Ok(())
    }
}

/// Replace a partial parent reference with the stored parent's id
async fn resolve_parent(tx: &mut dyn CategoryTransaction, parent: &ParentRefDto) -> Result<i32> {
    let Some(parent_id) = parent.id else {
        return Err(AppError::BadRequest(
            "Parent reference must carry an id.".to_string(),
        ));
    };

    match tx.find_by_id(parent_id).await.map_err(internal)? {
        Some(stored) => Ok(stored.id),
        None => Err(AppError::BadRequest(format!(
            "Parent category with id {} does not exist.",
            parent_id
        ))),
    }
}

/// Refuse placing `id` (or a new category when `None`) under `parent_id` if
/// that would close a cycle or nest deeper than [`MAX_HIERARCHY_DEPTH`]
async fn check_placement(
    tx: &mut dyn CategoryTransaction,
    id: Option<i32>,
    parent_id: i32,
) -> Result<()> {
    let describe = || match id {
        Some(id) => format!("Category {}", id),
        None => "New category".to_string(),
    };

    let chain = load_ancestors(tx, Some(parent_id))
        .await
        .map_err(internal)?;
    if let Some(id) = id {
        if parent_id == id || chain.iter().any(|a| a.id == id) {
            return Err(AppError::BadRequest(format!(
                "{} cannot be placed under {}: the hierarchy would contain a cycle.",
                describe(),
                parent_id
            )));
        }
    }

    let height = match id {
        Some(id) => subtree_height(tx, id).await.map_err(internal)?,
        None => 1,
    };
    if chain.len() + height > MAX_HIERARCHY_DEPTH {
        return Err(AppError::BadRequest(format!(
            "{} cannot be placed under {}: the hierarchy would be deeper than {} levels.",
            describe(),
            parent_id,
            MAX_HIERARCHY_DEPTH
        )));
    }

    Ok(())
}

/// Levels in the subtree rooted at `id`, counting `id` itself. Stops counting
/// once past [`MAX_HIERARCHY_DEPTH`].
async fn subtree_height(
    tx: &mut dyn CategoryTransaction,
    id: i32,
) -> std::result::Result<usize, StoreError> {
    let mut seen = HashSet::from([id]);
    let mut level = vec![id];
    let mut height = 0;

    while !level.is_empty() && height <= MAX_HIERARCHY_DEPTH {
        height += 1;
        let mut next = Vec::new();
        for parent in level {
            for child in tx.find_children(parent).await? {
                if seen.insert(child.id) {
                    next.push(child.id);
                }
            }
        }
        level = next;
    }

    Ok(height)
}

/// Follow `parent_id` links from `next`, nearest ancestor first
async fn load_ancestors(
    tx: &mut dyn CategoryTransaction,
    mut next: Option<i32>,
) -> std::result::Result<Vec<Category>, StoreError> {
    let mut seen = HashSet::new();
    let mut chain = Vec::new();

    while let Some(id) = next {
        if !seen.insert(id) {
            break;
        }
        match tx.find_by_id(id).await? {
            Some(ancestor) => {
                next = ancestor.parent_id;
                chain.push(ancestor);
            }
            None => break,
        }
    }

    Ok(chain)
}
