use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::features::categories::models::Category;

/// Reference to a parent category inside a request body.
///
/// Clients may send only `{ "id": 3 }` or a full category object; every field
/// other than `id` and `version` is ignored.
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
pub struct ParentRefDto {
    pub id: Option<i32>,
    /// Present when the client holds a fully loaded parent
    pub version: Option<i32>,
}

/// Request body for creating or replacing a category
#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct CategoryPayloadDto {
    /// Must be absent on create; on update it must match the path id if sent
    pub id: Option<i32>,

    /// Optimistic-lock token from the last read (update only)
    pub version: Option<i32>,

    #[validate(length(min = 1, max = 255))]
    pub name: String,

    #[validate(length(max = 2000))]
    pub description: Option<String>,

    pub parent: Option<ParentRefDto>,
}

/// Response DTO for category, with its parent chain embedded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(no_recursion)]
pub struct CategoryResponseDto {
    pub id: i32,
    pub version: i32,
    pub name: String,
    pub description: Option<String>,
    pub parent: Option<Box<CategoryResponseDto>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CategoryResponseDto {
    fn node(c: Category, parent: Option<Box<CategoryResponseDto>>) -> Self {
        Self {
            id: c.id,
            version: c.version,
            name: c.name,
            description: c.description,
            parent,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }

    /// Build from a category and its ancestors, nearest first
    pub fn from_chain(category: Category, ancestors: Vec<Category>) -> Self {
        let parent = ancestors
            .into_iter()
            .rev()
            .fold(None, |parent, ancestor| {
                Some(Box::new(Self::node(ancestor, parent)))
            });

        Self::node(category, parent)
    }

    /// Build every category of a flat list, resolving parents within the list
    pub fn build_all(categories: Vec<Category>) -> Vec<CategoryResponseDto> {
        let by_id: HashMap<i32, Category> =
            categories.iter().map(|c| (c.id, c.clone())).collect();

        categories
            .into_iter()
            .map(|category| {
                let ancestors = ancestors_in(&by_id, category.parent_id);
                Self::from_chain(category, ancestors)
            })
            .collect()
    }
}

/// Walk `parent_id` links through `by_id`, nearest first. Stops at a missing
/// link or a repeated id.
fn ancestors_in(by_id: &HashMap<i32, Category>, mut next: Option<i32>) -> Vec<Category> {
    let mut seen = HashSet::new();
    let mut chain = Vec::new();

    while let Some(id) = next {
        if !seen.insert(id) {
            break;
        }
        match by_id.get(&id) {
            Some(ancestor) => {
                next = ancestor.parent_id;
                chain.push(ancestor.clone());
            }
            None => break,
        }
    }

    chain
}

/// One node of the category tree
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(no_recursion)]
pub struct CategoryTreeNodeDto {
    pub id: i32,
    pub version: i32,
    pub name: String,
    pub description: Option<String>,
    pub children: Vec<CategoryTreeNodeDto>,
}

/// The whole hierarchy, materialized from the stored categories
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CategoryTreeDto {
    pub roots: Vec<CategoryTreeNodeDto>,
}

impl CategoryTreeDto {
    /// Build tree from flat list of categories. Siblings are ordered by name,
    /// then id.
    pub fn build_tree(categories: &[Category]) -> CategoryTreeDto {
        let mut children_of: HashMap<Option<i32>, Vec<&Category>> = HashMap::new();
        for category in categories {
            children_of
                .entry(category.parent_id)
                .or_default()
                .push(category);
        }
        for siblings in children_of.values_mut() {
            siblings.sort_by(|a, b| {
                a.name
                    .to_lowercase()
                    .cmp(&b.name.to_lowercase())
                    .then(a.id.cmp(&b.id))
            });
        }

        // Depth-first order from the roots: every parent precedes its children
        let mut order: Vec<&Category> = Vec::with_capacity(categories.len());
        let mut pending: Vec<&Category> = children_of
            .get(&None)
            .map(|roots| roots.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(category) = pending.pop() {
            order.push(category);
            if let Some(children) = children_of.get(&Some(category.id)) {
                pending.extend(children.iter().rev().copied());
            }
        }

        // Assemble bottom-up, so each node's children are finished before it
        let mut built: HashMap<i32, CategoryTreeNodeDto> = HashMap::with_capacity(order.len());
        for category in order.into_iter().rev() {
            let children = take_built(&mut built, children_of.get(&Some(category.id)));
            built.insert(
                category.id,
                CategoryTreeNodeDto {
                    id: category.id,
                    version: category.version,
                    name: category.name.clone(),
                    description: category.description.clone(),
                    children,
                },
            );
        }

        CategoryTreeDto {
            roots: take_built(&mut built, children_of.get(&None)),
        }
    }
}

fn take_built(
    built: &mut HashMap<i32, CategoryTreeNodeDto>,
    siblings: Option<&Vec<&Category>>,
) -> Vec<CategoryTreeNodeDto> {
    siblings
        .map(|siblings| siblings.iter().filter_map(|c| built.remove(&c.id)).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(id: i32, parent_id: Option<i32>, name: &str) -> Category {
        let now = Utc::now();
        Category {
            id,
            version: 0,
            parent_id,
            name: name.to_string(),
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_from_chain_nests_parents() {
        let dto = CategoryResponseDto::from_chain(
            category(3, Some(2), "Fantasy"),
            vec![category(2, Some(1), "Fiction"), category(1, None, "Books")],
        );

        let parent = dto.parent.expect("parent");
        assert_eq!(parent.name, "Fiction");
        let grandparent = parent.parent.expect("grandparent");
        assert_eq!(grandparent.name, "Books");
        assert!(grandparent.parent.is_none());
    }

    #[test]
    fn test_build_all_resolves_parents_from_list() {
        let dtos = CategoryResponseDto::build_all(vec![
            category(1, None, "Books"),
            category(2, Some(1), "Fiction"),
        ]);

        assert_eq!(dtos.len(), 2);
        assert!(dtos[0].parent.is_none());
        assert_eq!(dtos[1].parent.as_ref().map(|p| p.id), Some(1));
    }

    #[test]
    fn test_ancestors_stop_on_cycle() {
        let by_id: HashMap<i32, Category> = [category(1, Some(2), "A"), category(2, Some(1), "B")]
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        let chain = ancestors_in(&by_id, Some(1));
        assert_eq!(chain.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_build_tree() {
        let tree = CategoryTreeDto::build_tree(&[
            category(1, None, "Music"),
            category(2, None, "Books"),
            category(3, Some(2), "Poetry"),
            category(4, Some(2), "fiction"),
            category(5, Some(4), "Fantasy"),
        ]);

        let names: Vec<&str> = tree.roots.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["Books", "Music"]);

        let books = &tree.roots[0];
        let children: Vec<&str> = books.children.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(children, vec!["fiction", "Poetry"]);
        assert_eq!(books.children[0].children[0].id, 5);
        assert!(tree.roots[1].children.is_empty());
    }

    #[test]
    fn test_build_tree_handles_deep_chains() {
        let categories: Vec<Category> = (1..=1_000)
            .map(|id| category(id, (id > 1).then(|| id - 1), &format!("Level {}", id)))
            .collect();

        let tree = CategoryTreeDto::build_tree(&categories);

        assert_eq!(tree.roots.len(), 1);
        let mut depth = 0;
        let mut node = &tree.roots[0];
        loop {
            depth += 1;
            assert_eq!(node.id, depth);
            match node.children.first() {
                Some(child) => node = child,
                None => break,
            }
        }
        assert_eq!(depth, 1_000);
    }

    #[test]
    fn test_build_tree_skips_rows_cut_off_by_a_cycle() {
        let tree = CategoryTreeDto::build_tree(&[
            category(1, None, "Books"),
            category(2, Some(3), "A"),
            category(3, Some(2), "B"),
        ]);

        assert_eq!(tree.roots.len(), 1);
        assert!(tree.roots[0].children.is_empty());
    }

    #[test]
    fn test_build_tree_empty() {
        assert!(CategoryTreeDto::build_tree(&[]).roots.is_empty());
    }

    #[test]
    fn test_payload_accepts_full_parent_object() {
        let payload: CategoryPayloadDto = serde_json::from_value(serde_json::json!({
            "name": "Fiction",
            "parent": { "id": 1, "version": 2, "name": "Books", "parent": null }
        }))
        .unwrap();

        let parent = payload.parent.unwrap();
        assert_eq!(parent.id, Some(1));
        assert_eq!(parent.version, Some(2));
        assert!(payload.id.is_none());
    }

    #[test]
    fn test_payload_validation() {
        let mut payload = CategoryPayloadDto {
            id: None,
            version: None,
            name: String::new(),
            description: None,
            parent: None,
        };
        assert!(payload.validate().is_err());

        payload.name = "Books".to_string();
        assert!(payload.validate().is_ok());

        payload.description = Some("x".repeat(2001));
        assert!(payload.validate().is_err());
    }
}
