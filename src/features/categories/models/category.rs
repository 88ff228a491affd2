use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database model for category
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Category {
    pub id: i32,
    /// Optimistic-lock token, bumped on every merge
    pub version: i32,
    pub parent_id: Option<i32>,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row to insert; id and version are assigned by the store
#[derive(Debug, Clone)]
pub struct NewCategory {
    pub parent_id: Option<i32>,
    pub name: String,
    pub description: Option<String>,
}

/// Full replacement of a stored category's mutable fields
#[derive(Debug, Clone)]
pub struct CategoryChanges {
    pub parent_id: Option<i32>,
    pub name: String,
    pub description: Option<String>,
    /// When set, the merge only applies if the stored version still matches
    pub expected_version: Option<i32>,
}
