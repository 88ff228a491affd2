//! Category hierarchy administration.
//!
//! ## Endpoints
//!
//! | Method | Endpoint | Description |
//! |--------|----------|-------------|
//! | GET | `/api/admin/categories` | List all categories |
//! | GET | `/api/admin/categories/tree` | Whole hierarchy as nested nodes |
//! | POST | `/api/admin/categories` | Create a category (201 + `Location`) |
//! | GET | `/api/admin/categories/{id}` | Get a category, `null` when absent |
//! | PUT | `/api/admin/categories/{id}` | Replace a category |
//! | DELETE | `/api/admin/categories/{id}` | Delete a leaf category |

pub mod dtos;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod services;

pub use services::CategoryService;
