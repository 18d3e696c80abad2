//! Layer catalog: users, workspaces, layers and ratings, plus the rules for
//! who may see and change them.

pub mod extent;
mod memory;
pub mod model;
pub mod policy;
pub mod reference;
pub mod search;
mod service;
mod store;

pub use memory::InMemoryCatalogStore;
pub use model::*;
pub use search::{LayerQuery, SortField, SortOrder};
pub use service::{Catalog, LayerDraft, LayerPatch, LayerView, OwnerSummary};
pub use store::CatalogStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Names the missing kind of record, e.g. `"Layer"`.
    NotFound(&'static str),
    Forbidden(String),
    Invalid(String),
    Conflict(String),
    Storage(String),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::NotFound(what) => write!(f, "{what} not found"),
            CatalogError::Forbidden(msg) => write!(f, "{msg}"),
            CatalogError::Invalid(msg) => write!(f, "{msg}"),
            CatalogError::Conflict(msg) => write!(f, "conflict: {msg}"),
            CatalogError::Storage(msg) => write!(f, "catalog storage error: {msg}"),
        }
    }
}

impl std::error::Error for CatalogError {}
