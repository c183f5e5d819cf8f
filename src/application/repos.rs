//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::application::pagination::PageWindow;
use crate::domain::entities::{CategoryRecord, CategorySummary, MovieRecord};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// One page of movies together with the number of records matching the
/// query as a whole. Both come from the same predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct MovieSlice {
    pub items: Vec<MovieRecord>,
    pub total: u64,
}

/// Storage collaborator consumed by the catalog on cache misses.
#[async_trait]
pub trait CatalogRepo: Send + Sync {
    /// Case-insensitive title match, most recent first.
    async fn search_movies(&self, keyword: &str, window: PageWindow)
    -> Result<MovieSlice, RepoError>;

    async fn find_movie(&self, id: i64) -> Result<Option<MovieRecord>, RepoError>;

    /// Movies of one category ordered by `updated_at DESC, id DESC`.
    async fn browse_category(
        &self,
        category_id: i64,
        window: PageWindow,
    ) -> Result<MovieSlice, RepoError>;

    async fn list_categories(&self) -> Result<Vec<CategorySummary>, RepoError>;

    /// Front-page categories in no particular order.
    async fn list_main_categories(&self) -> Result<Vec<CategoryRecord>, RepoError>;
}
