//! Read operations over the catalog storage collaborator.

use std::sync::Arc;

use thiserror::Error;

use crate::application::pagination::{PageWindow, PagedResult};
use crate::application::repos::{CatalogRepo, RepoError};
use crate::domain::entities::{CategoryRecord, CategorySummary, MovieRecord};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    #[error("storage failure during `{operation}`: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: RepoError,
    },
}

impl CatalogError {
    fn storage(operation: &'static str) -> impl FnOnce(RepoError) -> Self {
        move |source| Self::Storage { operation, source }
    }
}

/// Query façade invoked by handlers on cache misses. Parameters arrive
/// validated; this layer only shapes results and names failures.
#[derive(Clone)]
pub struct CatalogService {
    repo: Arc<dyn CatalogRepo>,
}

impl CatalogService {
    pub fn new(repo: Arc<dyn CatalogRepo>) -> Self {
        Self { repo }
    }

    pub async fn search(
        &self,
        keyword: &str,
        window: PageWindow,
    ) -> Result<PagedResult<MovieRecord>, CatalogError> {
        let slice = self
            .repo
            .search_movies(keyword, window)
            .await
            .map_err(CatalogError::storage("search_movies"))?;
        Ok(PagedResult::from_total(slice.items, slice.total, window))
    }

    pub async fn get_by_id(&self, id: i64) -> Result<MovieRecord, CatalogError> {
        self.repo
            .find_movie(id)
            .await
            .map_err(CatalogError::storage("find_movie"))?
            .ok_or(CatalogError::NotFound { entity: "movie" })
    }

    pub async fn browse_by_category(
        &self,
        category_id: i64,
        window: PageWindow,
    ) -> Result<PagedResult<MovieRecord>, CatalogError> {
        let slice = self
            .repo
            .browse_category(category_id, window)
            .await
            .map_err(CatalogError::storage("browse_category"))?;
        Ok(PagedResult::from_total(slice.items, slice.total, window))
    }

    pub async fn list_categories(&self) -> Result<Vec<CategorySummary>, CatalogError> {
        self.repo
            .list_categories()
            .await
            .map_err(CatalogError::storage("list_categories"))
    }

    /// Front-page categories, always sorted by ascending id.
    pub async fn list_main_categories(&self) -> Result<Vec<CategoryRecord>, CatalogError> {
        let mut categories = self
            .repo
            .list_main_categories()
            .await
            .map_err(CatalogError::storage("list_main_categories"))?;
        categories.sort_by_key(|category| category.id);
        Ok(categories)
    }
}
