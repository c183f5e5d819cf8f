//! In-memory catalog backed by a TOML seed file.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::application::pagination::PageWindow;
use crate::application::repos::{CatalogRepo, MovieSlice, RepoError};
use crate::domain::entities::{CategoryRecord, CategorySummary, MovieRecord};

use super::error::InfraError;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SeedFile {
    categories: Vec<CategoryRecord>,
    movies: Vec<MovieRecord>,
}

/// Holds every record in memory. Movies are kept pre-sorted by
/// `updated_at DESC, id DESC`, the order all listings use.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    movies: Vec<MovieRecord>,
    categories: Vec<CategoryRecord>,
}

impl InMemoryCatalog {
    pub fn new(mut movies: Vec<MovieRecord>, categories: Vec<CategoryRecord>) -> Self {
        movies.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Self { movies, categories }
    }

    pub fn from_toml_str(source: &str) -> Result<Self, toml::de::Error> {
        let seed: SeedFile = toml::from_str(source)?;
        Ok(Self::new(seed.movies, seed.categories))
    }

    pub async fn load(path: &Path) -> Result<Self, InfraError> {
        let source = tokio::fs::read_to_string(path).await?;
        let catalog =
            Self::from_toml_str(&source).map_err(|err| InfraError::seed(path, err))?;
        info!(
            path = %path.display(),
            movies = catalog.movies.len(),
            categories = catalog.categories.len(),
            "Loaded catalog seed"
        );
        Ok(catalog)
    }

    fn movie_count(&self, category_id: i64) -> i64 {
        self.movies
            .iter()
            .filter(|movie| movie.category_id == category_id)
            .count() as i64
    }

    fn page_of<'a>(
        &'a self,
        matches: impl Iterator<Item = &'a MovieRecord> + Clone,
        window: PageWindow,
    ) -> MovieSlice {
        let total = matches.clone().count() as u64;
        let items = window.apply(matches).cloned().collect();
        MovieSlice { items, total }
    }
}

#[async_trait]
impl CatalogRepo for InMemoryCatalog {
    async fn search_movies(
        &self,
        keyword: &str,
        window: PageWindow,
    ) -> Result<MovieSlice, RepoError> {
        let needle = keyword.to_lowercase();
        Ok(self.page_of(
            self.movies
                .iter()
                .filter(|movie| movie.title.to_lowercase().contains(&needle)),
            window,
        ))
    }

    async fn find_movie(&self, id: i64) -> Result<Option<MovieRecord>, RepoError> {
        Ok(self.movies.iter().find(|movie| movie.id == id).cloned())
    }

    async fn browse_category(
        &self,
        category_id: i64,
        window: PageWindow,
    ) -> Result<MovieSlice, RepoError> {
        Ok(self.page_of(
            self.movies
                .iter()
                .filter(|movie| movie.category_id == category_id),
            window,
        ))
    }

    async fn list_categories(&self) -> Result<Vec<CategorySummary>, RepoError> {
        Ok(self
            .categories
            .iter()
            .map(|category| CategorySummary {
                id: category.id,
                name: category.name.clone(),
                movie_num: self.movie_count(category.id),
            })
            .collect())
    }

    async fn list_main_categories(&self) -> Result<Vec<CategoryRecord>, RepoError> {
        Ok(self
            .categories
            .iter()
            .filter(|category| category.main)
            .map(|category| CategoryRecord {
                movie_num: self.movie_count(category.id),
                ..category.clone()
            })
            .collect())
    }
}
