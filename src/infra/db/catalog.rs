use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};

use crate::application::pagination::PageWindow;
use crate::application::repos::{CatalogRepo, MovieSlice, RepoError};
use crate::domain::entities::{CategoryRecord, CategorySummary, MovieRecord};

use super::PostgresRepositories;
use super::map_sqlx_error;
use super::types::{CategoryRow, MovieRow};

const MOVIE_COLUMNS: &str = "SELECT m.id, m.title, m.category_id, m.cover_url, m.summary, \
     m.play_url, m.updated_at FROM movies m";
const MOVIE_ORDER: &str = " ORDER BY m.updated_at DESC, m.id DESC";
const CATEGORY_COLUMNS: &str = "SELECT c.id, c.name, c.main, \
     (SELECT COUNT(*) FROM movies m WHERE m.category_id = c.id) AS movie_num \
     FROM categories c";

impl PostgresRepositories {
    fn window_bounds(window: PageWindow) -> Result<(i64, i64), RepoError> {
        let limit = i64::try_from(window.limit()).map_err(|_| RepoError::InvalidInput {
            message: "page size exceeds supported range".to_string(),
        })?;
        let offset = i64::try_from(window.offset()).map_err(|_| RepoError::InvalidInput {
            message: "page offset exceeds supported range".to_string(),
        })?;
        Ok((limit, offset))
    }

    /// Counts the movies matching `filter` and fetches the requested page of
    /// them inside one snapshot.
    async fn paged_movies<F>(
        &self,
        window: PageWindow,
        filter: F,
    ) -> Result<MovieSlice, RepoError>
    where
        F: for<'q> Fn(&mut QueryBuilder<'q, Postgres>) + Send + Sync,
    {
        let (limit, offset) = Self::window_bounds(window)?;
        let mut tx = self.begin_snapshot().await.map_err(map_sqlx_error)?;

        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM movies m");
        filter(&mut count);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let mut page = QueryBuilder::new(MOVIE_COLUMNS);
        filter(&mut page);
        page.push(MOVIE_ORDER);
        page.push(" LIMIT ");
        page.push_bind(limit);
        page.push(" OFFSET ");
        page.push_bind(offset);
        let rows: Vec<MovieRow> = page
            .build_query_as()
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(MovieSlice {
            items: rows.into_iter().map(MovieRecord::from).collect(),
            total: Self::convert_count(total)?,
        })
    }
}

#[async_trait]
impl CatalogRepo for PostgresRepositories {
    async fn search_movies(
        &self,
        keyword: &str,
        window: PageWindow,
    ) -> Result<MovieSlice, RepoError> {
        self.paged_movies(window, |qb| Self::push_title_match(qb, keyword))
            .await
    }

    async fn find_movie(&self, id: i64) -> Result<Option<MovieRecord>, RepoError> {
        let mut qb = QueryBuilder::new(MOVIE_COLUMNS);
        qb.push(" WHERE m.id = ");
        qb.push_bind(id);
        let row: Option<MovieRow> = qb
            .build_query_as()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(MovieRecord::from))
    }

    async fn browse_category(
        &self,
        category_id: i64,
        window: PageWindow,
    ) -> Result<MovieSlice, RepoError> {
        self.paged_movies(window, |qb| Self::push_category_match(qb, category_id))
            .await
    }

    async fn list_categories(&self) -> Result<Vec<CategorySummary>, RepoError> {
        let mut qb = QueryBuilder::new(CATEGORY_COLUMNS);
        qb.push(" ORDER BY c.id");
        let rows: Vec<CategoryRow> = qb
            .build_query_as()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(CategorySummary::from).collect())
    }

    async fn list_main_categories(&self) -> Result<Vec<CategoryRecord>, RepoError> {
        let mut qb = QueryBuilder::new(CATEGORY_COLUMNS);
        qb.push(" WHERE c.main");
        let rows: Vec<CategoryRow> = qb
            .build_query_as()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(CategoryRecord::from).collect())
    }
}
