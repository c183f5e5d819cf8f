//! Postgres-backed repository implementations.

mod catalog;
mod types;
mod util;

pub use util::{escape_like, map_sqlx_error};

use std::sync::Arc;

use sqlx::{
    Postgres, QueryBuilder, Transaction,
    postgres::{PgPool, PgPoolOptions},
    query,
};

use crate::application::repos::RepoError;

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Opens a read-only transaction whose statements all observe one
    /// snapshot, so a count and the page it describes cannot disagree.
    pub async fn begin_snapshot(&self) -> Result<Transaction<'_, Postgres>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }

    /// Appends the title predicate shared by the search count and page
    /// queries.
    fn push_title_match<'q>(qb: &mut QueryBuilder<'q, Postgres>, keyword: &str) {
        qb.push(" WHERE m.title ILIKE ");
        qb.push_bind(format!("%{}%", escape_like(keyword)));
        qb.push(" ESCAPE '\\'");
    }

    fn push_category_match<'q>(qb: &mut QueryBuilder<'q, Postgres>, category_id: i64) {
        qb.push(" WHERE m.category_id = ");
        qb.push_bind(category_id);
    }

    fn convert_count(value: i64) -> Result<u64, RepoError> {
        value
            .try_into()
            .map_err(|_| RepoError::from_persistence("count exceeds supported range"))
    }
}
