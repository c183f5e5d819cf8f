use time::OffsetDateTime;

use crate::domain::entities::{CategoryRecord, CategorySummary, MovieRecord};

#[derive(sqlx::FromRow)]
pub(crate) struct MovieRow {
    pub(crate) id: i64,
    pub(crate) title: String,
    pub(crate) category_id: i64,
    pub(crate) cover_url: String,
    pub(crate) summary: String,
    pub(crate) play_url: String,
    pub(crate) updated_at: OffsetDateTime,
}

impl From<MovieRow> for MovieRecord {
    fn from(row: MovieRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            category_id: row.category_id,
            cover_url: row.cover_url,
            summary: row.summary,
            play_url: row.play_url,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct CategoryRow {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) movie_num: i64,
    pub(crate) main: bool,
}

impl From<CategoryRow> for CategoryRecord {
    fn from(row: CategoryRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            movie_num: row.movie_num,
            main: row.main,
        }
    }
}

impl From<CategoryRow> for CategorySummary {
    fn from(row: CategoryRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            movie_num: row.movie_num,
        }
    }
}
