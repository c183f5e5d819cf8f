//! Domain entities mirrored from persistent storage.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A single playable title in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieRecord {
    pub id: i64,
    pub title: String,
    pub category_id: i64,
    #[serde(default)]
    pub cover_url: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub play_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A category as stored, including whether it is shown on the front page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRecord {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub movie_num: i64,
    #[serde(default)]
    pub main: bool,
}

/// Public projection used by the full category listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySummary {
    pub id: i64,
    pub name: String,
    pub movie_num: i64,
}

impl From<CategoryRecord> for CategorySummary {
    fn from(record: CategoryRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            movie_num: record.movie_num,
        }
    }
}
