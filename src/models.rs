//! Core data models shared by the store, the resolver and the HTTP layer.
//!
//! Timestamps are stored as Unix seconds and rendered as ISO 8601 strings
//! when serialized.

use serde::{Serialize, Serializer};

/// Canonical cached record of a title's metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Movie {
    pub id: i64,
    pub title: String,
    pub external_id: Option<String>,
    pub year: Option<i64>,
    pub rated: Option<String>,
    pub released: Option<String>,
    pub runtime: Option<String>,
    pub genre: Option<String>,
    pub director: Option<String>,
    pub actors: Option<String>,
    pub plot: Option<String>,
    pub poster: Option<String>,
    pub imdb_rating: Option<f64>,
    #[serde(serialize_with = "ts_iso")]
    pub created_at: i64,
    #[serde(serialize_with = "ts_iso")]
    pub updated_at: i64,
}

/// Normalized movie record as reported by the metadata provider.
///
/// Values are kept as the provider's raw strings; coercion into typed
/// columns happens when the record is persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovieDetails {
    pub title: String,
    pub year: Option<String>,
    pub rated: Option<String>,
    pub released: Option<String>,
    pub runtime: Option<String>,
    pub genre: Option<String>,
    pub director: Option<String>,
    pub actors: Option<String>,
    pub plot: Option<String>,
    pub poster: Option<String>,
    pub external_id: Option<String>,
    pub imdb_rating: Option<String>,
}

/// A registered account. The password hash never leaves the process.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub is_active: bool,
    #[serde(serialize_with = "ts_iso")]
    pub created_at: i64,
    #[serde(serialize_with = "ts_iso")]
    pub updated_at: i64,
}

/// A review with its movie and author expanded.
#[derive(Debug, Clone, Serialize)]
pub struct Review {
    pub id: i64,
    pub movie: Movie,
    pub user: User,
    pub content: String,
    pub rating: i64,
    #[serde(serialize_with = "ts_iso")]
    pub created_at: i64,
    #[serde(serialize_with = "ts_iso")]
    pub updated_at: i64,
}

/// One page of a list endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub count: i64,
    pub page: i64,
    pub page_size: i64,
    pub results: Vec<T>,
}

/// Normalized `page` / `page_size` request parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
}

impl PageRequest {
    pub const DEFAULT_PAGE_SIZE: i64 = 10;
    pub const MAX_PAGE_SIZE: i64 = 100;
    /// Highest page whose offset still fits in an `i64`.
    pub const MAX_PAGE: i64 = i64::MAX / Self::MAX_PAGE_SIZE;

    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).clamp(1, Self::MAX_PAGE),
            page_size: page_size
                .unwrap_or(Self::DEFAULT_PAGE_SIZE)
                .clamp(1, Self::MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1).saturating_mul(self.page_size.max(0))
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn ts_iso<S: Serializer>(ts: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_ts_iso(*ts))
}
