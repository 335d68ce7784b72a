//! Movie resolution: free-text title → persisted [`Movie`].
//!
//! ```text
//!  resolve(title)
//!      │
//!      ├─▶ local cache (exact, then substring) ──hit──▶ Movie
//!      │
//!      └─▶ per-title gate ─▶ cache re-check ─▶ provider.fetch_details
//!                                                  │
//!                                    error ◀───────┴───────▶ coerce + upsert ─▶ Movie
//!                                      │
//!                                      ▼
//!                                    None
//! ```
//!
//! Resolution never fails loudly: provider errors and storage errors are
//! logged and reported as `None`.
//!
//! Concurrent resolutions of the same title are serialized by a per-title
//! gate. The first caller fetches and stores; the others wait, then find the
//! stored row on their cache re-check instead of hitting the provider again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sqlx::SqlitePool;
use tracing::{debug, error, info};

use crate::models::{Movie, MovieDetails};
use crate::movies::{self, NewMovie};
use crate::omdb::MetadataProvider;

type Gate = Arc<tokio::sync::Mutex<()>>;

pub struct MovieResolver {
    pool: SqlitePool,
    provider: Arc<dyn MetadataProvider>,
    in_flight: Mutex<HashMap<String, Gate>>,
}

impl MovieResolver {
    pub fn new(pool: SqlitePool, provider: Arc<dyn MetadataProvider>) -> Self {
        Self {
            pool,
            provider,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn provider(&self) -> &Arc<dyn MetadataProvider> {
        &self.provider
    }

    /// Map a title to a stored movie, fetching and persisting it on a miss.
    pub async fn resolve(&self, title: &str) -> Option<Movie> {
        let title = title.trim();
        if title.is_empty() {
            return None;
        }

        if let Some(movie) = self.cached(title).await? {
            debug!(title, movie_id = movie.id, "resolver cache hit");
            return Some(movie);
        }

        let key = movies::title_key(title);
        let gate = self.acquire_gate(&key);
        let result = {
            let _held = gate.lock().await;
            self.resolve_miss(title).await
        };
        self.release_gate(&key, gate);
        result
    }

    async fn resolve_miss(&self, title: &str) -> Option<Movie> {
        // Another caller may have stored it while we waited on the gate.
        if let Some(movie) = self.cached(title).await? {
            debug!(title, movie_id = movie.id, "resolved while waiting");
            return Some(movie);
        }

        let details = match self.provider.fetch_details(title).await {
            Ok(details) => details,
            Err(e) => {
                info!(title, reason = %e, "movie could not be resolved");
                return None;
            }
        };

        match movies::upsert_movie(&self.pool, &to_new_movie(&details)).await {
            Ok(movie) => {
                info!(title, stored_title = %movie.title, movie_id = movie.id, "movie stored");
                Some(movie)
            }
            Err(e) => {
                error!(title, error = %e, "error saving movie");
                None
            }
        }
    }

    /// Cache lookup. The outer `Option` is `None` when the lookup itself
    /// failed, which ends resolution.
    async fn cached(&self, title: &str) -> Option<Option<Movie>> {
        match movies::find_cached(&self.pool, title).await {
            Ok(found) => Some(found),
            Err(e) => {
                error!(title, error = %e, "error reading movie cache");
                None
            }
        }
    }

    fn acquire_gate(&self, key: &str) -> Gate {
        let mut map = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        map.entry(key.to_string()).or_default().clone()
    }

    fn release_gate(&self, key: &str, gate: Gate) {
        let mut map = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        // The map and `gate` hold the only references: no one else is waiting.
        if Arc::strong_count(&gate) == 2 {
            map.remove(key);
        }
    }

    #[cfg(test)]
    fn gates_in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }
}

/// Convert provider strings into typed columns.
pub fn to_new_movie(details: &MovieDetails) -> NewMovie {
    NewMovie {
        title: details.title.clone(),
        external_id: details.external_id.clone(),
        year: parse_year(details.year.as_deref()),
        rated: details.rated.clone(),
        released: details.released.clone(),
        runtime: details.runtime.clone(),
        genre: details.genre.clone(),
        director: details.director.clone(),
        actors: details.actors.clone(),
        plot: details.plot.clone(),
        poster: details.poster.clone(),
        imdb_rating: parse_rating(details.imdb_rating.as_deref()),
    }
}

/// Leading year of a provider year string.
///
/// Series come back as ranges such as `"1994–present"` or `"2008–2013"`; the
/// string is cut at the first non-ASCII dash and the prefix must be all
/// digits.
pub fn parse_year(raw: Option<&str>) -> Option<i64> {
    let prefix = raw?.split(is_unicode_dash).next()?.trim();
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    prefix.parse().ok()
}

/// Provider rating as a float; `"N/A"` and other junk become `None`.
pub fn parse_rating(raw: Option<&str>) -> Option<f64> {
    raw?.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn is_unicode_dash(c: char) -> bool {
    matches!(c, '\u{2010}'..='\u{2015}' | '\u{2212}' | '\u{FE58}' | '\u{FE63}' | '\u{FF0D}')
}
