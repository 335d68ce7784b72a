//! Movie search across the local cache and the metadata provider.
//!
//! The two halves are returned side by side and never merged: local hits are
//! stored [`Movie`]s, external hits are provider records that may or may not
//! exist locally.

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::error;

use crate::models::{Movie, MovieDetails};
use crate::movies;
use crate::omdb::MetadataProvider;

/// Shortest accepted search term, in characters.
pub const MIN_TERM_CHARS: usize = 2;
/// Maximum number of local matches returned.
pub const LOCAL_RESULT_LIMIT: i64 = 5;

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub local_results: Vec<Movie>,
    pub external_results: Vec<MovieDetails>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SearchError {
    #[error("Search term must be at least 2 characters")]
    TermTooShort,
}

pub async fn search_movies(
    pool: &SqlitePool,
    provider: &dyn MetadataProvider,
    term: &str,
) -> Result<SearchResults, SearchError> {
    let term = term.trim();
    if term.chars().count() < MIN_TERM_CHARS {
        return Err(SearchError::TermTooShort);
    }

    let local_results = match movies::search_local(pool, term, LOCAL_RESULT_LIMIT).await {
        Ok(found) => found,
        Err(e) => {
            error!(term, error = %e, "local movie search failed");
            Vec::new()
        }
    };

    let external_results = provider.search(term).await;

    Ok(SearchResults {
        local_results,
        external_results,
    })
}

/// CLI entry point: run a search and print both result lists.
pub async fn run_search(
    pool: &SqlitePool,
    provider: &dyn MetadataProvider,
    term: &str,
) -> anyhow::Result<()> {
    let results = search_movies(pool, provider, term).await?;

    println!("--- Local ({}) ---", results.local_results.len());
    for movie in &results.local_results {
        println!(
            "[{}] {} ({})",
            movie.id,
            movie.title,
            movie
                .year
                .map(|y| y.to_string())
                .unwrap_or_else(|| "?".to_string())
        );
    }
    println!();

    println!("--- External ({}) ---", results.external_results.len());
    for details in &results.external_results {
        println!(
            "{} ({}) {}",
            details.title,
            details.year.as_deref().unwrap_or("?"),
            details.external_id.as_deref().unwrap_or("")
        );
    }

    Ok(())
}
