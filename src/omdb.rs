//! External movie metadata client (OMDb-compatible API).
//!
//! Every lookup is a *soft failure*: the provider saying "not found", an HTTP
//! error status, and a transport or decoding failure all come back as a
//! [`LookupError`] value, never as a panic or a propagated fault. Callers only
//! tell them apart for logging; functionally each one means "no movie".
//!
//! # Requests
//!
//! | Operation | Query |
//! |-----------|-------|
//! | [`fetch_details`](MetadataProvider::fetch_details) | `apikey`, `t=<title>`, `plot=short`, `r=json` |
//! | [`fetch_by_id`](MetadataProvider::fetch_by_id) | `apikey`, `i=<imdb id>`, `plot=short` |
//! | [`search`](MetadataProvider::search) | `apikey`, `s=<term>`, `r=json`, then one `i=` lookup per hit |
//!
//! The underlying [`reqwest::Client`] is a connection pool owned by the
//! process and shared by every call; nothing is opened or torn down per lookup.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::OmdbConfig;
use crate::models::MovieDetails;

/// Maximum number of search hits expanded into full records.
pub const SEARCH_DETAIL_LIMIT: usize = 5;

/// Why a provider lookup produced no record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LookupError {
    /// The provider answered `Response: "False"`.
    #[error("Movie not found")]
    NotFound,
    /// The provider answered with a non-200 status.
    #[error("API Error: {0}")]
    Status(u16),
    /// The request never completed or the body could not be decoded.
    #[error("Failed to fetch movie details: {0}")]
    Transport(String),
    /// A success response without the fields a record needs.
    #[error("Malformed provider response: {0}")]
    Malformed(String),
}

/// Outcome of a single-title lookup.
pub type Lookup = std::result::Result<MovieDetails, LookupError>;

/// A source of movie metadata.
///
/// The resolver and the search aggregator depend on this trait rather than on
/// [`OmdbClient`] directly, so alternative providers (or fakes) can be plugged
/// in.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Look a movie up by title.
    async fn fetch_details(&self, title: &str) -> Lookup;

    /// Look a movie up by provider id (e.g. `tt0111161`).
    async fn fetch_by_id(&self, external_id: &str) -> Lookup;

    /// Search by term, returning at most [`SEARCH_DETAIL_LIMIT`] full records
    /// in the provider's ranking order. Empty on any top-level failure.
    async fn search(&self, term: &str) -> Vec<MovieDetails>;
}

/// HTTP client for the OMDb API.
pub struct OmdbClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
}

impl OmdbClient {
    pub fn new(config: &OmdbConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self::with_client(http, config))
    }

    /// Build a client around an existing connection pool.
    pub fn with_client(http: Client, config: &OmdbConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        }
    }

    /// The pooled HTTP session shared by all lookups.
    pub fn session(&self) -> &Client {
        &self.http
    }

    /// Look a movie up by provider id on a caller-supplied session.
    ///
    /// Used when many ids are fetched in a row (search fan-out) so every
    /// request rides the same connection. With `None` the client's own pool
    /// is used. The session is only borrowed; its lifetime stays with the
    /// owner.
    pub async fn fetch_by_id_in(&self, session: Option<&Client>, external_id: &str) -> Lookup {
        let session = session.unwrap_or(&self.http);
        let result = self
            .get_title(session, &[("i", external_id), ("plot", "short")])
            .await;
        log_failure("id", external_id, &result);
        result
    }

    async fn get_title(&self, session: &Client, params: &[(&str, &str)]) -> Lookup {
        let response = session
            .get(&self.base_url)
            .query(&[("apikey", self.api_key.expose_secret())])
            .query(params)
            .send()
            .await
            .map_err(|e| LookupError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(LookupError::Status(status.as_u16()));
        }

        let body: TitleResponse = response
            .json()
            .await
            .map_err(|e| LookupError::Transport(e.without_url().to_string()))?;
        body.into_details()
    }

    async fn search_ids(&self, session: &Client, term: &str) -> Result<Vec<String>, LookupError> {
        let response = session
            .get(&self.base_url)
            .query(&[
                ("apikey", self.api_key.expose_secret()),
                ("s", term),
                ("r", "json"),
            ])
            .send()
            .await
            .map_err(|e| LookupError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(LookupError::Status(status.as_u16()));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| LookupError::Transport(e.without_url().to_string()))?;
        body.into_ids()
    }
}

#[async_trait]
impl MetadataProvider for OmdbClient {
    async fn fetch_details(&self, title: &str) -> Lookup {
        let result = self
            .get_title(&self.http, &[("t", title), ("plot", "short"), ("r", "json")])
            .await;
        log_failure("title", title, &result);
        result
    }

    async fn fetch_by_id(&self, external_id: &str) -> Lookup {
        self.fetch_by_id_in(None, external_id).await
    }

    async fn search(&self, term: &str) -> Vec<MovieDetails> {
        let session = &self.http;
        let ids = match self.search_ids(session, term).await {
            Ok(ids) => ids,
            Err(LookupError::NotFound) => {
                debug!(term, "provider search returned no hits");
                return Vec::new();
            }
            Err(e) => {
                error!(term, error = %e, "error searching movies");
                return Vec::new();
            }
        };

        let mut results = Vec::with_capacity(ids.len().min(SEARCH_DETAIL_LIMIT));
        for id in ids.iter().take(SEARCH_DETAIL_LIMIT) {
            match self.fetch_by_id_in(Some(session), id).await {
                Ok(details) => results.push(details),
                Err(e) => debug!(term, external_id = %id, error = %e, "skipping search hit"),
            }
        }
        results
    }
}

fn log_failure(key: &str, value: &str, result: &Lookup) {
    match result {
        Ok(_) => {}
        Err(LookupError::NotFound) => debug!(key, value, "movie not found at provider"),
        Err(LookupError::Status(status)) => {
            warn!(key, value, status, "provider returned error status")
        }
        Err(e) => error!(key, value, error = %e, "error fetching movie details"),
    }
}

// ============ Wire format ============

/// Body of a lookup-by-title / lookup-by-id response.
#[derive(Debug, Deserialize)]
struct TitleResponse {
    #[serde(rename = "Response", default)]
    response: String,
    #[serde(rename = "Title")]
    title: Option<String>,
    #[serde(rename = "Year")]
    year: Option<String>,
    #[serde(rename = "Rated")]
    rated: Option<String>,
    #[serde(rename = "Released")]
    released: Option<String>,
    #[serde(rename = "Runtime")]
    runtime: Option<String>,
    #[serde(rename = "Genre")]
    genre: Option<String>,
    #[serde(rename = "Director")]
    director: Option<String>,
    #[serde(rename = "Actors")]
    actors: Option<String>,
    #[serde(rename = "Plot")]
    plot: Option<String>,
    #[serde(rename = "Poster")]
    poster: Option<String>,
    #[serde(rename = "imdbID")]
    imdb_id: Option<String>,
    #[serde(rename = "imdbRating")]
    imdb_rating: Option<String>,
}

impl TitleResponse {
    fn into_details(self) -> Lookup {
        if self.response != "True" {
            return Err(LookupError::NotFound);
        }
        let title = self
            .title
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| LookupError::Malformed("missing Title".to_string()))?;

        Ok(MovieDetails {
            title,
            year: self.year,
            rated: self.rated,
            released: self.released,
            runtime: self.runtime,
            genre: self.genre,
            director: self.director,
            actors: self.actors,
            plot: self.plot,
            poster: self.poster,
            external_id: self.imdb_id,
            imdb_rating: self.imdb_rating,
        })
    }
}

/// Body of a search response. Hits are abbreviated records.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "Response", default)]
    response: String,
    #[serde(rename = "Search", default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "imdbID")]
    imdb_id: Option<String>,
}

impl SearchResponse {
    fn into_ids(self) -> Result<Vec<String>, LookupError> {
        if self.response != "True" {
            return Err(LookupError::NotFound);
        }
        Ok(self.search.into_iter().filter_map(|hit| hit.imdb_id).collect())
    }
}
