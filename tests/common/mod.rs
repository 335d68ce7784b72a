//! Shared fixtures: an in-process fake OMDb server, temp configs, and a
//! running API on a free port.

#![allow(dead_code)]

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use movie_review::config::Config;
use movie_review::server::{self, AppState};

pub const API_KEY: &str = "test-key";

/// Ids returned for the term `batman`, in ranking order. The third one fails
/// its detail lookup.
pub const BATMAN_IDS: [&str; 7] = [
    "tt0000001", "tt0000002", "tt0000003", "tt0000004", "tt0000005", "tt0000006", "tt0000007",
];
pub const FAILING_ID: &str = "tt0000003";

#[derive(Default)]
pub struct Counters {
    pub total: AtomicUsize,
    pub by_title: AtomicUsize,
    pub by_id: AtomicUsize,
    pub searches: AtomicUsize,
}

impl Counters {
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
    pub fn by_title(&self) -> usize {
        self.by_title.load(Ordering::SeqCst)
    }
    pub fn by_id(&self) -> usize {
        self.by_id.load(Ordering::SeqCst)
    }
    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

struct FakeState {
    counters: Arc<Counters>,
    titles: Vec<Value>,
    /// Delay applied to title lookups, to widen race windows.
    delay: Duration,
}

pub struct FakeOmdb {
    pub addr: SocketAddr,
    pub counters: Arc<Counters>,
}

impl FakeOmdb {
    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }
}

fn record(title: &str, year: &str, id: &str, rating: &str) -> Value {
    json!({
        "Response": "True",
        "Title": title,
        "Year": year,
        "Rated": "R",
        "Released": "14 Oct 1994",
        "Runtime": "142 min",
        "Genre": "Drama",
        "Director": "Someone",
        "Actors": "A, B",
        "Plot": "Something happens.",
        "Poster": "N/A",
        "imdbID": id,
        "imdbRating": rating,
    })
}

fn catalog() -> Vec<Value> {
    let mut titles = vec![
        record("The Shawshank Redemption", "1994", "tt0111161", "9.3"),
        record("Friends", "1994–2004", "tt0108778", "8.9"),
        record("Obscure Film", "N/A", "tt9999999", "N/A"),
        record("Inception", "2010", "tt1375666", "8.8"),
        record("Heat", "1995", "tt0113277", "8.3"),
        record("Amélie", "2001", "tt0211915", "8.3"),
    ];
    for (n, id) in BATMAN_IDS.iter().enumerate() {
        titles.push(record(&format!("Batman {}", n + 1), "2000", id, "7.0"));
    }
    titles
}

pub async fn start_fake_omdb() -> FakeOmdb {
    start_fake_omdb_with_delay(Duration::ZERO).await
}

pub async fn start_fake_omdb_with_delay(delay: Duration) -> FakeOmdb {
    let counters = Arc::new(Counters::default());
    let state = Arc::new(FakeState {
        counters: counters.clone(),
        titles: catalog(),
        delay,
    });
    let app = Router::new().route("/", get(handle_omdb)).with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeOmdb { addr, counters }
}

async fn handle_omdb(
    State(state): State<Arc<FakeState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.counters.total.fetch_add(1, Ordering::SeqCst);

    if params.get("apikey").map(String::as_str) != Some(API_KEY) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"Response": "False", "Error": "Invalid API key!"})),
        )
            .into_response();
    }

    let not_found = || Json(json!({"Response": "False", "Error": "Movie not found!"})).into_response();

    if let Some(title) = params.get("t") {
        state.counters.by_title.fetch_add(1, Ordering::SeqCst);
        if !state.delay.is_zero() {
            tokio::time::sleep(state.delay).await;
        }
        if title == "Broken Upstream" {
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
        return state
            .titles
            .iter()
            .find(|r| r["Title"].as_str().is_some_and(|t| t.eq_ignore_ascii_case(title)))
            .map(|r| Json(r.clone()).into_response())
            .unwrap_or_else(not_found);
    }

    if let Some(id) = params.get("i") {
        state.counters.by_id.fetch_add(1, Ordering::SeqCst);
        if id == FAILING_ID {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        return state
            .titles
            .iter()
            .find(|r| r["imdbID"].as_str() == Some(id.as_str()))
            .map(|r| Json(r.clone()).into_response())
            .unwrap_or_else(not_found);
    }

    if let Some(term) = params.get("s") {
        state.counters.searches.fetch_add(1, Ordering::SeqCst);
        if term.eq_ignore_ascii_case("batman") {
            let hits: Vec<Value> = BATMAN_IDS
                .iter()
                .enumerate()
                .map(|(n, id)| json!({"Title": format!("Batman {}", n + 1), "imdbID": id}))
                .collect();
            return Json(json!({"Response": "True", "totalResults": "7", "Search": hits}))
                .into_response();
        }
        let hits: Vec<Value> = state
            .titles
            .iter()
            .filter(|r| {
                r["Title"]
                    .as_str()
                    .is_some_and(|t| t.to_lowercase().contains(&term.to_lowercase()))
            })
            .map(|r| json!({"Title": r["Title"], "imdbID": r["imdbID"]}))
            .collect();
        if hits.is_empty() {
            return not_found();
        }
        return Json(json!({"Response": "True", "Search": hits})).into_response();
    }

    not_found()
}

/// A validated config pointing at `omdb_url`, with its database under `dir`.
pub fn test_config(dir: &Path, omdb_url: &str) -> Config {
    test_config_with_key(dir, omdb_url, API_KEY)
}

pub fn test_config_with_key(dir: &Path, omdb_url: &str, api_key: &str) -> Config {
    let text = format!(
        r#"
[db]
path = "{}/data/mreview.sqlite"

[server]
bind = "127.0.0.1:0"

[omdb]
api_key = "{}"
base_url = "{}"
timeout_secs = 2

[auth]
jwt_secret = "integration-secret"
password_iterations = 1
"#,
        dir.display(),
        api_key,
        omdb_url
    );
    let config: Config = toml::from_str(&text).unwrap();
    config.validate().unwrap();
    config
}

/// Start the API on a free port. Returns its base URL and state.
pub async fn start_app(config: &Config) -> (String, AppState) {
    let state = server::build_state(config).await.unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let served = state.clone();
    tokio::spawn(async move {
        server::serve(listener, served).await.unwrap();
    });
    (format!("http://{}", addr), state)
}
