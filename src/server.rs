//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `GET` | `/` | no | Welcome message |
//! | `GET` | `/health` | no | Health check (returns version) |
//! | `POST` | `/api/v1/auth/login` | no | Email + password → token pair |
//! | `POST` | `/api/v1/auth/refresh` | no | Refresh token → access token |
//! | `GET` | `/api/v1/auth/me` | yes | Current user |
//! | `POST` | `/api/v1/users` | no | Register |
//! | `GET` | `/api/v1/users` | yes | List users |
//! | `GET` `PUT` `PATCH` `DELETE` | `/api/v1/users/{id}` | self for writes | One user |
//! | `GET` | `/api/v1/movies` | yes | List cached movies |
//! | `GET` | `/api/v1/movies/search?q=` | yes | Local + provider search |
//! | `GET` | `/api/v1/movies/{id}` | yes | One movie |
//! | `GET` `POST` | `/api/v1/reviews` | yes | List (newest first) / create |
//! | `GET` | `/api/v1/reviews/by-movie?title=` | yes | Reviews of one movie + average |
//! | `GET` `PUT` `PATCH` `DELETE` | `/api/v1/reviews/{id}` | author for writes | One review |
//!
//! List endpoints take `page` and `page_size` and answer
//! `{count, page, page_size, results}`. Authenticated routes expect
//! `Authorization: Bearer <access token>`. Errors use the body described in
//! [`crate::error`].
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{self, AuthUser, LoginResponse, RefreshResponse, TokenIssuer};
use crate::config::Config;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::migrate::run_migrations;
use crate::models::{Movie, Page, PageRequest, Review, User};
use crate::movies;
use crate::omdb::{MetadataProvider, OmdbClient};
use crate::resolver::MovieResolver;
use crate::reviews::{self, MovieReviews, ReviewInput};
use crate::search::{self, SearchResults};
use crate::users::{self, NewUser, UserUpdate};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub resolver: Arc<MovieResolver>,
    pub tokens: Arc<TokenIssuer>,
}

impl AppState {
    pub fn new(config: Config, pool: SqlitePool, provider: Arc<dyn MetadataProvider>) -> Self {
        Self {
            tokens: Arc::new(TokenIssuer::new(&config.auth)),
            resolver: Arc::new(MovieResolver::new(pool.clone(), provider)),
            config: Arc::new(config),
            pool,
        }
    }

    fn password_iterations(&self) -> u32 {
        self.config.auth.password_iterations
    }
}

/// Open the database, apply migrations and build the provider client.
pub async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let pool = db::connect(config).await?;
    run_migrations(&pool).await?;
    let provider = Arc::new(OmdbClient::new(&config.omdb)?);
    Ok(AppState::new(config.clone(), pool, provider))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/auth/login", post(handle_login))
        .route("/auth/refresh", post(handle_refresh))
        .route("/auth/me", get(handle_me))
        .route("/users", get(handle_list_users).post(handle_register))
        .route(
            "/users/{id}",
            get(handle_get_user)
                .put(handle_put_user)
                .patch(handle_patch_user)
                .delete(handle_delete_user),
        )
        .route("/movies", get(handle_list_movies))
        .route("/movies/search", get(handle_search_movies))
        .route("/movies/{id}", get(handle_get_movie))
        .route("/reviews", get(handle_list_reviews).post(handle_create_review))
        .route("/reviews/by-movie", get(handle_reviews_for_movie))
        .route(
            "/reviews/{id}",
            get(handle_get_review)
                .put(handle_put_review)
                .patch(handle_patch_review)
                .delete(handle_delete_review),
        );

    Router::new()
        .route("/", get(handle_welcome))
        .route("/health", get(handle_health))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API on an already-bound listener until the process exits.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Starts the HTTP server on `[server].bind`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = build_state(config).await?;
    let listener = TcpListener::bind(&config.server.bind).await?;

    info!(bind = %config.server.bind, "server listening");
    println!("Movie review API listening on http://{}", config.server.bind);

    serve(listener, state).await
}

// ============ Query parameters ============

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    page: Option<i64>,
    page_size: Option<i64>,
}

impl PageQuery {
    fn request(&self) -> PageRequest {
        PageRequest::new(self.page, self.page_size)
    }
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ByMovieQuery {
    title: Option<String>,
    page: Option<i64>,
    page_size: Option<i64>,
}

// ============ Meta ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_welcome() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Welcome to the Movie Review API",
        "docs": "/api/v1",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ============ Auth ============

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    refresh: Option<String>,
}

async fn handle_login(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let response = auth::login(
        &state.pool,
        &state.tokens,
        body.email.as_deref(),
        body.password.as_deref(),
    )
    .await?;
    Ok(Json(response))
}

async fn handle_refresh(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RefreshRequest>,
) -> ApiResult<Json<RefreshResponse>> {
    let response = auth::refresh(&state.pool, &state.tokens, body.refresh.as_deref()).await?;
    Ok(Json(response))
}

async fn handle_me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

// ============ Users ============

async fn handle_register(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<NewUser>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let user = users::create_user(&state.pool, body, state.password_iterations()).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn handle_list_users(
    State(state): State<AppState>,
    _auth: AuthUser,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> ApiResult<Json<Page<User>>> {
    Ok(Json(users::list_users(&state.pool, query.request()).await?))
}

async fn handle_get_user(
    State(state): State<AppState>,
    _auth: AuthUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<User>> {
    let user = users::get_user(&state.pool, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(user))
}

/// Accounts can only be changed by their owner.
async fn own_account(state: &AppState, caller: &User, id: &str) -> ApiResult<User> {
    let target = users::get_user(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    if target.id != caller.id {
        return Err(ApiError::forbidden());
    }
    Ok(target)
}

async fn update_user(
    state: AppState,
    caller: User,
    id: String,
    body: UserUpdate,
    partial: bool,
) -> ApiResult<Json<User>> {
    let target = own_account(&state, &caller, &id).await?;
    let user = users::update_user(
        &state.pool,
        &target,
        body,
        partial,
        state.password_iterations(),
    )
    .await?;
    Ok(Json(user))
}

async fn handle_put_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(body): ApiJson<UserUpdate>,
) -> ApiResult<Json<User>> {
    update_user(state, caller, id, body, false).await
}

async fn handle_patch_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(body): ApiJson<UserUpdate>,
) -> ApiResult<Json<User>> {
    update_user(state, caller, id, body, true).await
}

async fn handle_delete_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<StatusCode> {
    let target = own_account(&state, &caller, &id).await?;
    users::delete_user(&state.pool, &target.id).await?;
    info!(user_id = %target.id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ============ Movies ============

async fn handle_list_movies(
    State(state): State<AppState>,
    _auth: AuthUser,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> ApiResult<Json<Page<Movie>>> {
    Ok(Json(movies::list_movies(&state.pool, query.request()).await?))
}

async fn handle_get_movie(
    State(state): State<AppState>,
    _auth: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Movie>> {
    let movie = movies::get_movie(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Movie not found"))?;
    Ok(Json(movie))
}

async fn handle_search_movies(
    State(state): State<AppState>,
    _auth: AuthUser,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> ApiResult<Json<SearchResults>> {
    let term = query.q.unwrap_or_default();
    let results = search::search_movies(&state.pool, state.resolver.provider().as_ref(), &term)
        .await
        .map_err(|e| ApiError::invalid("q", e.to_string()))?;
    Ok(Json(results))
}

// ============ Reviews ============

async fn handle_list_reviews(
    State(state): State<AppState>,
    _auth: AuthUser,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> ApiResult<Json<Page<Review>>> {
    Ok(Json(
        reviews::list_reviews(&state.pool, query.request()).await?,
    ))
}

async fn handle_create_review(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<ReviewInput>,
) -> ApiResult<(StatusCode, Json<Review>)> {
    let review = reviews::create_review(&state.pool, &state.resolver, &user, body).await?;
    Ok((StatusCode::CREATED, Json(review)))
}

async fn handle_get_review(
    State(state): State<AppState>,
    _auth: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Review>> {
    let review = reviews::get_review(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Review not found"))?;
    Ok(Json(review))
}

async fn handle_put_review(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<ReviewInput>,
) -> ApiResult<Json<Review>> {
    let review =
        reviews::update_review(&state.pool, &state.resolver, &user, id, body, false).await?;
    Ok(Json(review))
}

async fn handle_patch_review(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<ReviewInput>,
) -> ApiResult<Json<Review>> {
    let review =
        reviews::update_review(&state.pool, &state.resolver, &user, id, body, true).await?;
    Ok(Json(review))
}

async fn handle_delete_review(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<StatusCode> {
    reviews::delete_review(&state.pool, &user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_reviews_for_movie(
    State(state): State<AppState>,
    _auth: AuthUser,
    ApiQuery(query): ApiQuery<ByMovieQuery>,
) -> ApiResult<Json<MovieReviews>> {
    let page = PageRequest::new(query.page, query.page_size);
    let found =
        reviews::reviews_for_movie(&state.pool, &state.resolver, query.title.as_deref(), page)
            .await?;
    Ok(Json(found))
}
