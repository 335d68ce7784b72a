//! Review orchestration: validation, title resolution and ownership.
//!
//! A review names its movie by free-text title; the title is resolved through
//! the [`MovieResolver`] on create and whenever an update supplies a new one.
//! Each user can review a given movie once, and only the author can change or
//! delete a review.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::error::{is_unique_violation, ApiError, ApiResult};
use crate::models::{Movie, Page, PageRequest, Review, User};
use crate::movies::{self, movie_from_row};
use crate::resolver::MovieResolver;
use crate::users::user_from_row_prefixed;

const REVIEW_SELECT: &str = r#"
    SELECT r.id AS r_id, r.content AS r_content, r.rating AS r_rating,
           r.created_at AS r_created_at, r.updated_at AS r_updated_at,
           m.id, m.title, m.external_id, m.year, m.rated, m.released, m.runtime,
           m.genre, m.director, m.actors, m.plot, m.poster, m.imdb_rating,
           m.created_at, m.updated_at,
           u.id AS u_id, u.email AS u_email, u.password_hash AS u_password_hash,
           u.first_name AS u_first_name, u.last_name AS u_last_name,
           u.is_staff AS u_is_staff, u.is_superuser AS u_is_superuser,
           u.is_active AS u_is_active, u.created_at AS u_created_at,
           u.updated_at AS u_updated_at
    FROM reviews r
    JOIN movies m ON m.id = r.movie_id
    JOIN users u ON u.id = r.user_id
"#;

/// Create / update payload. `movie_title` names the movie; it is resolved,
/// never stored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewInput {
    pub movie_title: Option<String>,
    pub content: Option<String>,
    pub rating: Option<i64>,
}

/// Reviews for one movie with their average rating.
#[derive(Debug, Clone, Serialize)]
pub struct MovieReviews {
    pub movie: String,
    pub movie_id: i64,
    /// `0.0` when the movie has no reviews.
    pub average_rating: f64,
    pub count: i64,
    pub page: i64,
    pub page_size: i64,
    pub reviews: Vec<Review>,
}

fn review_from_row(row: &SqliteRow) -> Review {
    Review {
        id: row.get("r_id"),
        movie: movie_from_row(row),
        user: user_from_row_prefixed(row, "u_"),
        content: row.get("r_content"),
        rating: row.get("r_rating"),
        created_at: row.get("r_created_at"),
        updated_at: row.get("r_updated_at"),
    }
}

/// Only the author may modify a review.
pub fn can_modify(user: &User, review: &Review) -> bool {
    review.user.id == user.id
}

fn validate_rating(rating: i64) -> ApiResult<()> {
    if !(1..=5).contains(&rating) {
        return Err(ApiError::invalid("rating", "Rating must be between 1 and 5"));
    }
    Ok(())
}

fn required_text(value: Option<&str>, field: &'static str, message: &str) -> ApiResult<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ApiError::invalid(field, message)),
    }
}

fn duplicate_review() -> ApiError {
    ApiError::bad_request("You have already reviewed this movie")
}

pub async fn create_review(
    pool: &SqlitePool,
    resolver: &MovieResolver,
    author: &User,
    input: ReviewInput,
) -> ApiResult<Review> {
    let title = required_text(
        input.movie_title.as_deref(),
        "movie_title",
        "Movie title is required",
    )?;
    let content = required_text(
        input.content.as_deref(),
        "content",
        "Review content is required",
    )?;
    let rating = input
        .rating
        .ok_or_else(|| ApiError::invalid("rating", "Rating is required"))?;
    validate_rating(rating)?;

    let movie = match resolver.resolve(&title).await {
        Some(movie) => movie,
        None => return Err(unresolved_on_create(resolver, &title).await),
    };

    let now = chrono::Utc::now().timestamp();
    let inserted = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO reviews (movie_id, user_id, content, rating, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(movie.id)
    .bind(&author.id)
    .bind(&content)
    .bind(rating)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await;

    let id = match inserted {
        Ok(id) => id,
        Err(e) if is_unique_violation(&e) => return Err(duplicate_review()),
        Err(e) => return Err(e.into()),
    };

    info!(review_id = id, movie = %movie.title, user_id = %author.id, rating, "review created");
    fetch_existing(pool, id).await
}

/// Resolution failed: tell "exists upstream but could not be stored" apart
/// from "does not exist anywhere".
async fn unresolved_on_create(resolver: &MovieResolver, title: &str) -> ApiError {
    let found_upstream = !resolver.provider().search(title).await.is_empty();
    if found_upstream {
        warn!(title, "movie found upstream but could not be stored");
        ApiError::invalid(
            "movie_title",
            format!(
                "Found movie '{}' but couldn't add it to our database. Please try again or contact support.",
                title
            ),
        )
    } else {
        ApiError::invalid(
            "movie_title",
            format!(
                "Could not find any movie matching '{}'. Please check spelling or try another title.",
                title
            ),
        )
    }
}

pub async fn get_review(pool: &SqlitePool, id: i64) -> Result<Option<Review>> {
    let row = sqlx::query(&format!("{} WHERE r.id = ?", REVIEW_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(review_from_row))
}

async fn fetch_existing(pool: &SqlitePool, id: i64) -> ApiResult<Review> {
    get_review(pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Review not found"))
}

/// All reviews, newest first.
pub async fn list_reviews(pool: &SqlitePool, page: PageRequest) -> Result<Page<Review>> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews")
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query(&format!(
        "{} ORDER BY r.created_at DESC, r.id DESC LIMIT ? OFFSET ?",
        REVIEW_SELECT
    ))
    .bind(page.page_size)
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    Ok(Page {
        count,
        page: page.page,
        page_size: page.page_size,
        results: rows.iter().map(review_from_row).collect(),
    })
}

/// Update a review. `partial == false` (PUT) requires every field.
pub async fn update_review(
    pool: &SqlitePool,
    resolver: &MovieResolver,
    editor: &User,
    id: i64,
    input: ReviewInput,
    partial: bool,
) -> ApiResult<Review> {
    let existing = fetch_existing(pool, id).await?;
    if !can_modify(editor, &existing) {
        return Err(ApiError::forbidden());
    }

    if !partial {
        required_text(input.movie_title.as_deref(), "movie_title", "Movie title is required")?;
        required_text(input.content.as_deref(), "content", "Review content is required")?;
        if input.rating.is_none() {
            return Err(ApiError::invalid("rating", "Rating is required"));
        }
    }

    let content = match input.content.as_deref() {
        Some(raw) => required_text(Some(raw), "content", "Review content is required")?,
        None => existing.content.clone(),
    };
    let rating = input.rating.unwrap_or(existing.rating);
    validate_rating(rating)?;

    let movie: Movie = match input.movie_title.as_deref().map(str::trim) {
        Some(title) if !title.is_empty() => resolver.resolve(title).await.ok_or_else(|| {
            ApiError::invalid(
                "movie_title",
                format!("Could not find movie '{}'. Please check the title.", title),
            )
        })?,
        _ => existing.movie.clone(),
    };

    let updated = sqlx::query(
        "UPDATE reviews SET movie_id = ?, content = ?, rating = ?, updated_at = ? WHERE id = ?",
    )
    .bind(movie.id)
    .bind(&content)
    .bind(rating)
    .bind(chrono::Utc::now().timestamp())
    .bind(id)
    .execute(pool)
    .await;

    match updated {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => return Err(duplicate_review()),
        Err(e) => return Err(e.into()),
    }

    fetch_existing(pool, id).await
}

pub async fn delete_review(pool: &SqlitePool, editor: &User, id: i64) -> ApiResult<()> {
    let existing = fetch_existing(pool, id).await?;
    if !can_modify(editor, &existing) {
        return Err(ApiError::forbidden());
    }
    sqlx::query("DELETE FROM reviews WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    info!(review_id = id, user_id = %editor.id, "review deleted");
    Ok(())
}

/// Reviews of the movie matching `title`, newest first.
///
/// A stored movie whose title contains `title` is used as-is; otherwise the
/// title goes through the resolver.
pub async fn reviews_for_movie(
    pool: &SqlitePool,
    resolver: &MovieResolver,
    title: Option<&str>,
    page: PageRequest,
) -> ApiResult<MovieReviews> {
    let title = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::bad_request("Movie title parameter is required"))?;

    let local = movies::search_local(pool, title, 1).await?.into_iter().next();
    let movie = match local {
        Some(movie) => movie,
        None => resolver
            .resolve(title)
            .await
            .ok_or_else(|| ApiError::not_found(format!("Movie '{}' not found", title)))?,
    };

    let (count, average): (i64, Option<f64>) =
        sqlx::query_as("SELECT COUNT(*), AVG(rating) FROM reviews WHERE movie_id = ?")
            .bind(movie.id)
            .fetch_one(pool)
            .await?;

    let rows = sqlx::query(&format!(
        "{} WHERE r.movie_id = ? ORDER BY r.created_at DESC, r.id DESC LIMIT ? OFFSET ?",
        REVIEW_SELECT
    ))
    .bind(movie.id)
    .bind(page.page_size)
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    Ok(MovieReviews {
        movie: movie.title,
        movie_id: movie.id,
        average_rating: average.unwrap_or(0.0),
        count,
        page: page.page,
        page_size: page.page_size,
        reviews: rows.iter().map(review_from_row).collect(),
    })
}
