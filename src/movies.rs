//! Movie persistence.
//!
//! The `movies` table is the resolver's cache. Rows are only created or
//! refreshed through [`upsert_movie`], keyed by title.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{Movie, Page, PageRequest};

/// Typed column values for an upsert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewMovie {
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
}

const MOVIE_COLUMNS: &str = "id, title, external_id, year, rated, released, runtime, genre, \
     director, actors, plot, poster, imdb_rating, created_at, updated_at";

pub(crate) fn movie_from_row(row: &SqliteRow) -> Movie {
    Movie {
        id: row.get("id"),
        title: row.get("title"),
        external_id: row.get("external_id"),
        year: row.get("year"),
        rated: row.get("rated"),
        released: row.get("released"),
        runtime: row.get("runtime"),
        genre: row.get("genre"),
        director: row.get("director"),
        actors: row.get("actors"),
        plot: row.get("plot"),
        poster: row.get("poster"),
        imdb_rating: row.get("imdb_rating"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Case-folded form of a title. Stored alongside each movie and used for
/// every lookup, so matching is case-insensitive beyond ASCII.
pub fn title_key(title: &str) -> String {
    title.to_lowercase()
}

/// Local cache lookup: exact case-insensitive title first, then substring.
///
/// Ties are broken by title order, so the result is stable.
pub async fn find_cached(pool: &SqlitePool, title: &str) -> Result<Option<Movie>> {
    let key = title_key(title);
    let exact = sqlx::query(&format!(
        "SELECT {} FROM movies WHERE title_key = ? ORDER BY title LIMIT 1",
        MOVIE_COLUMNS
    ))
    .bind(&key)
    .fetch_optional(pool)
    .await?;

    if let Some(row) = exact {
        return Ok(Some(movie_from_row(&row)));
    }

    let contains = sqlx::query(&format!(
        "SELECT {} FROM movies WHERE instr(title_key, ?) > 0 ORDER BY title LIMIT 1",
        MOVIE_COLUMNS
    ))
    .bind(&key)
    .fetch_optional(pool)
    .await?;

    Ok(contains.as_ref().map(movie_from_row))
}

/// Case-insensitive substring match on title, in title order.
pub async fn search_local(pool: &SqlitePool, term: &str, limit: i64) -> Result<Vec<Movie>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM movies WHERE instr(title_key, ?) > 0 ORDER BY title LIMIT ?",
        MOVIE_COLUMNS
    ))
    .bind(title_key(term))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(movie_from_row).collect())
}

/// Insert a movie or overwrite every descriptive field of the row with the
/// same title. A concurrent insert of the same title lands on the conflict
/// branch instead of failing.
pub async fn upsert_movie(pool: &SqlitePool, movie: &NewMovie) -> Result<Movie> {
    let now = chrono::Utc::now().timestamp();

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO movies (title, title_key, external_id, year, rated, released, runtime,
                            genre, director, actors, plot, poster, imdb_rating,
                            created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(title) DO UPDATE SET
            external_id = excluded.external_id,
            year = excluded.year,
            rated = excluded.rated,
            released = excluded.released,
            runtime = excluded.runtime,
            genre = excluded.genre,
            director = excluded.director,
            actors = excluded.actors,
            plot = excluded.plot,
            poster = excluded.poster,
            imdb_rating = excluded.imdb_rating,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(&movie.title)
    .bind(title_key(&movie.title))
    .bind(&movie.external_id)
    .bind(movie.year)
    .bind(&movie.rated)
    .bind(&movie.released)
    .bind(&movie.runtime)
    .bind(&movie.genre)
    .bind(&movie.director)
    .bind(&movie.actors)
    .bind(&movie.plot)
    .bind(&movie.poster)
    .bind(movie.imdb_rating)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    get_movie(pool, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("movie {} vanished after upsert", id))
}

pub async fn get_movie(pool: &SqlitePool, id: i64) -> Result<Option<Movie>> {
    let row = sqlx::query(&format!("SELECT {} FROM movies WHERE id = ?", MOVIE_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(movie_from_row))
}

/// All movies in title order, one page at a time.
pub async fn list_movies(pool: &SqlitePool, page: PageRequest) -> Result<Page<Movie>> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM movies")
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query(&format!(
        "SELECT {} FROM movies ORDER BY title LIMIT ? OFFSET ?",
        MOVIE_COLUMNS
    ))
    .bind(page.page_size)
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    Ok(Page {
        count,
        page: page.page,
        page_size: page.page_size,
        results: rows.iter().map(movie_from_row).collect(),
    })
}
