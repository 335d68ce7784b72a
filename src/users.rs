//! User accounts.
//!
//! Emails are stored trimmed with the domain part lowercased, so lookups and
//! the UNIQUE constraint ignore the case of the domain only.

use anyhow::Result;
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::auth::hash_password;
use crate::error::{is_unique_violation, ApiError, ApiResult};
use crate::models::{Page, PageRequest, User};

const MIN_PASSWORD_CHARS: usize = 8;

pub(crate) const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, \
     is_staff, is_superuser, is_active, created_at, updated_at";

/// Registration payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewUser {
    pub email: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    /// Only settable from the CLI.
    #[serde(skip)]
    pub is_superuser: bool,
}

/// Update payload. With `partial == false` (PUT) email and password are
/// required; with `partial == true` (PATCH) absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Trims and lowercases the domain part. The local part keeps its case.
pub fn normalize_email(email: &str) -> String {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{}@{}", local, domain.to_lowercase()),
        None => email.to_string(),
    }
}

fn validate_email(email: &str) -> ApiResult<String> {
    let email = normalize_email(email);
    if email.is_empty() {
        return Err(ApiError::invalid("email", "Email is required"));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(ApiError::invalid("email", "Enter a valid email address")),
    }
}

fn validate_password(password: &str) -> ApiResult<()> {
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(ApiError::invalid(
            "password",
            "Password must be at least 8 characters",
        ));
    }
    Ok(())
}

pub(crate) fn user_from_row(row: &SqliteRow) -> User {
    user_from_row_prefixed(row, "")
}

/// Read a user from a row whose user columns carry `prefix` (joins).
pub(crate) fn user_from_row_prefixed(row: &SqliteRow, prefix: &str) -> User {
    let col = |name: &str| format!("{}{}", prefix, name);
    User {
        id: row.get(col("id").as_str()),
        email: row.get(col("email").as_str()),
        password_hash: row.get(col("password_hash").as_str()),
        first_name: row.get(col("first_name").as_str()),
        last_name: row.get(col("last_name").as_str()),
        is_staff: row.get(col("is_staff").as_str()),
        is_superuser: row.get(col("is_superuser").as_str()),
        is_active: row.get(col("is_active").as_str()),
        created_at: row.get(col("created_at").as_str()),
        updated_at: row.get(col("updated_at").as_str()),
    }
}

pub async fn create_user(pool: &SqlitePool, new: NewUser, iterations: u32) -> ApiResult<User> {
    let email = validate_email(new.email.as_deref().unwrap_or(""))?;
    let password = new
        .password
        .as_deref()
        .ok_or_else(|| ApiError::invalid("password", "Password is required"))?;
    validate_password(password)?;

    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();
    let hash = hash_password(password, iterations);

    let inserted = sqlx::query(
        r#"
        INSERT INTO users (id, email, password_hash, first_name, last_name,
                           is_staff, is_superuser, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&email)
    .bind(&hash)
    .bind(new.first_name.trim())
    .bind(new.last_name.trim())
    .bind(new.is_superuser)
    .bind(new.is_superuser)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await;

    match inserted {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(ApiError::Conflict(
                "A user with this email already exists".to_string(),
            ))
        }
        Err(e) => return Err(e.into()),
    }

    info!(user_id = %id, superuser = new.is_superuser, "user created");
    get_user(pool, &id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("user {} vanished after insert", id).into())
}

pub async fn get_user(pool: &SqlitePool, id: &str) -> Result<Option<User>> {
    let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(user_from_row))
}

pub async fn find_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    let row = sqlx::query(&format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS))
        .bind(normalize_email(email))
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(user_from_row))
}

/// All users, oldest first.
pub async fn list_users(pool: &SqlitePool, page: PageRequest) -> Result<Page<User>> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query(&format!(
        "SELECT {} FROM users ORDER BY created_at, email LIMIT ? OFFSET ?",
        USER_COLUMNS
    ))
    .bind(page.page_size)
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    Ok(Page {
        count,
        page: page.page,
        page_size: page.page_size,
        results: rows.iter().map(user_from_row).collect(),
    })
}

pub async fn update_user(
    pool: &SqlitePool,
    existing: &User,
    update: UserUpdate,
    partial: bool,
    iterations: u32,
) -> ApiResult<User> {
    if !partial {
        if update.email.is_none() {
            return Err(ApiError::invalid("email", "Email is required"));
        }
        if update.password.is_none() {
            return Err(ApiError::invalid("password", "Password is required"));
        }
    }

    let email = match update.email.as_deref() {
        Some(raw) => validate_email(raw)?,
        None => existing.email.clone(),
    };
    let password_hash = match update.password.as_deref() {
        Some(raw) => {
            validate_password(raw)?;
            hash_password(raw, iterations)
        }
        None => existing.password_hash.clone(),
    };
    let first_name = update
        .first_name
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| existing.first_name.clone());
    let last_name = update
        .last_name
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| existing.last_name.clone());

    let updated = sqlx::query(
        r#"
        UPDATE users
        SET email = ?, password_hash = ?, first_name = ?, last_name = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&email)
    .bind(&password_hash)
    .bind(&first_name)
    .bind(&last_name)
    .bind(chrono::Utc::now().timestamp())
    .bind(&existing.id)
    .execute(pool)
    .await;

    match updated {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(ApiError::Conflict(
                "A user with this email already exists".to_string(),
            ))
        }
        Err(e) => return Err(e.into()),
    }

    get_user(pool, &existing.id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// Delete a user; their reviews go with them. Returns `false` if absent.
pub async fn delete_user(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// CLI entry point for `user create`.
pub async fn run_create_user(
    pool: &SqlitePool,
    email: &str,
    password: &str,
    superuser: bool,
    iterations: u32,
) -> Result<()> {
    let user = create_user(
        pool,
        NewUser {
            email: Some(email.to_string()),
            password: Some(password.to_string()),
            is_superuser: superuser,
            ..Default::default()
        },
        iterations,
    )
    .await
    .map_err(|e| anyhow::anyhow!("{}", e))?;

    println!("Created user {} ({})", user.email, user.id);
    if user.is_superuser {
        println!("  superuser: yes");
    }
    Ok(())
}
