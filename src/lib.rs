//! # Movie Review
//!
//! A movie-review backend whose reviews name their movie by free-text title.
//! Titles are resolved against a local SQLite cache first and an
//! OMDb-compatible metadata provider second; whatever the provider returns is
//! stored so the next lookup is local.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────┐   ┌──────────┐   ┌──────────────┐   ┌───────────┐
//!  │   HTTP   │──▶│ Reviews  │──▶│   Resolver   │──▶│ OMDb API  │
//!  │  (axum)  │   │ / Search │   │ cache → miss │   │ (reqwest) │
//!  └──────────┘   └────┬─────┘   └──────┬───────┘   └───────────┘
//!                      │                │
//!                      ▼                ▼
//!                 ┌──────────────────────────┐
//!                 │   SQLite (users, movies, │
//!                 │         reviews)         │
//!                 └──────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`models`] | Core data types |
//! | [`omdb`] | Metadata provider client |
//! | [`movies`] | Movie cache storage |
//! | [`resolver`] | Title → stored movie |
//! | [`search`] | Local + provider search |
//! | [`reviews`] | Review orchestration |
//! | [`users`] | User accounts |
//! | [`auth`] | Passwords, tokens, request authentication |
//! | [`error`] | HTTP error type |
//! | [`extract`] | Request extractors with JSON error bodies |
//! | [`server`] | HTTP API |

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod migrate;
pub mod models;
pub mod movies;
pub mod omdb;
pub mod resolver;
pub mod reviews;
pub mod search;
pub mod server;
pub mod users;
