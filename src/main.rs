//! # Movie review CLI (`mreview`)
//!
//! ## Usage
//!
//! ```bash
//! mreview --config ./config/mreview.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mreview init` | Create the SQLite database and run schema migrations |
//! | `mreview serve` | Start the HTTP API |
//! | `mreview resolve "<title>"` | Resolve a title through the cache and the provider |
//! | `mreview search "<term>"` | Search the local cache and the provider |
//! | `mreview user create --email … --password …` | Create an account |
//!
//! Log verbosity follows `RUST_LOG` when set, `[log].level` otherwise. Logs go
//! to stderr; command output goes to stdout.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use movie_review::config::{self, Config};
use movie_review::omdb::OmdbClient;
use movie_review::resolver::MovieResolver;
use movie_review::{db, migrate, search, server, users};

/// Movie review service: reviews keyed by free-text titles, backed by an
/// OMDb-compatible metadata provider.
#[derive(Parser)]
#[command(name = "mreview", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mreview.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Resolve a title to a stored movie, fetching it on a cache miss.
    Resolve {
        /// Free-text movie title.
        title: String,
    },

    /// Search local movies and the metadata provider.
    Search {
        /// Search term (at least 2 characters).
        term: String,
    },

    /// Manage user accounts.
    User {
        #[command(subcommand)]
        action: UserAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a user account.
    Create {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Grant staff and superuser flags.
        #[arg(long)]
        superuser: bool,
    },
}

fn init_tracing(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg);

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Resolve { title } => {
            let pool = db::connect(&cfg).await?;
            let provider = Arc::new(OmdbClient::new(&cfg.omdb)?);
            let resolver = MovieResolver::new(pool, provider);
            match resolver.resolve(&title).await {
                Some(movie) => println!("{}", serde_json::to_string_pretty(&movie)?),
                None => println!("No movie found for '{}'.", title),
            }
        }
        Commands::Search { term } => {
            let pool = db::connect(&cfg).await?;
            let provider = OmdbClient::new(&cfg.omdb)?;
            search::run_search(&pool, &provider, &term).await?;
        }
        Commands::User { action } => match action {
            UserAction::Create {
                email,
                password,
                superuser,
            } => {
                let pool = db::connect(&cfg).await?;
                users::run_create_user(
                    &pool,
                    &email,
                    &password,
                    superuser,
                    cfg.auth.password_iterations,
                )
                .await?;
            }
        },
    }

    Ok(())
}
