//! Persistence Layer
//!
//! SQLite storage for investment models and rebalance records, async via
//! sqlx. Nested aggregates (positions, portfolio attachments, per-portfolio
//! rebalance results) are stored as JSON in TEXT columns.
//!
//! # Database Schema
//!
//! ## investment_models
//! - id: TEXT primary key
//! - name: TEXT, unique
//! - version: INTEGER, optimistic-concurrency counter
//! - last_rebalance_date: DATETIME, nullable
//! - positions: TEXT (JSON array)
//! - portfolio_ids: TEXT (JSON array)
//!
//! ## rebalance_records
//! - rebalance_id: TEXT primary key
//! - model_id / model_name: TEXT
//! - rebalance_date: DATETIME
//! - portfolios: TEXT (JSON array of per-portfolio results)

pub mod models;
pub mod repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Database initialization and query errors
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Query error: {0}")]
    QueryError(String),
}

/// Initialize the database connection pool and run migrations.
pub async fn init_database(database_url: &str) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", database_url);

    // Ensure data directory exists
    if let Some(db_path) = database_url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .log_statements(tracing::log::LevelFilter::Debug);

    // In-memory databases live per connection, so the pool must not fan out.
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized");
    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS investment_models (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            version INTEGER NOT NULL,
            last_rebalance_date DATETIME,
            positions TEXT NOT NULL,
            portfolio_ids TEXT NOT NULL,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create investment_models table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rebalance_records (
            rebalance_id TEXT PRIMARY KEY,
            model_id TEXT NOT NULL,
            model_name TEXT NOT NULL,
            rebalance_date DATETIME NOT NULL,
            portfolios TEXT NOT NULL,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create rebalance_records table: {}", e))
    })?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_rebalance_records_model_id ON rebalance_records(model_id)",
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_rebalance_records_date ON rebalance_records(rebalance_date)",
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;

    info!("Database migrations completed");
    Ok(())
}
