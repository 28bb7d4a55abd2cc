//! Cache database setup
//!
//! Creates the SQLite database when missing, opens the pool and applies the
//! embedded migrations.

use crate::config::DatabaseConfig;
use crate::error::CacheResult;
use sqlx::migrate::{MigrateDatabase, Migrator};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// Embedded migrations of the `migrations` folder
static MIGRATOR: Migrator = sqlx::migrate!();

/// Create the SQLite database if it doesn't already exist
pub async fn create_database(url: &str) -> CacheResult<()> {
    if !Sqlite::database_exists(url).await? {
        info!("Creating cache database");
        Sqlite::create_database(url).await?;
    }
    Ok(())
}

/// Apply pending migrations
pub async fn run_pending_migrations(pool: &SqlitePool) -> CacheResult<()> {
    MIGRATOR.run(pool).await?;
    debug!("Cache schema is up to date");
    Ok(())
}

/// Open a pool on `url` with foreign keys enforced
pub async fn connection_pool(url: &str, max_connections: u32) -> CacheResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Open the configured cache, creating and migrating it as needed
pub async fn connect(config: &DatabaseConfig) -> CacheResult<SqlitePool> {
    let url = config.url.expose_secret();
    if !url.contains(":memory:") && !url.contains("mode=memory") {
        create_database(url).await?;
    }
    let pool = connection_pool(url, config.max_connections).await?;
    run_pending_migrations(&pool).await?;
    info!(url = %config.url.masked(), "Cache database ready");
    Ok(pool)
}

/// Private in-memory cache on a single connection
///
/// Every connection to `sqlite::memory:` opens a distinct database, hence the
/// single connection.
pub async fn memory_pool() -> CacheResult<SqlitePool> {
    let pool = connection_pool("sqlite::memory:", 1).await?;
    run_pending_migrations(&pool).await?;
    Ok(pool)
}
