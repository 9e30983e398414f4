use crate::config::DatabaseConfig;
use sqlx::migrate::Migrator;
use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;
use tracing::debug;

/// Pool store schema, embedded at build time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to create database pool: {0}")]
    PoolCreation(sqlx::Error),

    #[error("Database query error: {0}")]
    Query(sqlx::Error),

    #[error("Database connection timeout")]
    ConnectionTimeout,

    #[error("Database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => DatabaseError::ConnectionTimeout,
            other => DatabaseError::Query(other),
        }
    }
}

/// Connect with the configured limits and make sure the server answers
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout())
        .idle_timeout(config.idle_timeout())
        .max_lifetime(config.max_lifetime())
        .test_before_acquire(config.test_before_acquire)
        .connect(&config.url)
        .await
        .map_err(DatabaseError::PoolCreation)?;

    health_check(&pool).await.map_err(|e| match e {
        DatabaseError::Query(inner) => DatabaseError::PoolCreation(inner),
        other => other,
    })?;

    Ok(pool)
}

/// Round-trip a trivial query
pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::query("SELECT 1").execute(pool).await?;
    debug!(
        size = pool.size(),
        idle = pool.num_idle(),
        "Database health check passed"
    );
    Ok(())
}

/// Apply the embedded pools/bets/snapshots/event_log migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), DatabaseError> {
    MIGRATOR.run(pool).await?;
    Ok(())
}
