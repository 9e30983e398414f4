//! Postgres connection and migration helpers

pub mod pool;

pub use pool::{create_pool, health_check, run_migrations, DatabaseError};
