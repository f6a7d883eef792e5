//! Database layer
//!
//! SQLite storage for the NCO portal: the connection pool, embedded
//! migrations and one repository per entity.
//!
//! # Usage
//!
//! ```ignore
//! use nco_portal::config::DatabaseConfig;
//! use nco_portal::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{create_pool, create_test_pool, ping, DbPool};
