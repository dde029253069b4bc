//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - The uniform adapter contract and its per-engine implementations
//! - The connection registry
//! - Row value decoding for table previews

pub mod adapter;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod registry;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod types;

pub use adapter::{DEFAULT_PREVIEW_LIMIT, DatabaseAdapter, MAX_PREVIEW_LIMIT};
#[cfg(feature = "mysql")]
pub use mysql::MySqlAdapter;
#[cfg(feature = "postgres")]
pub use postgres::PostgresAdapter;
pub use registry::{ConnectionEntry, ConnectionRegistry, build_adapter};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteAdapter;
