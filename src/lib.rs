//! DB Admin Core Library
//!
//! A connection registry plus per-engine adapters (MySQL, PostgreSQL, SQLite)
//! for schema introspection and database administration behind one interface.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{Config, SystemSchemas};
pub use db::{ConnectionRegistry, DatabaseAdapter};
pub use error::{DbError, DbResult};
