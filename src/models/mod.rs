//! Data models for the connection registry and engine adapters.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod schema;

// Re-export commonly used types
pub use connection::{ConnectionDescriptor, ConnectionInfo, DatabaseType};
pub use schema::{
    ColumnInfo, DatabaseInfo, ForeignKey, ForeignKeyAction, IndexInfo, KeyRole, TableInfo,
    TablePreview, TableStructure,
};
