//! Error types for the connection registry and engine adapters.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Variants follow the domain taxonomy (connection, unsupported engine/operation,
//! not found, introspection, duplicate identifier) so that a request-handling layer
//! can map them onto its own transport-level representation via [`DbError::kind`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Unsupported database engine: {engine}")]
    UnsupportedEngine { engine: String },

    #[error("Operation '{operation}' is not supported by {engine}")]
    UnsupportedOperation { operation: String, engine: String },

    #[error("{object_type} not found: {name}")]
    NotFound { object_type: String, name: String },

    #[error("Introspection failed: {message} (object: {object})")]
    Introspection { message: String, object: String },

    #[error("Connection '{connection_id}' already exists")]
    DuplicateIdentifier { connection_id: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P04" for duplicate database
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Failed to close {} connection(s): {}", .failures.len(), format_failures(.failures))]
    CloseAll { failures: Vec<(String, String)> },
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(id, err)| format!("{id}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Transport-agnostic error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    UnsupportedEngine,
    UnsupportedOperation,
    NotFound,
    Introspection,
    DuplicateIdentifier,
    Database,
    InvalidInput,
    Internal,
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an unsupported engine error.
    pub fn unsupported_engine(engine: impl Into<String>) -> Self {
        Self::UnsupportedEngine {
            engine: engine.into(),
        }
    }

    /// Create an unsupported operation error.
    pub fn unsupported_operation(operation: impl Into<String>, engine: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
            engine: engine.into(),
        }
    }

    /// Create a not found error for an arbitrary object type.
    pub fn not_found(object_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            object_type: object_type.into(),
            name: name.into(),
        }
    }

    /// Create a connection not found error.
    pub fn connection_not_found(connection_id: impl Into<String>) -> Self {
        Self::not_found("Connection", connection_id)
    }

    /// Create an introspection error.
    pub fn introspection(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Introspection {
            message: message.into(),
            object: object.into(),
        }
    }

    /// Create a duplicate identifier error.
    pub fn duplicate_identifier(connection_id: impl Into<String>) -> Self {
        Self::DuplicateIdentifier {
            connection_id: connection_id.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classify this error for the outer layer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } => ErrorKind::Connection,
            Self::UnsupportedEngine { .. } => ErrorKind::UnsupportedEngine,
            Self::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Introspection { .. } => ErrorKind::Introspection,
            Self::DuplicateIdentifier { .. } => ErrorKind::DuplicateIdentifier,
            Self::Database { .. } => ErrorKind::Database,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Internal { .. } | Self::CloseAll { .. } => ErrorKind::Internal,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::DuplicateIdentifier { .. } => {
                Some("Close the existing connection first or use a different connection ID")
            }
            _ => None,
        }
    }

    /// Check if retrying the same call could succeed. Nothing in this crate retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the statement and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::introspection("No rows returned", "query"),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => DbError::connection(
                "Connection is no longer available",
                "Reconnect to the database",
            ),
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::introspection(format!("Type not found: {}", type_name), type_name)
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::introspection(format!("Column not found: {}", col), col)
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database(
            "database \"shopdb\" already exists",
            Some("42P04".to_string()),
            "Pick another name",
        );
        assert_eq!(err.suggestion(), Some("Pick another name"));
        assert!(DbError::not_found("Table", "users").suggestion().is_none());
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(!DbError::duplicate_identifier("c1").is_retryable());
        assert!(!DbError::unsupported_operation("create_database", "SQLite").is_retryable());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            DbError::connection_not_found("c1").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            DbError::unsupported_engine("oracle").kind(),
            ErrorKind::UnsupportedEngine
        );
        assert_eq!(
            DbError::unsupported_operation("drop_database", "SQLite").kind(),
            ErrorKind::UnsupportedOperation
        );
        assert_eq!(
            DbError::introspection("Table 'x' not found", "x").kind(),
            ErrorKind::Introspection
        );
        assert_eq!(
            DbError::duplicate_identifier("c1").kind(),
            ErrorKind::DuplicateIdentifier
        );
        assert_eq!(
            DbError::CloseAll { failures: vec![] }.kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_not_found_message() {
        let err = DbError::connection_not_found("c9");
        assert_eq!(err.to_string(), "Connection not found: c9");
    }

    #[test]
    fn test_close_all_message_lists_failures() {
        let err = DbError::CloseAll {
            failures: vec![
                ("a".to_string(), "broken pipe".to_string()),
                ("b".to_string(), "reset".to_string()),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 connection(s)"));
        assert!(msg.contains("a: broken pipe"));
        assert!(msg.contains("b: reset"));
    }

    #[test]
    fn test_sqlx_io_error_maps_to_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: DbError = sqlx::Error::Io(io).into();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_introspection() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind(), ErrorKind::Introspection);
    }
}
