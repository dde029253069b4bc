//! Connection-related data models.
//!
//! This module defines the engine kind, the connection descriptor (with the
//! per-engine DSN rules) and the summary returned for a registered connection.

use crate::error::{DbError, DbResult};
use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Characters escaped in the userinfo and database parts of a DSN.
const USERINFO: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b':')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Get the default port for this database type.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::PostgreSQL => Some(5432),
            Self::MySQL => Some(3306),
            Self::SQLite => None,
        }
    }

    /// URL scheme used when building a DSN.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgresql",
            Self::MySQL => "mysql",
            Self::SQLite => "sqlite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for DatabaseType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySQL),
            "postgresql" | "postgres" | "pg" => Ok(Self::PostgreSQL),
            "sqlite" | "sqlite3" => Ok(Self::SQLite),
            other => Err(DbError::unsupported_engine(other)),
        }
    }
}

/// Everything needed to open a connection to one engine.
///
/// For SQLite, `database` holds the file path and the network fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub id: String,
    pub db_type: DatabaseType,
    pub host: String,
    /// Defaulted per engine when absent
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: String,
    /// Contains sensitive data - never log
    #[serde(skip_serializing, default)]
    pub password: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub ssl: bool,
}

impl ConnectionDescriptor {
    /// Create a descriptor for a server engine on `localhost` with no credentials.
    pub fn new(id: impl Into<String>, db_type: DatabaseType) -> Self {
        Self {
            id: id.into(),
            db_type,
            host: "localhost".to_string(),
            port: None,
            username: String::new(),
            password: String::new(),
            database: None,
            ssl: false,
        }
    }

    /// Create a SQLite descriptor backed by the file at `path`.
    pub fn sqlite(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(id, DatabaseType::SQLite).with_database(path)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    /// Explicit port, or the engine default.
    pub fn effective_port(&self) -> Option<u16> {
        self.port.or_else(|| self.db_type.default_port())
    }

    /// Database name (or file path), treating an empty string as absent.
    pub fn database_name(&self) -> Option<&str> {
        self.database.as_deref().filter(|db| !db.is_empty())
    }

    /// Validate the descriptor before any connection attempt.
    pub fn validate(&self) -> DbResult<()> {
        if self.id.trim().is_empty() {
            return Err(DbError::invalid_input("Connection ID cannot be empty"));
        }
        match self.db_type {
            DatabaseType::SQLite if self.database_name().is_none() => Err(DbError::connection(
                "SQLite requires a database file path",
                "Set the database field to the path of the SQLite file",
            )),
            DatabaseType::MySQL | DatabaseType::PostgreSQL if self.host.trim().is_empty() => {
                Err(DbError::connection(
                    format!("{} requires a host", self.db_type),
                    "Set the host field, e.g. localhost",
                ))
            }
            _ => Ok(()),
        }
    }

    /// Build the engine-specific DSN.
    ///
    /// - MySQL: `mysql://<user>:<password>@<host>:<port or 3306>/<database-or-empty>`
    /// - PostgreSQL: `postgresql://<user>:<password>@<host>:<port or 5432>/<database-or-empty>`
    /// - SQLite: the file path
    ///
    /// The database segment is percent-encoded. Adapters build driver options
    /// from the descriptor fields directly and do not parse this string.
    pub fn dsn(&self) -> DbResult<String> {
        self.validate()?;
        Ok(self.build_dsn(&self.password))
    }

    /// DSN with the password replaced, safe for logs.
    pub fn masked_dsn(&self) -> String {
        if self.db_type == DatabaseType::SQLite {
            return self.database_name().unwrap_or_default().to_string();
        }
        let mask = if self.password.is_empty() { "" } else { "****" };
        self.build_dsn(mask)
    }

    fn build_dsn(&self, password: &str) -> String {
        match self.db_type {
            DatabaseType::SQLite => self.database_name().unwrap_or_default().to_string(),
            DatabaseType::MySQL | DatabaseType::PostgreSQL => format!(
                "{}://{}:{}@{}:{}/{}",
                self.db_type.scheme(),
                utf8_percent_encode(&self.username, USERINFO),
                utf8_percent_encode(password, USERINFO),
                self.url_host(),
                self.effective_port().unwrap_or_default(),
                utf8_percent_encode(self.database_name().unwrap_or_default(), USERINFO),
            ),
        }
    }

    /// Host as it appears in a URL: IPv6 literals are bracketed.
    fn url_host(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}

/// Information about an active connection, returned after successful connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub database_type: DatabaseType,
    /// Empty for SQLite
    pub host: String,
    pub port: Option<u16>,
    /// Database name, or file path for SQLite. None when no database is bound.
    pub database: Option<String>,
    pub ssl: bool,
    pub server_version: Option<String>,
    pub connected_at: DateTime<Utc>,
}

impl ConnectionInfo {
    pub(crate) fn new(descriptor: &ConnectionDescriptor, server_version: Option<String>) -> Self {
        let is_sqlite = descriptor.db_type == DatabaseType::SQLite;
        Self {
            connection_id: descriptor.id.clone(),
            database_type: descriptor.db_type,
            host: if is_sqlite {
                String::new()
            } else {
                descriptor.host.clone()
            },
            port: descriptor.effective_port(),
            database: descriptor.database_name().map(String::from),
            ssl: descriptor.ssl,
            server_version,
            connected_at: Utc::now(),
        }
    }
}
