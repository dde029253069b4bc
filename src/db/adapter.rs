//! The uniform adapter contract implemented once per engine.
//!
//! Every adapter owns at most one live driver connection. The connection sits
//! in a [`ConnectionSlot`], whose async mutex serializes all calls made through
//! the same adapter, so concurrent callers never interleave session state on a
//! single underlying link.

use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnInfo, ConnectionDescriptor, DatabaseInfo, DatabaseType, ForeignKey, ForeignKeyAction,
    IndexInfo, KeyRole, TableInfo, TablePreview, TableStructure,
};
use async_trait::async_trait;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::warn;

/// Rows returned by `preview_table` when no limit is given.
pub const DEFAULT_PREVIEW_LIMIT: u32 = 100;

/// Upper bound for `preview_table`.
pub const MAX_PREVIEW_LIMIT: u32 = 1000;

/// Longest database name accepted by `create_database` / `drop_database`.
pub const MAX_DATABASE_NAME_LEN: usize = 64;

/// Engine-specific implementation of connection management and introspection.
///
/// Adapters are created disconnected by the registry, connected once, and shared
/// behind an `Arc` for the lifetime of their registry entry.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync + std::fmt::Debug {
    /// Engine this adapter talks to.
    fn db_type(&self) -> DatabaseType;

    /// Open the underlying link and run a validation statement.
    ///
    /// Only returns `Ok` when the validation succeeded. Any failure is a
    /// [`DbError::Connection`].
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> DbResult<()>;

    /// Release the underlying link. Calling this on a disconnected adapter is a no-op.
    async fn disconnect(&self) -> DbResult<()>;

    /// Re-run the validation statement. Never fails: connectivity problems yield `false`.
    async fn test_connection(&self) -> bool;

    /// User-visible databases, system schemas excluded.
    async fn list_databases(&self) -> DbResult<Vec<String>>;

    /// Base tables of the currently bound database, ordered by name.
    async fn list_tables(&self) -> DbResult<Vec<String>>;

    /// Columns, keys, indexes and foreign keys of one table.
    ///
    /// Fails with [`DbError::Introspection`] when the table does not exist.
    async fn get_table_structure(&self, table: &str) -> DbResult<TableStructure>;

    async fn create_database(&self, name: &str) -> DbResult<()>;

    async fn drop_database(&self, name: &str) -> DbResult<()>;

    /// Human-readable size of the named database.
    async fn get_database_size(&self, name: &str) -> DbResult<String>;

    /// Number of base tables in the named database.
    async fn get_table_count(&self, name: &str) -> DbResult<u64>;

    /// Server (or library) version string.
    async fn server_version(&self) -> DbResult<String>;

    /// Tables of the bound database with best-effort row count and size.
    async fn list_table_infos(&self) -> DbResult<Vec<TableInfo>>;

    /// First rows of a table. `limit` defaults to [`DEFAULT_PREVIEW_LIMIT`] and is
    /// clamped to [`MAX_PREVIEW_LIMIT`].
    async fn preview_table(&self, table: &str, limit: Option<u32>) -> DbResult<TablePreview>;

    /// Databases with size and table count.
    ///
    /// Size and count are best-effort: when either fails for a database, that
    /// entry degrades to its name only and the listing continues.
    async fn describe_databases(&self) -> DbResult<Vec<DatabaseInfo>> {
        let names = self.list_databases().await?;
        let mut databases = Vec::with_capacity(names.len());

        for name in names {
            let size = self.get_database_size(&name).await;
            let count = self.get_table_count(&name).await;
            let info = match (size, count) {
                (Ok(size), Ok(count)) => DatabaseInfo::new(name)
                    .with_size(size)
                    .with_table_count(count),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(database = %name, error = %e, "Database details unavailable");
                    DatabaseInfo::new(name)
                }
            };
            databases.push(info);
        }

        Ok(databases)
    }
}

/// Holder for an adapter's single driver connection.
#[derive(Debug)]
pub(crate) struct ConnectionSlot<C> {
    engine: DatabaseType,
    inner: Mutex<Option<C>>,
}

impl<C: sqlx::Connection> ConnectionSlot<C> {
    pub(crate) fn new(engine: DatabaseType) -> Self {
        Self {
            engine,
            inner: Mutex::new(None),
        }
    }

    /// Lock the connection for the duration of one operation.
    pub(crate) async fn acquire(&self) -> DbResult<MappedMutexGuard<'_, C>> {
        let guard = self.inner.lock().await;
        MutexGuard::try_map(guard, Option::as_mut).map_err(|_| {
            DbError::connection(
                format!("{} adapter is not connected", self.engine),
                "Create the connection before using it",
            )
        })
    }

    /// Store a freshly validated connection, closing any previous one.
    pub(crate) async fn install(&self, conn: C) {
        let previous = self.inner.lock().await.replace(conn);
        if let Some(old) = previous {
            if let Err(e) = old.close().await {
                warn!(engine = %self.engine, error = %e, "Failed to close replaced connection");
            }
        }
    }

    /// Close the connection if one is held. Idempotent.
    pub(crate) async fn release(&self) -> DbResult<()> {
        let taken = self.inner.lock().await.take();
        match taken {
            Some(conn) => conn.close().await.map_err(DbError::from),
            None => Ok(()),
        }
    }
}

/// Statement used to validate a link on connect and in `test_connection`.
pub(crate) const VALIDATION_QUERY: &str = "SELECT 1";

/// Check a database name before it is spliced into DDL.
pub fn validate_database_name(name: &str) -> DbResult<()> {
    if name.trim().is_empty() {
        return Err(DbError::invalid_input("Database name cannot be empty"));
    }
    if name.chars().count() > MAX_DATABASE_NAME_LEN {
        return Err(DbError::invalid_input(format!(
            "Database name exceeds {} characters",
            MAX_DATABASE_NAME_LEN
        )));
    }
    if name.contains('\0') {
        return Err(DbError::invalid_input(
            "Database name cannot contain NUL bytes",
        ));
    }
    Ok(())
}

/// Quote an identifier with backticks (MySQL).
pub fn quote_backtick(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Quote an identifier with double quotes (PostgreSQL, SQLite).
pub fn quote_double(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Format a byte count as megabytes with two decimals; zero is `"0 MB"`.
pub fn format_megabytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 MB".to_string();
    }
    format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
}

pub fn clamp_preview_limit(limit: Option<u32>) -> u32 {
    limit
        .unwrap_or(DEFAULT_PREVIEW_LIMIT)
        .clamp(1, MAX_PREVIEW_LIMIT)
}

/// One row of a foreign-key catalog query, before grouping by constraint.
#[derive(Debug, Clone)]
pub(crate) struct ForeignKeyRow {
    pub constraint: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
    pub on_delete: String,
    pub on_update: String,
}

/// Collapse per-column rows into one `ForeignKey` per constraint, keeping first-seen order.
pub(crate) fn group_foreign_keys(rows: Vec<ForeignKeyRow>) -> Vec<ForeignKey> {
    let mut keys: Vec<(String, ForeignKey)> = Vec::new();

    for row in rows {
        match keys.iter_mut().find(|(name, _)| *name == row.constraint) {
            Some((_, fk)) => {
                fk.columns.push(row.column);
                fk.referenced_columns.push(row.referenced_column);
            }
            None => {
                let fk = ForeignKey::new(Some(row.constraint.clone()), row.referenced_table)
                    .with_column_pair(row.column, row.referenced_column)
                    .with_on_delete(ForeignKeyAction::parse(&row.on_delete))
                    .with_on_update(ForeignKeyAction::parse(&row.on_update));
                keys.push((row.constraint, fk));
            }
        }
    }

    keys.into_iter().map(|(_, fk)| fk).collect()
}

/// Fill in key roles for engines whose catalogs do not report them per column.
///
/// Primary key membership wins; otherwise a column leading a unique index is
/// `Unique`, and one leading any other index is `Index`.
pub(crate) fn assign_key_roles(
    columns: &mut [ColumnInfo],
    primary_keys: &[String],
    indexes: &[IndexInfo],
) {
    for column in columns.iter_mut().filter(|c| c.key.is_none()) {
        if primary_keys.contains(&column.name) {
            column.key = Some(KeyRole::Primary);
            continue;
        }
        let leading: Vec<&IndexInfo> = indexes
            .iter()
            .filter(|idx| idx.columns.first() == Some(&column.name))
            .collect();
        column.key = if leading.iter().any(|idx| idx.is_unique) {
            Some(KeyRole::Unique)
        } else if !leading.is_empty() {
            Some(KeyRole::Index)
        } else {
            None
        };
    }
}

/// Generate a helpful suggestion for connection errors.
pub(crate) fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            db_type
        );
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the username and password".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    match db_type {
        DatabaseType::PostgreSQL | DatabaseType::MySQL => {
            "Verify host, port and credentials".to_string()
        }
        DatabaseType::SQLite => "Verify the file path exists and is accessible".to_string(),
    }
}

/// Wrap a driver error raised while opening or validating a link.
pub(crate) fn connect_error(db_type: DatabaseType, error: sqlx::Error) -> DbError {
    DbError::connection(
        format!("Failed to connect: {}", error),
        connection_suggestion(db_type, &error),
    )
}

/// Wrap a driver error raised by a catalog query about `object`.
///
/// Lost connections stay connection errors; everything else is an introspection failure.
pub(crate) fn introspection_error(object: &str, error: sqlx::Error) -> DbError {
    match DbError::from(error) {
        e @ DbError::Connection { .. } => e,
        e => DbError::introspection(e.to_string(), object),
    }
}

/// Wrap a driver error raised while reading rows from `table`.
///
/// Undefined-table errors (SQLSTATE 42S02 / 42P01, SQLite's "no such table") become `NotFound`.
pub(crate) fn table_error(table: &str, error: sqlx::Error) -> DbError {
    if let sqlx::Error::Database(db_err) = &error {
        let missing = matches!(db_err.code().as_deref(), Some("42S02") | Some("42P01"))
            || db_err.message().starts_with("no such table");
        if missing {
            return DbError::not_found("Table", table);
        }
    }
    DbError::from(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_validate_database_name() {
        assert!(validate_database_name("shopdb").is_ok());
        assert!(validate_database_name("select").is_ok());
        assert_eq!(
            validate_database_name("").unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            validate_database_name(&"x".repeat(65)).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert!(validate_database_name(&"x".repeat(64)).is_ok());
        assert!(validate_database_name("bad\0name").is_err());
    }

    #[test]
    fn test_quote_identifiers() {
        assert_eq!(quote_backtick("order"), "`order`");
        assert_eq!(quote_backtick("we`ird"), "`we``ird`");
        assert_eq!(quote_double("user"), "\"user\"");
        assert_eq!(quote_double("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_format_megabytes() {
        assert_eq!(format_megabytes(0), "0 MB");
        assert_eq!(format_megabytes(13_107_200), "12.50 MB");
        assert_eq!(format_megabytes(8192), "0.01 MB");
    }

    #[test]
    fn test_clamp_preview_limit() {
        assert_eq!(clamp_preview_limit(None), DEFAULT_PREVIEW_LIMIT);
        assert_eq!(clamp_preview_limit(Some(5)), 5);
        assert_eq!(clamp_preview_limit(Some(0)), 1);
        assert_eq!(clamp_preview_limit(Some(50_000)), MAX_PREVIEW_LIMIT);
    }

    fn fk_row(constraint: &str, column: &str, table: &str, referenced: &str) -> ForeignKeyRow {
        ForeignKeyRow {
            constraint: constraint.to_string(),
            column: column.to_string(),
            referenced_table: table.to_string(),
            referenced_column: referenced.to_string(),
            on_delete: "CASCADE".to_string(),
            on_update: "NO ACTION".to_string(),
        }
    }

    #[test]
    fn test_group_foreign_keys_keeps_order_and_pairs() {
        let keys = group_foreign_keys(vec![
            fk_row("fk_b", "customer_id", "customers", "id"),
            fk_row("fk_a", "order_id", "orders", "id"),
            fk_row("fk_a", "order_rev", "orders", "rev"),
        ]);

        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].name.as_deref(), Some("fk_b"));
        assert_eq!(keys[1].columns, vec!["order_id", "order_rev"]);
        assert_eq!(keys[1].referenced_columns, vec!["id", "rev"]);
        assert_eq!(keys[1].on_delete, ForeignKeyAction::Cascade);
    }

    #[test]
    fn test_assign_key_roles() {
        let mut columns = vec![
            ColumnInfo::new("id", "integer", false),
            ColumnInfo::new("email", "text", false),
            ColumnInfo::new("customer_id", "integer", true),
            ColumnInfo::new("note", "text", true),
        ];
        let indexes = vec![
            IndexInfo::new("ux_email", vec!["email".to_string()], true),
            IndexInfo::new(
                "ix_customer",
                vec!["customer_id".to_string(), "note".to_string()],
                false,
            ),
        ];

        assign_key_roles(&mut columns, &["id".to_string()], &indexes);

        assert_eq!(columns[0].key, Some(KeyRole::Primary));
        assert_eq!(columns[1].key, Some(KeyRole::Unique));
        assert_eq!(columns[2].key, Some(KeyRole::Index));
        assert_eq!(columns[3].key, None);
    }

    #[test]
    fn test_introspection_error_keeps_connection_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert_eq!(
            introspection_error("users", sqlx::Error::Io(io)).kind(),
            ErrorKind::Connection
        );
        assert_eq!(
            introspection_error("users", sqlx::Error::RowNotFound).kind(),
            ErrorKind::Introspection
        );
    }

    /// Two databases; details for `broken` always fail.
    #[derive(Debug)]
    struct FlakyDetails;

    #[async_trait]
    impl DatabaseAdapter for FlakyDetails {
        fn db_type(&self) -> DatabaseType {
            DatabaseType::MySQL
        }
        async fn connect(&self, _descriptor: &ConnectionDescriptor) -> DbResult<()> {
            Ok(())
        }
        async fn disconnect(&self) -> DbResult<()> {
            Ok(())
        }
        async fn test_connection(&self) -> bool {
            true
        }
        async fn list_databases(&self) -> DbResult<Vec<String>> {
            Ok(vec!["broken".to_string(), "shop".to_string()])
        }
        async fn list_tables(&self) -> DbResult<Vec<String>> {
            Ok(Vec::new())
        }
        async fn get_table_structure(&self, table: &str) -> DbResult<TableStructure> {
            Err(DbError::introspection("no tables", table))
        }
        async fn create_database(&self, _name: &str) -> DbResult<()> {
            Ok(())
        }
        async fn drop_database(&self, _name: &str) -> DbResult<()> {
            Ok(())
        }
        async fn get_database_size(&self, _name: &str) -> DbResult<String> {
            Ok("1.00 MB".to_string())
        }
        async fn get_table_count(&self, name: &str) -> DbResult<u64> {
            if name == "broken" {
                Err(DbError::introspection("permission denied", name))
            } else {
                Ok(3)
            }
        }
        async fn server_version(&self) -> DbResult<String> {
            Ok("8.0".to_string())
        }
        async fn list_table_infos(&self) -> DbResult<Vec<TableInfo>> {
            Ok(Vec::new())
        }
        async fn preview_table(&self, table: &str, _limit: Option<u32>) -> DbResult<TablePreview> {
            Err(DbError::not_found("Table", table))
        }
    }

    #[tokio::test]
    async fn test_describe_databases_degrades_failing_entries() {
        let databases = FlakyDetails.describe_databases().await.unwrap();
        assert_eq!(
            databases,
            vec![
                DatabaseInfo::new("broken"),
                DatabaseInfo::new("shop")
                    .with_size("1.00 MB")
                    .with_table_count(3),
            ]
        );
        assert_eq!(databases[0].size, None);
        assert_eq!(databases[0].table_count, None);
    }
}
