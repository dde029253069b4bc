//! SQLite adapter.
//!
//! A SQLite "database" is a single file. The adapter exposes it under the
//! logical name `main` and leaves file creation and removal to the caller.

use crate::db::adapter::{
    ConnectionSlot, DatabaseAdapter, ForeignKeyRow, VALIDATION_QUERY, assign_key_roles,
    clamp_preview_limit, connect_error, format_megabytes, group_foreign_keys, introspection_error,
    quote_double, table_error,
};
use crate::db::types::rows_to_preview;
use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnInfo, ConnectionDescriptor, DatabaseType, IndexInfo, TableInfo, TablePreview,
    TableStructure,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{Connection, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Logical name of the only database a SQLite connection exposes.
pub const MAIN_DATABASE: &str = "main";

const IN_MEMORY: &str = ":memory:";

mod queries {
    pub const LIST_TABLES: &str = r#"
        SELECT name FROM sqlite_master
        WHERE type = 'table'
        AND name NOT LIKE 'sqlite_%'
        ORDER BY name
        "#;

    pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT name, type, "notnull" AS not_null, dflt_value, pk
        FROM pragma_table_info(?)
        ORDER BY cid
        "#;

    pub const LIST_INDEXES: &str = r#"
        SELECT name, "unique" AS is_unique, origin
        FROM pragma_index_list(?)
        ORDER BY name
        "#;

    pub const INDEX_COLUMNS: &str = "SELECT name FROM pragma_index_info(?) ORDER BY seqno";

    pub const DESCRIBE_FOREIGN_KEYS: &str = r#"
        SELECT id, seq, "table" AS referenced_table, "from" AS column_name,
               "to" AS referenced_column, on_update, on_delete
        FROM pragma_foreign_key_list(?)
        ORDER BY id, seq
        "#;

    pub const PRIMARY_KEY_COLUMNS: &str =
        "SELECT name FROM pragma_table_info(?) WHERE pk > 0 ORDER BY pk";

    pub const TABLE_SIZE: &str = "SELECT SUM(pgsize) AS size_bytes FROM dbstat WHERE name = ?";

    pub const SERVER_VERSION: &str = "SELECT sqlite_version()";
}

/// Adapter for SQLite database files.
#[derive(Debug)]
pub struct SqliteAdapter {
    conn: ConnectionSlot<SqliteConnection>,
    /// Backing file of the current connection; `None` when disconnected or in memory.
    path: Mutex<Option<PathBuf>>,
}

impl SqliteAdapter {
    pub fn new() -> Self {
        Self {
            conn: ConnectionSlot::new(DatabaseType::SQLite),
            path: Mutex::new(None),
        }
    }

    fn connect_options(descriptor: &ConnectionDescriptor) -> DbResult<SqliteConnectOptions> {
        let path = descriptor.dsn()?;
        if path == IN_MEMORY {
            return SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
                DbError::connection(
                    format!("Invalid SQLite connection string: {}", e),
                    "Use a file path or :memory:",
                )
            });
        }

        if let Some(parent) = Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(DbError::connection(
                    format!("Directory does not exist: {}", parent.display()),
                    "Verify the file path exists and is accessible",
                ));
            }
        }

        Ok(SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true))
    }

    fn backing_file(&self) -> Option<PathBuf> {
        self.path
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_backing_file(&self, path: Option<PathBuf>) {
        *self.path.lock().unwrap_or_else(PoisonError::into_inner) = path;
    }

    async fn fetch_columns(
        conn: &mut SqliteConnection,
        table: &str,
    ) -> DbResult<(Vec<ColumnInfo>, Vec<String>)> {
        let rows = sqlx::query(queries::DESCRIBE_COLUMNS)
            .bind(table)
            .fetch_all(conn)
            .await
            .map_err(|e| introspection_error(table, e))?;

        let mut keyed: Vec<(i64, String)> = Vec::new();
        let columns = rows
            .iter()
            .map(|row| {
                let name: String = row.get("name");
                let data_type: String = row.try_get("type").unwrap_or_default();
                let not_null: i64 = row.try_get("not_null").unwrap_or(0);
                let default_value: Option<String> = row.try_get("dflt_value").ok().flatten();
                let pk: i64 = row.try_get("pk").unwrap_or(0);
                if pk > 0 {
                    keyed.push((pk, name.clone()));
                }
                ColumnInfo::new(name, data_type, not_null == 0).with_default(default_value)
            })
            .collect();

        keyed.sort_by_key(|(position, _)| *position);
        let primary_keys = keyed.into_iter().map(|(_, name)| name).collect();
        Ok((columns, primary_keys))
    }

    /// Indexes other than the implicit primary-key index.
    async fn fetch_indexes(conn: &mut SqliteConnection, table: &str) -> DbResult<Vec<IndexInfo>> {
        let rows = sqlx::query(queries::LIST_INDEXES)
            .bind(table)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| introspection_error(table, e))?;

        let mut indexes = Vec::new();
        for row in &rows {
            let origin: String = row.try_get("origin").unwrap_or_default();
            if origin == "pk" {
                continue;
            }
            let name: String = row.get("name");
            let is_unique: i64 = row.try_get("is_unique").unwrap_or(0);

            let columns: Vec<String> = sqlx::query(queries::INDEX_COLUMNS)
                .bind(&name)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| introspection_error(table, e))?
                .iter()
                .filter_map(|r| r.try_get::<Option<String>, _>("name").ok().flatten())
                .collect();

            if !columns.is_empty() {
                indexes.push(IndexInfo::new(name, columns, is_unique != 0));
            }
        }
        Ok(indexes)
    }

    async fn fetch_foreign_keys(
        conn: &mut SqliteConnection,
        table: &str,
    ) -> DbResult<Vec<ForeignKeyRow>> {
        let rows = sqlx::query(queries::DESCRIBE_FOREIGN_KEYS)
            .bind(table)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| introspection_error(table, e))?;

        let mut parent_keys: HashMap<String, Vec<String>> = HashMap::new();
        let mut foreign_keys = Vec::with_capacity(rows.len());
        for row in &rows {
            let referenced_table: String = row.get("referenced_table");
            let explicit: Option<String> = row
                .try_get::<Option<String>, _>("referenced_column")
                .ok()
                .flatten();

            // NULL when the reference targets the parent's primary key implicitly
            let referenced_column = match explicit {
                Some(column) => column,
                None => {
                    if !parent_keys.contains_key(&referenced_table) {
                        let keys = Self::fetch_primary_key_columns(&mut *conn, &referenced_table)
                            .await
                            .map_err(|e| introspection_error(table, e))?;
                        parent_keys.insert(referenced_table.clone(), keys);
                    }
                    let seq: i64 = row.try_get("seq").unwrap_or(0);
                    parent_keys
                        .get(&referenced_table)
                        .and_then(|keys| usize::try_from(seq).ok().and_then(|i| keys.get(i)))
                        .cloned()
                        .unwrap_or_default()
                }
            };

            foreign_keys.push(ForeignKeyRow {
                constraint: row.get::<i64, _>("id").to_string(),
                column: row.get("column_name"),
                referenced_table,
                referenced_column,
                on_delete: row.try_get("on_delete").unwrap_or_default(),
                on_update: row.try_get("on_update").unwrap_or_default(),
            });
        }
        Ok(foreign_keys)
    }

    async fn fetch_primary_key_columns(
        conn: &mut SqliteConnection,
        table: &str,
    ) -> Result<Vec<String>, sqlx::Error> {
        Ok(sqlx::query(queries::PRIMARY_KEY_COLUMNS)
            .bind(table)
            .fetch_all(conn)
            .await?
            .iter()
            .map(|row| row.get("name"))
            .collect())
    }

    async fn fetch_table_size(conn: &mut SqliteConnection, table: &str) -> Option<u64> {
        // dbstat is an optional compile-time extension
        sqlx::query(queries::TABLE_SIZE)
            .bind(table)
            .fetch_one(conn)
            .await
            .ok()
            .and_then(|row| row.try_get::<Option<i64>, _>("size_bytes").ok().flatten())
            .and_then(|size| u64::try_from(size).ok())
    }
}

impl Default for SqliteAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseAdapter for SqliteAdapter {
    fn db_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> DbResult<()> {
        let options = Self::connect_options(descriptor)?;
        let mut conn = SqliteConnection::connect_with(&options)
            .await
            .map_err(|e| connect_error(DatabaseType::SQLite, e))?;

        if let Err(e) = sqlx::query(VALIDATION_QUERY).execute(&mut conn).await {
            let _ = conn.close().await;
            return Err(connect_error(DatabaseType::SQLite, e));
        }

        self.conn.install(conn).await;
        let path = descriptor
            .database_name()
            .filter(|p| *p != IN_MEMORY)
            .map(PathBuf::from);
        self.set_backing_file(path);
        info!(path = %descriptor.masked_dsn(), "SQLite connection established");
        Ok(())
    }

    async fn disconnect(&self) -> DbResult<()> {
        self.set_backing_file(None);
        self.conn.release().await
    }

    async fn test_connection(&self) -> bool {
        let Ok(mut conn) = self.conn.acquire().await else {
            return false;
        };
        sqlx::query(VALIDATION_QUERY)
            .execute(&mut *conn)
            .await
            .is_ok()
    }

    async fn list_databases(&self) -> DbResult<Vec<String>> {
        Ok(vec![MAIN_DATABASE.to_string()])
    }

    async fn list_tables(&self) -> DbResult<Vec<String>> {
        let mut conn = self.conn.acquire().await?;
        let tables: Vec<String> = sqlx::query_scalar(queries::LIST_TABLES)
            .fetch_all(&mut *conn)
            .await?;

        debug!(count = tables.len(), "Listed SQLite tables");
        Ok(tables)
    }

    async fn get_table_structure(&self, table: &str) -> DbResult<TableStructure> {
        let mut conn = self.conn.acquire().await?;

        let (mut columns, primary_keys) = Self::fetch_columns(&mut conn, table).await?;
        if columns.is_empty() {
            return Err(DbError::introspection(
                format!("Table '{}' not found", table),
                table,
            ));
        }

        let indexes = Self::fetch_indexes(&mut conn, table).await?;
        let mut foreign_keys =
            group_foreign_keys(Self::fetch_foreign_keys(&mut conn, table).await?);
        // SQLite constraints are anonymous; the grouping key is the pragma id
        for fk in &mut foreign_keys {
            fk.name = None;
        }
        assign_key_roles(&mut columns, &primary_keys, &indexes);

        Ok(TableStructure::new(
            table,
            columns,
            primary_keys,
            indexes,
            foreign_keys,
        ))
    }

    async fn create_database(&self, _name: &str) -> DbResult<()> {
        Err(DbError::unsupported_operation(
            "create_database",
            DatabaseType::SQLite.display_name(),
        ))
    }

    async fn drop_database(&self, _name: &str) -> DbResult<()> {
        Err(DbError::unsupported_operation(
            "drop_database",
            DatabaseType::SQLite.display_name(),
        ))
    }

    /// Size of the backing file. The name is ignored: a SQLite connection has one database.
    async fn get_database_size(&self, _name: &str) -> DbResult<String> {
        let bytes = match self.backing_file() {
            Some(path) => match tokio::fs::metadata(&path).await {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
                Err(e) => {
                    return Err(DbError::introspection(
                        format!("Cannot stat database file: {}", e),
                        path.display().to_string(),
                    ));
                }
            },
            None => 0,
        };
        Ok(format_megabytes(bytes))
    }

    async fn get_table_count(&self, _name: &str) -> DbResult<u64> {
        Ok(self.list_tables().await?.len() as u64)
    }

    async fn server_version(&self) -> DbResult<String> {
        let mut conn = self.conn.acquire().await?;
        let version: String = sqlx::query_scalar(queries::SERVER_VERSION)
            .fetch_one(&mut *conn)
            .await?;
        Ok(version)
    }

    async fn list_table_infos(&self) -> DbResult<Vec<TableInfo>> {
        let mut conn = self.conn.acquire().await?;
        let names: Vec<String> = sqlx::query_scalar(queries::LIST_TABLES)
            .fetch_all(&mut *conn)
            .await?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let count_sql = format!("SELECT COUNT(*) FROM {}", quote_double(&name));
            let mut table = TableInfo::new(name.as_str());
            if let Ok(count) = sqlx::query_scalar::<_, i64>(&count_sql)
                .fetch_one(&mut *conn)
                .await
            {
                table = table.with_row_count(u64::try_from(count).unwrap_or(0));
            }
            if let Some(size) = Self::fetch_table_size(&mut conn, &name).await {
                table = table.with_size_bytes(size);
            }
            tables.push(table);
        }
        Ok(tables)
    }

    async fn preview_table(&self, table: &str, limit: Option<u32>) -> DbResult<TablePreview> {
        let sql = format!(
            "SELECT * FROM {} LIMIT {}",
            quote_double(table),
            clamp_preview_limit(limit)
        );

        let rows = {
            let mut conn = self.conn.acquire().await?;
            sqlx::query(&sql)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| table_error(table, e))?
        };

        let mut preview = rows_to_preview(table, &rows);
        if preview.columns.is_empty() {
            preview.columns = self
                .get_table_structure(table)
                .await?
                .columns
                .into_iter()
                .map(|c| c.name)
                .collect();
        }
        Ok(preview)
    }
}
