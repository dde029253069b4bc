//! MySQL / MariaDB adapter.
//!
//! Introspection is scoped to `DATABASE()`, the schema bound by the connection.
//! A connection made without a database therefore sees no tables.

use crate::db::adapter::{
    ConnectionSlot, DatabaseAdapter, ForeignKeyRow, VALIDATION_QUERY, clamp_preview_limit,
    connect_error, format_megabytes, group_foreign_keys, introspection_error, quote_backtick,
    table_error, validate_database_name,
};
use crate::db::types::rows_to_preview;
use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnInfo, ConnectionDescriptor, DatabaseType, IndexInfo, KeyRole, TableInfo, TablePreview,
    TableStructure,
};
use async_trait::async_trait;
use sqlx::mysql::{
    MySqlConnectOptions, MySqlConnection, MySqlDatabaseError, MySqlRow, MySqlSslMode,
};
use sqlx::{Connection, Executor, Row};
use tracing::{debug, info};

mod queries {
    pub const LIST_DATABASES: &str = "SHOW DATABASES";

    pub const LIST_TABLES: &str = r#"
        SELECT CONVERT(TABLE_NAME USING utf8mb4) AS TABLE_NAME
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = DATABASE()
        AND TABLE_TYPE = 'BASE TABLE'
        ORDER BY TABLE_NAME
        "#;

    pub const LIST_TABLE_INFOS: &str = r#"
        SELECT
            CONVERT(TABLE_NAME USING utf8mb4) AS TABLE_NAME,
            CAST(DATA_LENGTH + COALESCE(INDEX_LENGTH, 0) AS UNSIGNED) AS TOTAL_SIZE,
            TABLE_ROWS AS ROW_COUNT
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = DATABASE()
        AND TABLE_TYPE = 'BASE TABLE'
        ORDER BY TABLE_NAME
        "#;

    pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8mb4) AS COLUMN_NAME,
            CONVERT(COLUMN_TYPE USING utf8mb4) AS COLUMN_TYPE,
            CONVERT(IS_NULLABLE USING utf8mb4) AS IS_NULLABLE,
            CONVERT(COLUMN_DEFAULT USING utf8mb4) AS COLUMN_DEFAULT,
            CONVERT(COLUMN_KEY USING utf8mb4) AS COLUMN_KEY,
            CONVERT(EXTRA USING utf8mb4) AS EXTRA
        FROM information_schema.COLUMNS
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = DATABASE()
        ORDER BY ORDINAL_POSITION
        "#;

    pub const DESCRIBE_INDEXES: &str = r#"
        SELECT
            CONVERT(INDEX_NAME USING utf8mb4) AS INDEX_NAME,
            CONVERT(COLUMN_NAME USING utf8mb4) AS COLUMN_NAME,
            NOT NON_UNIQUE AS IS_UNIQUE
        FROM information_schema.STATISTICS
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = DATABASE()
        ORDER BY INDEX_NAME, SEQ_IN_INDEX
        "#;

    pub const DESCRIBE_FOREIGN_KEYS: &str = r#"
        SELECT
            CONVERT(k.CONSTRAINT_NAME USING utf8mb4) AS CONSTRAINT_NAME,
            CONVERT(k.COLUMN_NAME USING utf8mb4) AS COLUMN_NAME,
            CONVERT(k.REFERENCED_TABLE_NAME USING utf8mb4) AS REFERENCED_TABLE_NAME,
            CONVERT(k.REFERENCED_COLUMN_NAME USING utf8mb4) AS REFERENCED_COLUMN_NAME,
            CONVERT(r.DELETE_RULE USING utf8mb4) AS DELETE_RULE,
            CONVERT(r.UPDATE_RULE USING utf8mb4) AS UPDATE_RULE
        FROM information_schema.KEY_COLUMN_USAGE k
        JOIN information_schema.REFERENTIAL_CONSTRAINTS r
            ON r.CONSTRAINT_SCHEMA = k.CONSTRAINT_SCHEMA
            AND r.CONSTRAINT_NAME = k.CONSTRAINT_NAME
        WHERE k.TABLE_NAME = ?
        AND k.TABLE_SCHEMA = DATABASE()
        AND k.REFERENCED_TABLE_NAME IS NOT NULL
        ORDER BY k.CONSTRAINT_NAME, k.ORDINAL_POSITION
        "#;

    pub const DATABASE_SIZE: &str = r#"
        SELECT CAST(COALESCE(SUM(DATA_LENGTH + INDEX_LENGTH), 0) AS UNSIGNED) AS SIZE_BYTES
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = ?
        "#;

    pub const TABLE_COUNT: &str = r#"
        SELECT COUNT(*) AS TABLE_COUNT
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'
        "#;

    pub const SERVER_VERSION: &str = "SELECT version()";
}

/// Try to get a u64 value from a row, handling MySQL version differences.
/// MySQL 5.x may return BIGINT (i64), MySQL 8.x returns BIGINT UNSIGNED (u64).
fn try_get_u64(row: &MySqlRow, column: &str) -> Option<u64> {
    if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(column) {
        return Some(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(column) {
        return u64::try_from(v).ok();
    }
    None
}

/// Safely get a string from a MySQL row.
/// MySQL may return VARBINARY instead of VARCHAR depending on charset configuration.
fn get_string(row: &MySqlRow, column: &str) -> String {
    get_optional_string(row, column).unwrap_or_default()
}

fn get_optional_string(row: &MySqlRow, column: &str) -> Option<String> {
    row.try_get::<Option<String>, _>(column)
        .ok()
        .flatten()
        .or_else(|| {
            row.try_get::<Option<Vec<u8>>, _>(column)
                .ok()
                .flatten()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
}

fn get_string_by_index(row: &MySqlRow, index: usize) -> Option<String> {
    row.try_get::<String, _>(index).ok().or_else(|| {
        row.try_get::<Vec<u8>, _>(index)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    })
}

/// Adapter for MySQL and MariaDB servers.
#[derive(Debug)]
pub struct MySqlAdapter {
    conn: ConnectionSlot<MySqlConnection>,
    system_schemas: Vec<String>,
}

impl MySqlAdapter {
    /// Create a disconnected adapter that hides `system_schemas` from database listings.
    pub fn new(system_schemas: Vec<String>) -> Self {
        Self {
            conn: ConnectionSlot::new(DatabaseType::MySQL),
            system_schemas,
        }
    }

    fn is_system_schema(&self, name: &str) -> bool {
        self.system_schemas
            .iter()
            .any(|s| s.eq_ignore_ascii_case(name))
    }

    fn connect_options(descriptor: &ConnectionDescriptor) -> DbResult<MySqlConnectOptions> {
        descriptor.validate()?;
        let mut options = MySqlConnectOptions::new()
            .host(&descriptor.host)
            .port(descriptor.effective_port().unwrap_or(3306))
            .charset("utf8mb4");
        if !descriptor.username.is_empty() {
            options = options.username(&descriptor.username);
        }
        if !descriptor.password.is_empty() {
            options = options.password(&descriptor.password);
        }
        if let Some(database) = descriptor.database_name() {
            options = options.database(database);
        }

        Ok(if descriptor.ssl {
            options.ssl_mode(MySqlSslMode::Required)
        } else {
            options
        })
    }

    async fn fetch_columns(conn: &mut MySqlConnection, table: &str) -> DbResult<Vec<ColumnInfo>> {
        let rows = sqlx::query(queries::DESCRIBE_COLUMNS)
            .bind(table)
            .fetch_all(conn)
            .await
            .map_err(|e| introspection_error(table, e))?;

        Ok(rows
            .iter()
            .map(|row| {
                let nullable = get_string(row, "IS_NULLABLE") == "YES";
                ColumnInfo::new(
                    get_string(row, "COLUMN_NAME"),
                    get_string(row, "COLUMN_TYPE"),
                    nullable,
                )
                .with_key(KeyRole::from_mysql(&get_string(row, "COLUMN_KEY")))
                .with_default(get_optional_string(row, "COLUMN_DEFAULT"))
                .with_extra(get_optional_string(row, "EXTRA"))
            })
            .collect())
    }

    /// Returns the primary key columns (from the `PRIMARY` index) and the remaining indexes.
    async fn fetch_indexes(
        conn: &mut MySqlConnection,
        table: &str,
    ) -> DbResult<(Vec<String>, Vec<IndexInfo>)> {
        let rows = sqlx::query(queries::DESCRIBE_INDEXES)
            .bind(table)
            .fetch_all(conn)
            .await
            .map_err(|e| introspection_error(table, e))?;

        Ok(group_index_rows(rows.iter().map(|row| IndexRow {
            index: get_string(row, "INDEX_NAME"),
            column: get_string(row, "COLUMN_NAME"),
            is_unique: row.try_get::<i64, _>("IS_UNIQUE").unwrap_or(0) != 0,
        })))
    }

    async fn fetch_foreign_keys(
        conn: &mut MySqlConnection,
        table: &str,
    ) -> DbResult<Vec<ForeignKeyRow>> {
        let rows = sqlx::query(queries::DESCRIBE_FOREIGN_KEYS)
            .bind(table)
            .fetch_all(conn)
            .await
            .map_err(|e| introspection_error(table, e))?;

        Ok(rows
            .iter()
            .map(|row| ForeignKeyRow {
                constraint: get_string(row, "CONSTRAINT_NAME"),
                column: get_string(row, "COLUMN_NAME"),
                referenced_table: get_string(row, "REFERENCED_TABLE_NAME"),
                referenced_column: get_string(row, "REFERENCED_COLUMN_NAME"),
                on_delete: get_string(row, "DELETE_RULE"),
                on_update: get_string(row, "UPDATE_RULE"),
            })
            .collect())
    }
}

/// One `information_schema.STATISTICS` row: a column of an index.
struct IndexRow {
    index: String,
    column: String,
    is_unique: bool,
}

/// Fold per-column rows (ordered by index, then position) into the primary
/// key columns and the remaining indexes.
fn group_index_rows(rows: impl IntoIterator<Item = IndexRow>) -> (Vec<String>, Vec<IndexInfo>) {
    let mut primary_keys = Vec::new();
    let mut indexes: Vec<IndexInfo> = Vec::new();

    for row in rows {
        // Functional key parts have no column name
        if row.column.is_empty() {
            continue;
        }
        if row.index == "PRIMARY" {
            primary_keys.push(row.column);
            continue;
        }
        match indexes.last_mut() {
            Some(last) if last.name == row.index => last.columns.push(row.column),
            _ => indexes.push(IndexInfo::new(row.index, vec![row.column], row.is_unique)),
        }
    }
    (primary_keys, indexes)
}

/// ER_DB_DROP_EXISTS: "Can't drop database; database doesn't exist"
const ER_DB_DROP_EXISTS: u16 = 1008;

fn drop_error(name: &str, err: sqlx::Error) -> DbError {
    if let sqlx::Error::Database(db_err) = &err {
        let missing = db_err
            .try_downcast_ref::<MySqlDatabaseError>()
            .is_some_and(|e| e.number() == ER_DB_DROP_EXISTS);
        if missing {
            return DbError::not_found("Database", name);
        }
    }
    err.into()
}

impl Default for MySqlAdapter {
    fn default() -> Self {
        Self::new(crate::config::SystemSchemas::default().mysql)
    }
}

#[async_trait]
impl DatabaseAdapter for MySqlAdapter {
    fn db_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> DbResult<()> {
        let options = Self::connect_options(descriptor)?;
        let mut conn = MySqlConnection::connect_with(&options)
            .await
            .map_err(|e| connect_error(DatabaseType::MySQL, e))?;

        if let Err(e) = sqlx::query(VALIDATION_QUERY).execute(&mut conn).await {
            let _ = conn.close().await;
            return Err(connect_error(DatabaseType::MySQL, e));
        }

        self.conn.install(conn).await;
        info!(dsn = %descriptor.masked_dsn(), ssl = descriptor.ssl, "MySQL connection established");
        Ok(())
    }

    async fn disconnect(&self) -> DbResult<()> {
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
        let mut conn = self.conn.acquire().await?;
        let rows = sqlx::query(queries::LIST_DATABASES)
            .fetch_all(&mut *conn)
            .await?;

        // SHOW DATABASES returns a single column "Database"
        let databases: Vec<String> = rows
            .iter()
            .filter_map(|row| get_string_by_index(row, 0))
            .filter(|name| !self.is_system_schema(name))
            .collect();

        debug!(count = databases.len(), "Listed MySQL databases");
        Ok(databases)
    }

    async fn list_tables(&self) -> DbResult<Vec<String>> {
        let mut conn = self.conn.acquire().await?;
        let rows = sqlx::query(queries::LIST_TABLES)
            .fetch_all(&mut *conn)
            .await?;

        let tables: Vec<String> = rows
            .iter()
            .map(|row| get_string(row, "TABLE_NAME"))
            .filter(|name| !name.is_empty())
            .collect();

        debug!(count = tables.len(), "Listed MySQL tables");
        Ok(tables)
    }

    async fn get_table_structure(&self, table: &str) -> DbResult<TableStructure> {
        let mut conn = self.conn.acquire().await?;

        let columns = Self::fetch_columns(&mut conn, table).await?;
        if columns.is_empty() {
            return Err(DbError::introspection(
                format!("Table '{}' not found", table),
                table,
            ));
        }

        let (primary_keys, indexes) = Self::fetch_indexes(&mut conn, table).await?;
        let foreign_keys = group_foreign_keys(Self::fetch_foreign_keys(&mut conn, table).await?);

        Ok(TableStructure::new(
            table,
            columns,
            primary_keys,
            indexes,
            foreign_keys,
        ))
    }

    async fn create_database(&self, name: &str) -> DbResult<()> {
        validate_database_name(name)?;
        let sql = format!(
            "CREATE DATABASE {} CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci",
            quote_backtick(name)
        );

        let mut conn = self.conn.acquire().await?;
        (&mut *conn).execute(sql.as_str()).await?;
        info!(database = %name, "Created MySQL database");
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> DbResult<()> {
        validate_database_name(name)?;
        let sql = format!("DROP DATABASE {}", quote_backtick(name));

        let mut conn = self.conn.acquire().await?;
        (&mut *conn)
            .execute(sql.as_str())
            .await
            .map_err(|e| drop_error(name, e))?;
        info!(database = %name, "Dropped MySQL database");
        Ok(())
    }

    async fn get_database_size(&self, name: &str) -> DbResult<String> {
        let mut conn = self.conn.acquire().await?;
        let row = sqlx::query(queries::DATABASE_SIZE)
            .bind(name)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| introspection_error(name, e))?;

        Ok(format_megabytes(
            try_get_u64(&row, "SIZE_BYTES").unwrap_or(0),
        ))
    }

    async fn get_table_count(&self, name: &str) -> DbResult<u64> {
        let mut conn = self.conn.acquire().await?;
        let row = sqlx::query(queries::TABLE_COUNT)
            .bind(name)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| introspection_error(name, e))?;

        try_get_u64(&row, "TABLE_COUNT")
            .ok_or_else(|| DbError::introspection("Table count unavailable", name))
    }

    async fn server_version(&self) -> DbResult<String> {
        let mut conn = self.conn.acquire().await?;
        let row = sqlx::query(queries::SERVER_VERSION)
            .fetch_one(&mut *conn)
            .await?;
        get_string_by_index(&row, 0)
            .ok_or_else(|| DbError::introspection("Server version unavailable", "version()"))
    }

    async fn list_table_infos(&self) -> DbResult<Vec<TableInfo>> {
        let mut conn = self.conn.acquire().await?;
        let rows = sqlx::query(queries::LIST_TABLE_INFOS)
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let mut table = TableInfo::new(get_string(row, "TABLE_NAME"));
                if let Some(count) = try_get_u64(row, "ROW_COUNT") {
                    table = table.with_row_count(count);
                }
                if let Some(size) = try_get_u64(row, "TOTAL_SIZE") {
                    table = table.with_size_bytes(size);
                }
                table
            })
            .collect())
    }

    async fn preview_table(&self, table: &str, limit: Option<u32>) -> DbResult<TablePreview> {
        let sql = format!(
            "SELECT * FROM {} LIMIT {}",
            quote_backtick(table),
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
