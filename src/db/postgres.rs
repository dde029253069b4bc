//! PostgreSQL adapter.
//!
//! Tables are looked up in `current_schema()`. `CREATE DATABASE` and
//! `DROP DATABASE` cannot run inside a transaction block, so DDL goes through
//! the simple query protocol where every statement autocommits.

use crate::db::adapter::{
    ConnectionSlot, DatabaseAdapter, ForeignKeyRow, VALIDATION_QUERY, assign_key_roles,
    clamp_preview_limit, connect_error, group_foreign_keys, introspection_error, quote_double,
    table_error, validate_database_name,
};
use crate::db::types::rows_to_preview;
use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnInfo, ConnectionDescriptor, DatabaseType, IndexInfo, TableInfo, TablePreview,
    TableStructure,
};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::{Connection, Executor, Row};
use tracing::{debug, info};

mod queries {
    pub const LIST_DATABASES: &str = r#"
        SELECT datname::text AS name
        FROM pg_database
        WHERE datistemplate = false
        ORDER BY datname
        "#;

    pub const LIST_TABLES: &str = r#"
        SELECT table_name::text AS table_name
        FROM information_schema.tables
        WHERE table_schema = current_schema()
        AND table_type = 'BASE TABLE'
        ORDER BY table_name
        "#;

    pub const LIST_TABLE_INFOS: &str = r#"
        SELECT
            c.relname::text AS table_name,
            s.n_live_tup AS row_count,
            pg_total_relation_size(c.oid) AS total_size
        FROM pg_class c
        JOIN pg_namespace n ON n.oid = c.relnamespace
        LEFT JOIN pg_stat_user_tables s ON s.relid = c.oid
        WHERE n.nspname = current_schema()
        AND c.relkind IN ('r', 'p')
        ORDER BY c.relname
        "#;

    pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            c.column_name::text AS column_name,
            format_type(a.atttypid, a.atttypmod) AS column_type,
            c.is_nullable::text AS is_nullable,
            c.column_default::text AS column_default,
            c.is_identity::text AS is_identity
        FROM information_schema.columns c
        JOIN pg_class t ON t.relname::text = c.table_name::text
        JOIN pg_namespace n ON n.oid = t.relnamespace AND n.nspname::text = c.table_schema::text
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attname::text = c.column_name::text
        WHERE c.table_name::text = $1 AND c.table_schema::text = current_schema()
        ORDER BY c.ordinal_position
        "#;

    pub const DESCRIBE_INDEXES: &str = r#"
        SELECT
            i.relname::text AS index_name,
            array_agg(a.attname::text ORDER BY array_position(ix.indkey::int2[], a.attnum)) AS column_names,
            ix.indisunique AS is_unique,
            ix.indisprimary AS is_primary
        FROM pg_index ix
        JOIN pg_class i ON i.oid = ix.indexrelid
        JOIN pg_class t ON t.oid = ix.indrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
        WHERE t.relname::text = $1 AND n.nspname = current_schema()
        GROUP BY i.relname, ix.indisunique, ix.indisprimary
        ORDER BY i.relname
        "#;

    pub const DESCRIBE_FOREIGN_KEYS: &str = r#"
        SELECT
            kcu.constraint_name::text AS constraint_name,
            kcu.column_name::text AS column_name,
            ref.table_name::text AS foreign_table_name,
            ref.column_name::text AS foreign_column_name,
            rc.delete_rule::text AS delete_rule,
            rc.update_rule::text AS update_rule
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON tc.constraint_name = kcu.constraint_name
            AND tc.table_schema = kcu.table_schema
        JOIN information_schema.referential_constraints rc
            ON rc.constraint_name = tc.constraint_name
            AND rc.constraint_schema = tc.table_schema
        JOIN information_schema.key_column_usage ref
            ON ref.constraint_name = rc.unique_constraint_name
            AND ref.constraint_schema = rc.unique_constraint_schema
            AND ref.ordinal_position = kcu.position_in_unique_constraint
        WHERE tc.table_name::text = $1
        AND tc.table_schema = current_schema()
        AND tc.constraint_type = 'FOREIGN KEY'
        ORDER BY kcu.constraint_name, kcu.ordinal_position
        "#;

    pub const DATABASE_SIZE: &str = "SELECT pg_size_pretty(pg_database_size($1::name)) AS size";

    pub const TABLE_COUNT: &str = r#"
        SELECT COUNT(*) AS table_count
        FROM information_schema.tables
        WHERE table_catalog::text = $1
        AND table_schema = 'public'
        AND table_type = 'BASE TABLE'
        "#;

    pub const SERVER_VERSION: &str = "SELECT version()";
}

/// Adapter for PostgreSQL servers.
#[derive(Debug)]
pub struct PostgresAdapter {
    conn: ConnectionSlot<PgConnection>,
    system_databases: Vec<String>,
}

impl PostgresAdapter {
    /// Create a disconnected adapter that hides `system_databases` from database listings.
    pub fn new(system_databases: Vec<String>) -> Self {
        Self {
            conn: ConnectionSlot::new(DatabaseType::PostgreSQL),
            system_databases,
        }
    }

    fn is_system_database(&self, name: &str) -> bool {
        self.system_databases.iter().any(|s| s == name)
    }

    fn connect_options(descriptor: &ConnectionDescriptor) -> DbResult<PgConnectOptions> {
        descriptor.validate()?;
        let mut options = PgConnectOptions::new()
            .host(&descriptor.host)
            .port(descriptor.effective_port().unwrap_or(5432));
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
            options.ssl_mode(PgSslMode::Require)
        } else {
            options
        })
    }

    async fn fetch_columns(conn: &mut PgConnection, table: &str) -> DbResult<Vec<ColumnInfo>> {
        let rows = sqlx::query(queries::DESCRIBE_COLUMNS)
            .bind(table)
            .fetch_all(conn)
            .await
            .map_err(|e| introspection_error(table, e))?;

        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get("column_name");
                let column_type: String = row.get("column_type");
                let nullable: String = row.get("is_nullable");
                let default_value: Option<String> = row.try_get("column_default").ok().flatten();
                let is_identity: Option<String> = row.try_get("is_identity").ok().flatten();

                let auto_increment = is_identity.as_deref() == Some("YES")
                    || default_value
                        .as_deref()
                        .is_some_and(|d| d.starts_with("nextval("));

                ColumnInfo::new(name, column_type, nullable == "YES")
                    .with_default(default_value)
                    .with_extra(auto_increment.then(|| "auto_increment".to_string()))
            })
            .collect())
    }

    /// Returns the primary key columns and the remaining indexes.
    async fn fetch_indexes(
        conn: &mut PgConnection,
        table: &str,
    ) -> DbResult<(Vec<String>, Vec<IndexInfo>)> {
        let rows = sqlx::query(queries::DESCRIBE_INDEXES)
            .bind(table)
            .fetch_all(conn)
            .await
            .map_err(|e| introspection_error(table, e))?;

        let mut primary_keys = Vec::new();
        let mut indexes = Vec::new();
        for row in &rows {
            let name: String = row.get("index_name");
            let columns: Vec<String> = row.try_get("column_names").unwrap_or_default();
            let is_unique: bool = row.get("is_unique");
            let is_primary: bool = row.get("is_primary");

            if is_primary {
                primary_keys = columns;
            } else if !columns.is_empty() {
                indexes.push(IndexInfo::new(name, columns, is_unique));
            }
        }
        Ok((primary_keys, indexes))
    }

    async fn fetch_foreign_keys(
        conn: &mut PgConnection,
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
                constraint: row.get("constraint_name"),
                column: row.get("column_name"),
                referenced_table: row.get("foreign_table_name"),
                referenced_column: row.get("foreign_column_name"),
                on_delete: row.get("delete_rule"),
                on_update: row.get("update_rule"),
            })
            .collect())
    }

    /// Run database-level DDL on `database` outside any transaction block.
    async fn execute_autocommit(&self, database: &str, sql: &str) -> DbResult<()> {
        let mut conn = self.conn.acquire().await?;
        (&mut *conn)
            .execute(sql)
            .await
            .map_err(|e| ddl_error(database, e))?;
        Ok(())
    }
}

/// invalid_catalog_name
const INVALID_CATALOG_NAME: &str = "3D000";

fn ddl_error(database: &str, err: sqlx::Error) -> DbError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some(INVALID_CATALOG_NAME) {
            return DbError::not_found("Database", database);
        }
    }
    err.into()
}

impl Default for PostgresAdapter {
    fn default() -> Self {
        Self::new(crate::config::SystemSchemas::default().postgres)
    }
}

#[async_trait]
impl DatabaseAdapter for PostgresAdapter {
    fn db_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> DbResult<()> {
        let options = Self::connect_options(descriptor)?;
        let mut conn = PgConnection::connect_with(&options)
            .await
            .map_err(|e| connect_error(DatabaseType::PostgreSQL, e))?;

        if let Err(e) = sqlx::query(VALIDATION_QUERY).execute(&mut conn).await {
            let _ = conn.close().await;
            return Err(connect_error(DatabaseType::PostgreSQL, e));
        }

        self.conn.install(conn).await;
        info!(dsn = %descriptor.masked_dsn(), ssl = descriptor.ssl, "PostgreSQL connection established");
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

        let databases: Vec<String> = rows
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .filter(|name| !self.is_system_database(name))
            .collect();

        debug!(count = databases.len(), "Listed PostgreSQL databases");
        Ok(databases)
    }

    async fn list_tables(&self) -> DbResult<Vec<String>> {
        let mut conn = self.conn.acquire().await?;
        let tables: Vec<String> = sqlx::query_scalar(queries::LIST_TABLES)
            .fetch_all(&mut *conn)
            .await?;

        debug!(count = tables.len(), "Listed PostgreSQL tables");
        Ok(tables)
    }

    async fn get_table_structure(&self, table: &str) -> DbResult<TableStructure> {
        let mut conn = self.conn.acquire().await?;

        let mut columns = Self::fetch_columns(&mut conn, table).await?;
        if columns.is_empty() {
            return Err(DbError::introspection(
                format!("Table '{}' not found", table),
                table,
            ));
        }

        let (primary_keys, indexes) = Self::fetch_indexes(&mut conn, table).await?;
        let foreign_keys = group_foreign_keys(Self::fetch_foreign_keys(&mut conn, table).await?);
        assign_key_roles(&mut columns, &primary_keys, &indexes);

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
        self.execute_autocommit(name, &format!("CREATE DATABASE {}", quote_double(name)))
            .await?;
        info!(database = %name, "Created PostgreSQL database");
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> DbResult<()> {
        validate_database_name(name)?;
        self.execute_autocommit(name, &format!("DROP DATABASE {}", quote_double(name)))
            .await?;
        info!(database = %name, "Dropped PostgreSQL database");
        Ok(())
    }

    async fn get_database_size(&self, name: &str) -> DbResult<String> {
        let mut conn = self.conn.acquire().await?;
        let size: Option<String> = sqlx::query_scalar(queries::DATABASE_SIZE)
            .bind(name)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| introspection_error(name, e))?;

        size.ok_or_else(|| DbError::introspection("Database size unavailable", name))
    }

    async fn get_table_count(&self, name: &str) -> DbResult<u64> {
        let mut conn = self.conn.acquire().await?;
        let count: i64 = sqlx::query_scalar(queries::TABLE_COUNT)
            .bind(name)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| introspection_error(name, e))?;

        Ok(u64::try_from(count).unwrap_or(0))
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
        let rows = sqlx::query(queries::LIST_TABLE_INFOS)
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let mut table = TableInfo::new(row.get::<String, _>("table_name"));
                if let Ok(Some(count)) = row.try_get::<Option<i64>, _>("row_count") {
                    table = table.with_row_count(u64::try_from(count).unwrap_or(0));
                }
                if let Ok(Some(size)) = row.try_get::<Option<i64>, _>("total_size") {
                    table = table.with_size_bytes(u64::try_from(size).unwrap_or(0));
                }
                table
            })
            .collect())
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
