//! Integration tests against live MySQL and PostgreSQL servers.
//!
//! Set TEST_MYSQL_URL / TEST_POSTGRES_URL (a server-level URL with a user
//! allowed to create databases) to run them; otherwise they are skipped.

use db_admin_core::ConnectionRegistry;
use db_admin_core::config::parse_connection_spec;
use db_admin_core::error::ErrorKind;
use db_admin_core::models::ConnectionDescriptor;

fn descriptor_from_env(var: &str, id: &str) -> Option<ConnectionDescriptor> {
    match std::env::var(var) {
        Ok(url) => {
            let mut descriptor = parse_connection_spec(&url).unwrap();
            descriptor.id = id.to_string();
            Some(descriptor)
        }
        Err(_) => {
            eprintln!("Skipping test: {var} not set");
            None
        }
    }
}

/// Name unique to this test run so parallel runs do not collide.
fn scratch_name(prefix: &str) -> String {
    format!("{}_{}", prefix, std::process::id())
}

#[tokio::test]
async fn test_mysql_create_list_drop_database() {
    let Some(mut descriptor) = descriptor_from_env("TEST_MYSQL_URL", "c1") else {
        return;
    };
    descriptor.database = None;

    let registry = ConnectionRegistry::new();
    let info = registry.create_connection(descriptor).await.unwrap();
    assert!(info.server_version.is_some());

    let adapter = registry.get_connection("c1").unwrap();
    assert!(adapter.test_connection().await);

    let before = adapter.list_databases().await.unwrap();
    for system in ["information_schema", "mysql", "performance_schema", "sys"] {
        assert!(!before.iter().any(|db| db == system), "{system} listed");
    }

    let name = scratch_name("shopdb");
    adapter.create_database(&name).await.unwrap();
    assert!(adapter.list_databases().await.unwrap().contains(&name));
    assert_eq!(adapter.get_database_size(&name).await.unwrap(), "0 MB");
    assert_eq!(adapter.get_table_count(&name).await.unwrap(), 0);

    adapter.drop_database(&name).await.unwrap();
    let after = adapter.list_databases().await.unwrap();
    assert!(!after.contains(&name));
    assert_eq!(before, after);

    let err = adapter.drop_database(&name).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // No database bound: nothing to list
    assert!(adapter.list_tables().await.unwrap().is_empty());

    registry.close_all().await.unwrap();
}

#[tokio::test]
async fn test_mysql_table_structure() {
    let Some(mut descriptor) = descriptor_from_env("TEST_MYSQL_URL", "admin") else {
        return;
    };
    descriptor.database = None;

    let registry = ConnectionRegistry::new();
    registry.create_connection(descriptor.clone()).await.unwrap();
    let admin = registry.get_connection("admin").unwrap();

    let name = scratch_name("structure_db");
    admin.create_database(&name).await.unwrap();

    let mut bound = descriptor.clone();
    bound.id = "bound".to_string();
    bound.database = Some(name.clone());
    registry.create_connection(bound).await.unwrap();
    let adapter = registry.get_connection("bound").unwrap();

    // Schema setup goes through a separate driver connection
    let url = ConnectionDescriptor {
        database: Some(name.clone()),
        ..descriptor.clone()
    }
    .dsn()
    .unwrap();
    {
        use sqlx::{Connection, Executor};
        let mut conn = sqlx::MySqlConnection::connect(&url).await.unwrap();
        conn.execute(
            "CREATE TABLE customers (id INT AUTO_INCREMENT PRIMARY KEY, email VARCHAR(255) NOT NULL UNIQUE);
             CREATE TABLE `order` (
                 id INT AUTO_INCREMENT PRIMARY KEY,
                 customer_id INT NOT NULL,
                 total DECIMAL(10,2) DEFAULT 0,
                 INDEX idx_customer (customer_id),
                 CONSTRAINT fk_customer FOREIGN KEY (customer_id) REFERENCES customers(id) ON DELETE CASCADE
             );
             INSERT INTO customers (email) VALUES ('ada@example.com');
             INSERT INTO `order` (customer_id, total) VALUES (1, 19.99);",
        )
        .await
        .unwrap();
        conn.close().await.unwrap();
    }

    assert_eq!(adapter.list_tables().await.unwrap(), vec!["customers", "order"]);
    assert_eq!(adapter.get_table_count(&name).await.unwrap(), 2);

    let order = adapter.get_table_structure("order").await.unwrap();
    assert_eq!(order.primary_keys, vec!["id"]);
    assert_eq!(
        order.column("id").unwrap().extra.as_deref(),
        Some("auto_increment")
    );
    assert_eq!(order.foreign_keys.len(), 1);
    assert_eq!(order.foreign_keys[0].name.as_deref(), Some("fk_customer"));
    assert_eq!(order.foreign_keys[0].referenced_table, "customers");
    assert!(order.indexes.iter().any(|idx| idx.name == "idx_customer"));

    let err = adapter.get_table_structure("missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Introspection);

    let preview = adapter.preview_table("order", None).await.unwrap();
    assert_eq!(preview.rows.len(), 1);
    assert_eq!(preview.rows[0]["total"], serde_json::json!("19.99"));

    registry.close_connection("bound").await.unwrap();
    admin.drop_database(&name).await.unwrap();
    registry.close_all().await.unwrap();
}

#[tokio::test]
async fn test_postgres_create_list_drop_database() {
    let Some(descriptor) = descriptor_from_env("TEST_POSTGRES_URL", "pg") else {
        return;
    };

    let registry = ConnectionRegistry::new();
    registry.create_connection(descriptor).await.unwrap();
    let adapter = registry.get_connection("pg").unwrap();

    let before = adapter.list_databases().await.unwrap();
    assert!(!before.iter().any(|db| db == "postgres"));
    assert!(!before.iter().any(|db| db.starts_with("template")));

    // Runs outside a transaction block or the server rejects it
    let name = scratch_name("shopdb");
    adapter.create_database(&name).await.unwrap();
    assert!(adapter.list_databases().await.unwrap().contains(&name));
    assert!(!adapter.get_database_size(&name).await.unwrap().is_empty());
    assert_eq!(adapter.get_table_count(&name).await.unwrap(), 0);

    let err = adapter.create_database(&name).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Database);

    adapter.drop_database(&name).await.unwrap();
    assert_eq!(adapter.list_databases().await.unwrap(), before);

    let err = adapter.drop_database(&name).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    registry.close_all().await.unwrap();
}

#[tokio::test]
async fn test_postgres_table_structure() {
    let Some(descriptor) = descriptor_from_env("TEST_POSTGRES_URL", "pg_structure") else {
        return;
    };

    let registry = ConnectionRegistry::new();
    registry.create_connection(descriptor.clone()).await.unwrap();
    let adapter = registry.get_connection("pg_structure").unwrap();

    let suffix = std::process::id();
    let parent = format!("pg_parent_{suffix}");
    let child = format!("pg_child_{suffix}");
    {
        use sqlx::{Connection, Executor};
        let mut conn = sqlx::PgConnection::connect(&descriptor.dsn().unwrap())
            .await
            .unwrap();
        conn.execute(format!(
            "CREATE TABLE {parent} (id SERIAL PRIMARY KEY, code TEXT UNIQUE);
             CREATE TABLE {child} (
                 id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
                 parent_id INT NOT NULL REFERENCES {parent}(id) ON DELETE SET NULL,
                 label VARCHAR(40) DEFAULT 'none'
             );
             CREATE INDEX {child}_parent_idx ON {child}(parent_id);"
        ).as_str())
        .await
        .unwrap();
        conn.close().await.unwrap();
    }

    let structure = adapter.get_table_structure(&child).await.unwrap();
    assert_eq!(structure.primary_keys, vec!["id"]);
    assert_eq!(
        structure.column("id").unwrap().extra.as_deref(),
        Some("auto_increment")
    );
    assert_eq!(
        structure.column("label").unwrap().data_type,
        "character varying(40)"
    );
    assert_eq!(structure.foreign_keys.len(), 1);
    assert_eq!(structure.foreign_keys[0].referenced_table, parent);
    assert_eq!(structure.foreign_keys[0].referenced_columns, vec!["id"]);
    assert_eq!(structure.indexes.len(), 1);
    assert!(!structure.indexes[0].is_unique);

    let parent_structure = adapter.get_table_structure(&parent).await.unwrap();
    assert_eq!(
        parent_structure.column("id").unwrap().extra.as_deref(),
        Some("auto_increment")
    );
    assert!(parent_structure.indexes.iter().any(|idx| idx.is_unique));

    assert!(adapter.list_tables().await.unwrap().contains(&child));
    let preview = adapter.preview_table(&child, Some(10)).await.unwrap();
    assert!(preview.rows.is_empty());
    assert_eq!(preview.columns, vec!["id", "parent_id", "label"]);

    let err = adapter
        .preview_table(&format!("missing_{suffix}"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    {
        use sqlx::{Connection, Executor};
        let mut conn = sqlx::PgConnection::connect(&descriptor.dsn().unwrap())
            .await
            .unwrap();
        conn.execute(format!("DROP TABLE {child}; DROP TABLE {parent};").as_str())
            .await
            .unwrap();
        conn.close().await.unwrap();
    }
    registry.close_all().await.unwrap();
}
