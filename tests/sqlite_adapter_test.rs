//! Integration tests for the SQLite adapter against real database files.

mod common;

use common::{SHOP_SCHEMA, seed_sqlite};
use db_admin_core::ConnectionRegistry;
use db_admin_core::db::DatabaseAdapter;
use db_admin_core::error::ErrorKind;
use db_admin_core::models::{ConnectionDescriptor, ForeignKeyAction, KeyRole};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

async fn connect(registry: &ConnectionRegistry, id: &str, path: &Path) -> Arc<dyn DatabaseAdapter> {
    registry
        .create_connection(ConnectionDescriptor::sqlite(id, path.to_str().unwrap()))
        .await
        .unwrap();
    registry.get_connection(id).unwrap()
}

async fn shop_adapter(dir: &TempDir) -> (ConnectionRegistry, Arc<dyn DatabaseAdapter>) {
    let path = dir.path().join("shop.db");
    seed_sqlite(&path, SHOP_SCHEMA).await;
    let registry = ConnectionRegistry::new();
    let adapter = connect(&registry, "shop", &path).await;
    (registry, adapter)
}

#[tokio::test]
async fn test_list_databases_is_main() {
    let dir = TempDir::new().unwrap();
    let (_registry, adapter) = shop_adapter(&dir).await;
    assert_eq!(adapter.list_databases().await.unwrap(), vec!["main"]);
}

#[tokio::test]
async fn test_list_tables_excludes_internal_tables_and_views() {
    let dir = TempDir::new().unwrap();
    let (_registry, adapter) = shop_adapter(&dir).await;

    // AUTOINCREMENT creates sqlite_sequence
    let tables = adapter.list_tables().await.unwrap();
    assert_eq!(tables, vec!["customers", "orders"]);
    assert_eq!(adapter.get_table_count("main").await.unwrap(), 2);
}

#[tokio::test]
async fn test_table_structure() {
    let dir = TempDir::new().unwrap();
    let (_registry, adapter) = shop_adapter(&dir).await;

    let orders = adapter.get_table_structure("orders").await.unwrap();
    let names: Vec<&str> = orders.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "customer_id", "total", "note"]);
    assert_eq!(orders.primary_keys, vec!["id"]);

    let id = orders.column("id").unwrap();
    assert_eq!(id.key, Some(KeyRole::Primary));
    assert_eq!(id.data_type, "INTEGER");

    let customer_id = orders.column("customer_id").unwrap();
    assert!(!customer_id.nullable);
    assert_eq!(customer_id.key, Some(KeyRole::Index));

    let total = orders.column("total").unwrap();
    assert!(total.nullable);
    assert_eq!(total.default_value.as_deref(), Some("0"));
    assert_eq!(total.key, None);

    assert_eq!(orders.indexes.len(), 1);
    assert_eq!(orders.indexes[0].name, "idx_orders_customer");
    assert_eq!(orders.indexes[0].columns, vec!["customer_id"]);
    assert!(!orders.indexes[0].is_unique);

    assert_eq!(orders.foreign_keys.len(), 1);
    let fk = &orders.foreign_keys[0];
    assert_eq!(fk.columns, vec!["customer_id"]);
    assert_eq!(fk.referenced_table, "customers");
    assert_eq!(fk.referenced_columns, vec!["id"]);
    assert_eq!(fk.on_delete, ForeignKeyAction::Cascade);

    let customers = adapter.get_table_structure("customers").await.unwrap();
    assert_eq!(
        customers.column("email").unwrap().key,
        Some(KeyRole::Unique)
    );
    assert!(customers.indexes.iter().any(|idx| idx.is_unique));
}

#[tokio::test]
async fn test_missing_table_is_introspection_error() {
    let dir = TempDir::new().unwrap();
    let (_registry, adapter) = shop_adapter(&dir).await;

    let err = adapter.get_table_structure("nope").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Introspection);
}

#[tokio::test]
async fn test_create_and_drop_database_unsupported() {
    let dir = TempDir::new().unwrap();
    let (_registry, adapter) = shop_adapter(&dir).await;

    for err in [
        adapter.create_database("other").await.unwrap_err(),
        adapter.drop_database("main").await.unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
    }
    // Nothing changed on disk
    assert_eq!(adapter.list_tables().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_database_size_before_and_after_writes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");
    let registry = ConnectionRegistry::new();
    let adapter = connect(&registry, "c2", &path).await;

    assert_eq!(adapter.get_database_size("main").await.unwrap(), "0 MB");

    registry.close_connection("c2").await.unwrap();
    seed_sqlite(&path, SHOP_SCHEMA).await;
    let adapter = connect(&registry, "c2", &path).await;

    let size = adapter.get_database_size("main").await.unwrap();
    assert_ne!(size, "0 MB");
    assert!(size.ends_with(" MB"));
}

#[tokio::test]
async fn test_describe_databases() {
    let dir = TempDir::new().unwrap();
    let (_registry, adapter) = shop_adapter(&dir).await;

    let databases = adapter.describe_databases().await.unwrap();
    assert_eq!(databases.len(), 1);
    assert_eq!(databases[0].name, "main");
    assert_eq!(databases[0].table_count, Some(2));
    assert!(databases[0].size.is_some());
}

#[tokio::test]
async fn test_describe_databases_degrades_when_details_fail() {
    let dir = TempDir::new().unwrap();
    let (registry, adapter) = shop_adapter(&dir).await;
    registry.close_connection("shop").await.unwrap();

    // The name is still known; the table count needs the closed link
    let databases = adapter.describe_databases().await.unwrap();
    assert_eq!(databases.len(), 1);
    assert_eq!(databases[0].name, "main");
    assert_eq!(databases[0].size, None);
    assert_eq!(databases[0].table_count, None);
}

#[tokio::test]
async fn test_list_table_infos_row_counts() {
    let dir = TempDir::new().unwrap();
    let (_registry, adapter) = shop_adapter(&dir).await;

    let tables = adapter.list_table_infos().await.unwrap();
    assert_eq!(tables.len(), 2);
    assert_eq!(tables[0].name, "customers");
    assert_eq!(tables[0].row_count, Some(2));
    assert_eq!(tables[1].row_count, Some(2));
}

#[tokio::test]
async fn test_preview_table() {
    let dir = TempDir::new().unwrap();
    let (_registry, adapter) = shop_adapter(&dir).await;

    let preview = adapter.preview_table("orders", Some(1)).await.unwrap();
    assert_eq!(preview.columns, vec!["id", "customer_id", "total", "note"]);
    assert_eq!(preview.rows.len(), 1);
    let row = &preview.rows[0];
    assert_eq!(row["id"], serde_json::json!(1));
    assert_eq!(row["total"], serde_json::json!(250.5));
    assert_eq!(row["note"], serde_json::json!("first"));

    let customers = adapter.preview_table("customers", None).await.unwrap();
    assert_eq!(customers.rows.len(), 2);
    assert_eq!(customers.rows[1]["name"], serde_json::Value::Null);
}

#[tokio::test]
async fn test_preview_empty_table_still_lists_columns() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.db");
    seed_sqlite(&path, "CREATE TABLE events (id INTEGER PRIMARY KEY, kind TEXT);").await;
    let registry = ConnectionRegistry::new();
    let adapter = connect(&registry, "empty", &path).await;

    let preview = adapter.preview_table("events", None).await.unwrap();
    assert!(preview.rows.is_empty());
    assert_eq!(preview.columns, vec!["id", "kind"]);
}

#[tokio::test]
async fn test_preview_missing_table_is_not_found() {
    let dir = TempDir::new().unwrap();
    let (_registry, adapter) = shop_adapter(&dir).await;

    let err = adapter.preview_table("ghost", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_reserved_word_table_names() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("words.db");
    seed_sqlite(
        &path,
        r#"CREATE TABLE "order" ("select" TEXT); INSERT INTO "order" VALUES ('x');"#,
    )
    .await;
    let registry = ConnectionRegistry::new();
    let adapter = connect(&registry, "words", &path).await;

    let structure = adapter.get_table_structure("order").await.unwrap();
    assert_eq!(structure.columns[0].name, "select");
    let preview = adapter.preview_table("order", None).await.unwrap();
    assert_eq!(preview.rows[0]["select"], serde_json::json!("x"));
}
