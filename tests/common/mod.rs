//! Shared helpers for integration tests.

#![allow(dead_code)]

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, Executor, SqliteConnection};
use std::path::Path;

/// Run a script against a SQLite file through a separate short-lived connection.
pub async fn seed_sqlite(path: &Path, script: &str) {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let mut conn = SqliteConnection::connect_with(&options).await.unwrap();
    conn.execute(script).await.unwrap();
    conn.close().await.unwrap();
}

pub const SHOP_SCHEMA: &str = r#"
    CREATE TABLE customers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email TEXT NOT NULL UNIQUE,
        name TEXT
    );
    CREATE TABLE orders (
        id INTEGER PRIMARY KEY,
        customer_id INTEGER NOT NULL,
        total REAL DEFAULT 0,
        note TEXT,
        FOREIGN KEY (customer_id) REFERENCES customers(id) ON DELETE CASCADE
    );
    CREATE INDEX idx_orders_customer ON orders(customer_id);
    CREATE VIEW big_orders AS SELECT * FROM orders WHERE total > 100;
    INSERT INTO customers (email, name) VALUES ('ada@example.com', 'Ada'), ('bob@example.com', NULL);
    INSERT INTO orders (customer_id, total, note) VALUES (1, 250.5, 'first'), (2, 12, NULL);
"#;
