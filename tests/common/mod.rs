#![allow(dead_code)]

use std::time::Duration;

use items_api::{list_items, ListRequest, Page, SqliteConfig, SqliteStore, Value};
use rusqlite::{params, Connection, Result};
use tempfile::NamedTempFile;

pub const BUDGET: Duration = Duration::from_secs(2);

// Helper function to create a temporary file-based database
pub fn create_temp_db() -> Result<(Connection, NamedTempFile)> {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();
    let conn = Connection::open(path)?;
    initialize_schema(&conn)?;
    Ok((conn, temp_file))
}

// Initialize the database schema
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE items (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            category TEXT,
            material TEXT,
            price REAL,
            in_stock INTEGER,
            thumbnail BLOB
        );
        CREATE INDEX idx_items_category ON items(category);
        "#,
    )
}

pub fn insert_item(conn: &Connection, id: i64, category: &str, material: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO items (id, name, category, material, price, in_stock, thumbnail) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            format!("item-{id}"),
            category,
            material,
            id as f64 * 1.25,
            id % 2,
            format!("img-{id}").into_bytes(),
        ],
    )?;
    Ok(())
}

/// Seed `items` with one row per `(id, category, material)`.
pub fn seeded_db(rows: &[(i64, &str, &str)]) -> NamedTempFile {
    let (conn, file) = create_temp_db().unwrap();
    let tx = conn.unchecked_transaction().unwrap();
    for (id, category, material) in rows {
        insert_item(&tx, *id, category, material).unwrap();
    }
    tx.commit().unwrap();
    file
}

/// Open a read-only store over `file` with at most `max_connections`.
pub fn open_store(file: &NamedTempFile, max_connections: u32) -> SqliteStore {
    let config = SqliteConfig::new(file.path().to_str().unwrap())
        .with_max_connections(max_connections)
        .with_min_idle(1);
    SqliteStore::open(&config).unwrap()
}

/// Seeded database plus a store over it. Keep the temp file alive for the
/// test's length.
pub fn seeded_store(rows: &[(i64, &str, &str)]) -> (SqliteStore, NamedTempFile) {
    let file = seeded_db(rows);
    (open_store(&file, 4), file)
}

pub async fn list(store: &SqliteStore, pairs: &[(&str, &str)]) -> Page {
    let request = ListRequest::from_query_pairs(pairs.iter().copied());
    list_items(store, &request, BUDGET).await.unwrap()
}

pub fn ids(page: &Page) -> Vec<i64> {
    page.items
        .iter()
        .map(|row| row["id"].as_i64().unwrap())
        .collect()
}

pub fn cursor(page: &Page) -> Option<i64> {
    page.meta.next_after_id.as_ref().and_then(Value::as_i64)
}
