// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL record store.
//!
//! Events live in their own table; the category name is joined in on read and
//! is never owned by the event row:
//!
//! ```sql
//! CREATE TABLE events (
//!   id BIGINT PRIMARY KEY,
//!   name VARCHAR(255) NOT NULL,
//!   description TEXT,
//!   category_id BIGINT NOT NULL,
//!   date VARCHAR(32),
//!   time VARCHAR(32),
//!   location VARCHAR(255),
//!   price DOUBLE NOT NULL,
//!   image VARCHAR(512),
//!   source VARCHAR(255),
//!   created_at BIGINT NOT NULL,  -- epoch millis
//!   updated_at BIGINT            -- epoch millis, NULL until first update
//! )
//! ```
//!
//! ## sqlx Any Driver Quirks
//!
//! The `Any` driver hands MySQL TEXT columns back as BLOB, so every string
//! column is read as `String` first and as `Vec<u8>` second.

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::traits::{RecordStore, StorageError};
use crate::error::SyncError;
use crate::record::Record;
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

const SELECT_EVENTS: &str = "SELECT e.id, e.name, e.description, e.category_id, c.name AS category_name, \
     e.date, e.time, e.location, e.price, e.image, e.source, e.created_at, e.updated_at \
     FROM events e LEFT JOIN categories c ON c.id = e.category_id";

pub struct SqlRecordStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlRecordStore {
    /// Connect with startup-mode retry (fails fast if config is wrong) and
    /// create the tables if they do not exist.
    pub async fn connect(connection_string: &str) -> Result<Self, SyncError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");
        // Every pooled connection to an in-memory SQLite database is its own database
        let max_connections = if connection_string.contains(":memory:") { 1 } else { 20 };

        let cancel = CancellationToken::new();
        let pool = retry("sql_connect", &RetryConfig::startup(), &cancel, |_| async {
            AnyPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(|e| SyncError::storage("sql_connect", StorageError::Connection(e.to_string())))
        })
        .await?;

        let store = Self { pool, is_sqlite };
        store.init_schema().await?;

        info!(sqlite = is_sqlite, "Record store connected");
        Ok(store)
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    async fn init_schema(&self) -> Result<(), SyncError> {
        let statements: [&str; 2] = if self.is_sqlite {
            [
                r#"
                CREATE TABLE IF NOT EXISTS categories (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS events (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    category_id INTEGER NOT NULL,
                    date TEXT NOT NULL DEFAULT '',
                    time TEXT NOT NULL DEFAULT '',
                    location TEXT NOT NULL DEFAULT '',
                    price REAL NOT NULL DEFAULT 0,
                    image TEXT NOT NULL DEFAULT '',
                    source TEXT NOT NULL DEFAULT '',
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER
                )
                "#,
            ]
        } else {
            [
                r#"
                CREATE TABLE IF NOT EXISTS categories (
                    id BIGINT PRIMARY KEY,
                    name VARCHAR(255) NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS events (
                    id BIGINT PRIMARY KEY,
                    name VARCHAR(255) NOT NULL,
                    description TEXT,
                    category_id BIGINT NOT NULL,
                    date VARCHAR(32) NOT NULL DEFAULT '',
                    time VARCHAR(32) NOT NULL DEFAULT '',
                    location VARCHAR(255) NOT NULL DEFAULT '',
                    price DOUBLE NOT NULL DEFAULT 0,
                    image VARCHAR(512) NOT NULL DEFAULT '',
                    source VARCHAR(255) NOT NULL DEFAULT '',
                    created_at BIGINT NOT NULL,
                    updated_at BIGINT,
                    INDEX idx_category (category_id)
                )
                "#,
            ]
        };

        let cancel = CancellationToken::new();
        for sql in statements {
            retry("sql_init_schema", &RetryConfig::startup(), &cancel, |_| async {
                sqlx::query(sql)
                    .execute(&self.pool)
                    .await
                    .map(|_| ())
                    .map_err(|e| SyncError::storage("sql_init_schema", StorageError::Backend(e.to_string())))
            })
            .await?;
        }

        Ok(())
    }

    /// Insert or replace a category.
    pub async fn upsert_category(&self, id: i64, name: &str) -> Result<(), StorageError> {
        let sql = if self.is_sqlite {
            "INSERT INTO categories (id, name) VALUES (?, ?) ON CONFLICT(id) DO UPDATE SET name = excluded.name"
        } else {
            "INSERT INTO categories (id, name) VALUES (?, ?) ON DUPLICATE KEY UPDATE name = VALUES(name)"
        };

        sqlx::query(sql)
            .bind(id)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Insert or replace an event. `category_name` is ignored; it belongs to
    /// the categories table.
    pub async fn upsert(&self, record: &Record) -> Result<(), StorageError> {
        let sql = if self.is_sqlite {
            "INSERT INTO events (id, name, description, category_id, date, time, location, price, image, source, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                category_id = excluded.category_id,
                date = excluded.date,
                time = excluded.time,
                location = excluded.location,
                price = excluded.price,
                image = excluded.image,
                source = excluded.source,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at"
        } else {
            "INSERT INTO events (id, name, description, category_id, date, time, location, price, image, source, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON DUPLICATE KEY UPDATE
                name = VALUES(name),
                description = VALUES(description),
                category_id = VALUES(category_id),
                date = VALUES(date),
                time = VALUES(time),
                location = VALUES(location),
                price = VALUES(price),
                image = VALUES(image),
                source = VALUES(source),
                created_at = VALUES(created_at),
                updated_at = VALUES(updated_at)"
        };

        sqlx::query(sql)
            .bind(record.id)
            .bind(&record.name)
            .bind(&record.description)
            .bind(record.category_id)
            .bind(&record.date)
            .bind(&record.time)
            .bind(&record.location)
            .bind(record.price)
            .bind(&record.image)
            .bind(&record.source)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Delete an event. Returns whether a row was removed.
    pub async fn delete(&self, id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM events WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }
}

/// Read a string column as `String` (SQLite TEXT) or as bytes (MySQL TEXT).
fn text_column(row: &AnyRow, column: &str) -> Option<String> {
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

/// Decode a non-string column. A NULL or mistyped value is a data error,
/// never a silent zero.
fn column<'r, T>(row: &'r AnyRow, name: &str) -> Result<T, StorageError>
where
    T: sqlx::Decode<'r, sqlx::Any> + sqlx::Type<sqlx::Any>,
{
    row.try_get(name)
        .map_err(|e| StorageError::Serialization(format!("Invalid {} column: {}", name, e)))
}

fn record_from_row(row: &AnyRow) -> Result<Record, StorageError> {
    let id: i64 = column(row, "id")?;
    let name = text_column(row, "name")
        .ok_or_else(|| StorageError::Serialization(format!("Event {} has no name", id)))?;

    Ok(Record {
        id,
        name,
        description: text_column(row, "description").unwrap_or_default(),
        category_id: column(row, "category_id")?,
        category_name: text_column(row, "category_name"),
        date: text_column(row, "date").unwrap_or_default(),
        time: text_column(row, "time").unwrap_or_default(),
        location: text_column(row, "location").unwrap_or_default(),
        price: column(row, "price")?,
        image: text_column(row, "image").unwrap_or_default(),
        source: text_column(row, "source").unwrap_or_default(),
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

#[async_trait]
impl RecordStore for SqlRecordStore {
    async fn list_all(&self) -> Result<Vec<Record>, StorageError> {
        let rows = sqlx::query(&format!("{} ORDER BY e.id", SELECT_EVENTS))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.iter().map(record_from_row).collect()
    }

    async fn get_by_id(&self, id: i64) -> Result<Record, StorageError> {
        let row = sqlx::query(&format!("{} WHERE e.id = ?", SELECT_EVENTS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        match row {
            Some(row) => record_from_row(&row),
            None => Err(StorageError::NotFound(id)),
        }
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let count: i64 = row
            .try_get("cnt")
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(count.max(0) as u64)
    }
}
