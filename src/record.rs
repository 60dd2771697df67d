// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Event records and their search-side projection.
//!
//! A [`Record`] is owned by the relational store. An [`IndexDocument`] is a
//! deterministic function of a record plus a few index-only derived fields
//! (autocomplete inputs), so the index can always be rebuilt from records.
//!
//! # Example
//!
//! ```
//! use event_index_sync::{Record, IndexDocument};
//!
//! let record = Record::new(42, "Jazz Night", 3);
//! let doc = IndexDocument::from(&record);
//!
//! assert_eq!(doc.id, 42);
//! assert_eq!(doc.name_suggest.input, vec!["Jazz Night".to_string()]);
//! assert!(doc.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};

/// Autocomplete weight for event names.
pub const NAME_SUGGEST_WEIGHT: u32 = 10;
/// Autocomplete weight for locations.
pub const LOCATION_SUGGEST_WEIGHT: u32 = 5;

/// An event as stored in the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub category_id: i64,
    /// Joined from the category table on read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_name: Option<String>,
    pub date: String,
    pub time: String,
    pub location: String,
    pub price: f64,
    pub image: String,
    pub source: String,
    /// Creation timestamp (epoch millis)
    pub created_at: i64,
    /// Last update timestamp (epoch millis), never set for untouched records
    #[serde(default)]
    pub updated_at: Option<i64>,
}

impl Record {
    /// Create a record with the identifying fields set and the rest empty.
    ///
    /// `created_at` is stamped with the current time.
    pub fn new(id: i64, name: impl Into<String>, category_id: i64) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            category_id,
            category_name: None,
            date: String::new(),
            time: String::new(),
            location: String::new(),
            price: 0.0,
            image: String::new(),
            source: String::new(),
            created_at: now_millis(),
            updated_at: None,
        }
    }
}

/// Completion suggester input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggest {
    pub input: Vec<String>,
    pub weight: u32,
}

/// Search-index projection of a [`Record`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub category_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_name: Option<String>,
    pub date: String,
    pub time: String,
    pub location: String,
    pub price: f64,
    pub image: String,
    pub source: String,
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: Option<i64>,
    pub name_suggest: Suggest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_suggest: Option<Suggest>,
}

impl From<&Record> for IndexDocument {
    fn from(record: &Record) -> Self {
        let location_suggest = (!record.location.is_empty()).then(|| Suggest {
            input: vec![record.location.clone()],
            weight: LOCATION_SUGGEST_WEIGHT,
        });

        Self {
            id: record.id,
            name: record.name.clone(),
            description: record.description.clone(),
            category_id: record.category_id,
            category_name: record.category_name.clone(),
            date: record.date.clone(),
            time: record.time.clone(),
            location: record.location.clone(),
            price: record.price,
            image: record.image.clone(),
            source: record.source.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            name_suggest: Suggest {
                input: vec![record.name.clone()],
                weight: NAME_SUGGEST_WEIGHT,
            },
            location_suggest,
        }
    }
}

impl IndexDocument {
    /// Check that the document can be indexed.
    ///
    /// Returns every violated rule joined into one message.
    pub fn validate(&self) -> Result<(), String> {
        let mut problems = Vec::new();

        if self.id <= 0 {
            problems.push("id must be positive");
        }
        if self.name.trim().is_empty() {
            problems.push("name is required");
        }
        if self.category_id <= 0 {
            problems.push("category_id must be positive");
        }
        if self.price < 0.0 || self.price.is_nan() {
            problems.push("price cannot be negative");
        }
        if self.created_at == 0 {
            problems.push("created_at is required for indexing");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join(", "))
        }
    }
}

/// Current wall-clock time in epoch millis.
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
