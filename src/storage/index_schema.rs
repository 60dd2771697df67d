// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Index Schema
//!
//! Builds the RediSearch definition of the event index.
//!
//! ```text
//! FT.CREATE events
//!   ON JSON
//!   PREFIX 1 event:
//!   SCHEMA
//!     $.id AS id NUMERIC SORTABLE
//!     $.name AS name TEXT SORTABLE
//!     $.category_id AS category_id NUMERIC
//!     ...
//! ```

/// Search index definition
#[derive(Debug, Clone)]
pub struct IndexSchema {
    pub name: String,
    /// Key prefix this index covers (e.g., "event:")
    pub prefix: String,
    pub fields: Vec<SchemaField>,
}

impl IndexSchema {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            fields: Vec::new(),
        }
    }

    /// The event index: full-text on descriptive fields, numeric on ids and
    /// price, tags on the exact-match fields.
    pub fn events(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::new(name, prefix)
            .numeric_sortable("id")
            .text_sortable("name")
            .text("description")
            .numeric("category_id")
            .tag("category_name")
            .tag("date")
            .tag("time")
            .text("location")
            .numeric_sortable("price")
            .tag("source")
            .numeric_sortable("created_at")
            .text_at("name_suggest", "$.name_suggest.input[*]")
            .text_at("location_suggest", "$.location_suggest.input[*]")
    }

    pub fn text(self, name: impl Into<String>) -> Self {
        self.field(name, None, FieldType::Text, false)
    }

    pub fn text_sortable(self, name: impl Into<String>) -> Self {
        self.field(name, None, FieldType::Text, true)
    }

    /// Add a text field with custom JSON path
    pub fn text_at(self, name: impl Into<String>, json_path: impl Into<String>) -> Self {
        self.field(name, Some(json_path.into()), FieldType::Text, false)
    }

    pub fn numeric(self, name: impl Into<String>) -> Self {
        self.field(name, None, FieldType::Numeric, false)
    }

    pub fn numeric_sortable(self, name: impl Into<String>) -> Self {
        self.field(name, None, FieldType::Numeric, true)
    }

    pub fn tag(self, name: impl Into<String>) -> Self {
        self.field(name, None, FieldType::Tag, false)
    }

    fn field(
        mut self,
        name: impl Into<String>,
        json_path: Option<String>,
        field_type: FieldType,
        sortable: bool,
    ) -> Self {
        self.fields.push(SchemaField {
            name: name.into(),
            json_path,
            field_type,
            sortable,
        });
        self
    }

    /// Generate the FT.CREATE command arguments
    pub fn to_ft_create_args(&self) -> Vec<String> {
        let mut args = vec![
            self.name.clone(),
            "ON".to_string(),
            "JSON".to_string(),
            "PREFIX".to_string(),
            "1".to_string(),
            self.prefix.clone(),
            "SCHEMA".to_string(),
        ];

        for field in &self.fields {
            args.extend(field.to_schema_args());
        }

        args
    }
}

#[derive(Debug, Clone)]
pub struct SchemaField {
    /// Field name (used in queries)
    pub name: String,
    /// JSON path (defaults to $.{name})
    pub json_path: Option<String>,
    pub field_type: FieldType,
    pub sortable: bool,
}

impl SchemaField {
    fn to_schema_args(&self) -> Vec<String> {
        let json_path = self
            .json_path
            .clone()
            .unwrap_or_else(|| format!("$.{}", self.name));

        let mut args = vec![
            json_path,
            "AS".to_string(),
            self.name.clone(),
            self.field_type.to_string(),
        ];

        if self.sortable {
            args.push("SORTABLE".to_string());
        }

        args
    }
}

/// Field types used by the event index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Numeric,
    Tag,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::Text => write!(f, "TEXT"),
            FieldType::Numeric => write!(f, "NUMERIC"),
            FieldType::Tag => write!(f, "TAG"),
        }
    }
}
