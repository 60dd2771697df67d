// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pairwise comparison of records and index documents, keyed by id.

use std::collections::BTreeMap;

use super::types::FieldMismatch;
use crate::record::{IndexDocument, Record};

/// Field name reported for an index entry that does not decode.
pub const DOCUMENT_FIELD: &str = "document";
/// Index-side value reported for an index entry that does not decode.
pub const UNDECODABLE: &str = "<undecodable>";

/// Set differences and field mismatches between the two stores.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Diff {
    pub missing_in_index: Vec<i64>,
    pub missing_in_record_store: Vec<i64>,
    pub mismatches: Vec<FieldMismatch>,
}

/// An index entry as seen by the comparison.
enum Entry<'a> {
    Document(&'a IndexDocument),
    Undecodable,
}

/// Compare full snapshots of both stores. Output lists are in ascending id order.
///
/// `undecodable` holds ids of index entries that exist but could not be read
/// as documents: drift against an existing record, an orphan otherwise.
pub fn diff(records: &[Record], documents: &[IndexDocument], undecodable: &[i64]) -> Diff {
    let by_record: BTreeMap<i64, &Record> = records.iter().map(|r| (r.id, r)).collect();
    let mut by_entry: BTreeMap<i64, Entry<'_>> =
        undecodable.iter().map(|&id| (id, Entry::Undecodable)).collect();
    by_entry.extend(documents.iter().map(|d| (d.id, Entry::Document(d))));

    let mut out = Diff::default();

    for (id, record) in &by_record {
        match by_entry.get(id) {
            Some(Entry::Document(doc)) => out.mismatches.extend(compare_record(record, doc)),
            Some(Entry::Undecodable) => out.mismatches.push(undecodable_mismatch(record)),
            None => out.missing_in_index.push(*id),
        }
    }

    out.missing_in_record_store = by_entry
        .keys()
        .filter(|id| !by_record.contains_key(id))
        .copied()
        .collect();

    out
}

/// Mismatch for a record whose index entry could not be decoded.
pub fn undecodable_mismatch(record: &Record) -> FieldMismatch {
    FieldMismatch {
        id: record.id,
        field: DOCUMENT_FIELD.to_string(),
        record_value: format!("record {}", record.id),
        index_value: UNDECODABLE.to_string(),
    }
}

/// Field-level differences for one id.
///
/// Compared: name, description, category_id, date, time, location, price
/// (at cent precision) and source.
pub fn compare_record(record: &Record, doc: &IndexDocument) -> Vec<FieldMismatch> {
    let mut mismatches = Vec::new();
    let mut check = |field: &str, record_value: String, index_value: String| {
        if record_value != index_value {
            mismatches.push(FieldMismatch {
                id: record.id,
                field: field.to_string(),
                record_value,
                index_value,
            });
        }
    };

    check("name", record.name.clone(), doc.name.clone());
    check("description", record.description.clone(), doc.description.clone());
    check("category_id", record.category_id.to_string(), doc.category_id.to_string());
    check("date", record.date.clone(), doc.date.clone());
    check("time", record.time.clone(), doc.time.clone());
    check("location", record.location.clone(), doc.location.clone());
    check("price", format!("{:.2}", record.price), format!("{:.2}", doc.price));
    check("source", record.source.clone(), doc.source.clone());

    mismatches
}
