// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage collaborators.
//!
//! - [`traits`]: the `RecordStore` / `IndexStore` seams and their typed requests
//! - [`memory`]: in-memory implementations for tests and demos
//! - [`sql`]: relational record store over sqlx (SQLite or MySQL)
//! - [`redis`]: RedisJSON + RediSearch index
//! - [`index_schema`]: `FT.CREATE` schema for the event index

pub mod index_schema;
pub mod memory;
pub mod redis;
pub mod sql;
pub mod traits;
