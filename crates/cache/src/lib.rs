//! SQLite cache database for scan results and enrichment payloads.
//!
//! This crate provides the persistent cache that remembers what has already
//! been hashed. The database is not the source of truth — the input files
//! are. If the database is deleted, every digest can be recomputed by
//! scanning again; the cache only saves the work.
//!
//! # Architecture
//! Both tables are keyed by the SHA-256 of the hashable payload (digest
//! equality implies payload equality, so no other identity is needed):
//! - **checksums**: the full digest set computed for a payload, so later
//!   runs can skip re-hashing content they have already seen.
//! - **enrichment**: raw JSON payloads fetched from external metadata
//!   services, keyed by `(sha256, service)` so cache-only runs can answer
//!   lookups without the network.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::models::DigestRecord;
pub use crate::repo::Repository;
