//! Persistence layer for the mentor push service.
//!
//! This crate contains:
//! - Database connection management and migrations
//! - Entity definitions (database row mappings)
//! - The PostgreSQL profile store behind the device registry
//! - The file-backed local store for history and dedup documents

pub mod db;
pub mod entities;
pub mod local_store;
pub mod metrics;
pub mod repositories;

pub use local_store::FileLocalStore;
pub use repositories::PgProfileStore;
