// Data Matrix - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod config;
pub mod error;
pub mod filter;     // Identifier filter for ingestion runs
pub mod ingest;     // Ingestion Pipeline - CSV/gzip extracts -> merges
pub mod layout;     // Character-trie paths for entity files
pub mod matrix;     // DataMatrix facade
pub mod migration;  // Legacy asset_index.json conversion
pub mod query;      // Query executor
pub mod sql;        // Query parser
pub mod store;      // Entity Store - documents + provenance
pub mod temporal;   // Effective dates and provenance records

// Re-export commonly used types
pub use config::Settings;
pub use error::{MatrixError, ParseError, Result};
pub use filter::IdFilter;
pub use ingest::{is_data_file, BatchReport, FailedFile, FileReport, Ingestor};
pub use matrix::DataMatrix;
pub use migration::{migrate_legacy_index, MigrationOutcome};
pub use query::QueryEngine;
pub use sql::{parse, Operator, Predicate, Projection, Query};
pub use store::{ColumnResolver, ColumnUpdate, Document, EntityStore, StoreStats};
pub use temporal::{ColumnIndex, ColumnProvenance, EffectiveDate, ProvenanceRecord};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
