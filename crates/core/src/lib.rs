//! Core domain types and shared logic for Bulwark.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Record kinds (alerts, statistic entries, log entries) and their collections
//! - The CSV record codec used for bulk import and export
//! - Configuration shared by the engine and the CLI

pub mod codec;
pub mod config;
pub mod error;
pub mod record;

pub use codec::{CANONICAL_HEADERS, DecodedImport, RowWarning};
pub use error::{Error, Result};
pub use record::{Alert, Document, GeoLocation, LogEntry, Record, RecordKind, StatisticEntry};

/// Default number of items processed concurrently per batch window.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Upper bound for a configured batch window.
pub const MAX_BATCH_SIZE: usize = 500;

/// Default trash retention in days.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Collection holding trash entries.
pub const TRASH_COLLECTION: &str = "trash";
