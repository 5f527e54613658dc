//! Sieve durable storage.
//!
//! This crate provides:
//! - The Arrow schema of a persisted log record
//! - Conversion from in-memory messages to bounded-width records
//! - Batched Parquet writer with compression and atomic file finalisation
//! - Date-partitioned layout and retention pruning

pub mod record;
pub mod retention;
pub mod schema;
pub mod writer;

pub use record::{
    batch_to_records, dead_letters_to_batch, records_to_batch, truncate_utf8, PersistenceRecord,
};
pub use retention::{prune_partitions, PrunedPartition};
pub use schema::{dead_letters_schema, log_records_schema, TableName};
pub use writer::{read_parquet_file, BatchedWriter, WriteError, WriterConfig};

/// Schema version for persisted tables.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Default batch size for buffered writes.
pub const DEFAULT_BATCH_SIZE: usize = 1000;
