//! Batched Parquet writer for persisted records.
//!
//! Rows are buffered in memory, written into a `.parquet.tmp` file, and
//! atomically renamed into place on close, so readers never see a partial
//! file.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::Schema;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, Encoding, ZstdLevel};
use parquet::file::properties::{WriterProperties, WriterVersion};
use thiserror::Error;

use crate::schema::TableName;

/// Errors from storage writer operations.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Writer not initialized")]
    NotInitialized,

    #[error("Buffer empty")]
    EmptyBuffer,
}

/// Configuration for the batched writer.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Root directory for table partitions.
    pub base_dir: PathBuf,

    /// Compression codec.
    pub compression: Compression,

    /// Row group size in rows.
    pub row_group_size: usize,

    /// Maximum rows to buffer before flushing to the open file.
    pub batch_size: usize,

    /// Identifies the writing process in file names.
    pub instance_id: String,

    /// Sequence number of the file within this instance.
    pub file_seq: u64,
}

impl WriterConfig {
    /// Create config with defaults.
    pub fn new(base_dir: PathBuf, instance_id: impl Into<String>) -> Self {
        WriterConfig {
            base_dir,
            compression: ZstdLevel::try_new(3)
                .map(Compression::ZSTD)
                .unwrap_or(Compression::SNAPPY),
            row_group_size: 64 * 1024,
            batch_size: crate::DEFAULT_BATCH_SIZE,
            instance_id: instance_id.into(),
            file_seq: 0,
        }
    }

    /// Use snappy compression instead of zstd.
    pub fn with_snappy(mut self) -> Self {
        self.compression = Compression::SNAPPY;
        self
    }

    /// Set custom batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_file_seq(mut self, seq: u64) -> Self {
        self.file_seq = seq;
        self
    }
}

/// Batched writer for a single table file.
pub struct BatchedWriter {
    table: TableName,
    schema: Arc<Schema>,
    config: WriterConfig,
    buffer: Vec<RecordBatch>,
    rows_buffered: usize,
    rows_written: usize,
    output_path: Option<PathBuf>,
    temp_path: Option<PathBuf>,
    writer: Option<ArrowWriter<File>>,
}

impl BatchedWriter {
    pub fn new(table: TableName, schema: Arc<Schema>, config: WriterConfig) -> Self {
        BatchedWriter {
            table,
            schema,
            config,
            buffer: Vec::new(),
            rows_buffered: 0,
            rows_written: 0,
            output_path: None,
            temp_path: None,
            writer: None,
        }
    }

    /// Buffer a record batch, flushing once the buffer reaches the batch size.
    pub fn write(&mut self, batch: RecordBatch) -> Result<(), WriteError> {
        let num_rows = batch.num_rows();
        self.buffer.push(batch);
        self.rows_buffered += num_rows;

        if self.rows_buffered >= self.config.batch_size {
            self.flush()?;
        }

        Ok(())
    }

    /// Write buffered batches into the open temp file.
    pub fn flush(&mut self) -> Result<(), WriteError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        if self.writer.is_none() {
            self.init_writer()?;
        }

        let writer = self.writer.as_mut().ok_or(WriteError::NotInitialized)?;

        for batch in self.buffer.drain(..) {
            writer.write(&batch)?;
        }
        writer.flush()?;

        self.rows_written += self.rows_buffered;
        self.rows_buffered = 0;
        Ok(())
    }

    /// Close the writer and finalize the file.
    pub fn close(mut self) -> Result<PathBuf, WriteError> {
        if self.writer.is_none() && self.buffer.is_empty() {
            return Err(WriteError::EmptyBuffer);
        }
        self.flush()?;

        if let Some(writer) = self.writer.take() {
            writer.close()?;
        }

        let temp_path = self.temp_path.take().ok_or(WriteError::NotInitialized)?;
        let output_path = self.output_path.take().ok_or(WriteError::NotInitialized)?;
        atomic_rename(&temp_path, &output_path)?;

        Ok(output_path)
    }

    /// Rows handed to the Parquet writer so far.
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn rows_buffered(&self) -> usize {
        self.rows_buffered
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    fn init_writer(&mut self) -> Result<(), WriteError> {
        let output_path = self.build_output_path();

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = output_path.with_extension("parquet.tmp");
        let file = File::create(&temp_path)?;

        let props = WriterProperties::builder()
            .set_writer_version(WriterVersion::PARQUET_2_0)
            .set_compression(self.config.compression)
            .set_max_row_group_size(self.config.row_group_size)
            .set_dictionary_enabled(true)
            .set_encoding(Encoding::PLAIN)
            .build();

        let writer = ArrowWriter::try_new(file, self.schema.clone(), Some(props))?;

        self.writer = Some(writer);
        self.temp_path = Some(temp_path);
        self.output_path = Some(output_path);

        Ok(())
    }

    /// `<table>/year=YYYY/month=MM/day=DD/<table>_<instance>_<seq>.parquet`
    fn build_output_path(&self) -> PathBuf {
        let now = chrono::Utc::now();

        let partition_path = self
            .config
            .base_dir
            .join(self.table.as_str())
            .join(format!("year={}", now.format("%Y")))
            .join(format!("month={}", now.format("%m")))
            .join(format!("day={}", now.format("%d")));

        let filename = format!(
            "{}_{}_{:06}.parquet",
            self.table.as_str(),
            self.config.instance_id,
            self.config.file_seq
        );

        partition_path.join(filename)
    }
}

impl Drop for BatchedWriter {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            let _ = self.flush();
        }
    }
}

/// Rename temp file to final path atomically.
pub fn atomic_rename(temp_path: &Path, final_path: &Path) -> Result<(), WriteError> {
    fs::rename(temp_path, final_path)?;
    Ok(())
}

/// Read every batch from a finished Parquet file.
pub fn read_parquet_file(path: &Path) -> Result<Vec<RecordBatch>, WriteError> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok(batches)
}

/// Default storage directory under the XDG data dir.
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sieve")
        .join("records")
}
