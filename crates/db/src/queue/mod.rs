use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use cleanq_core::domain::record::QueueEntry;
use cleanq_core::errors::PipelineError;

pub mod csv_file;
pub mod memory;

pub use csv_file::CsvQueueStore;
pub use memory::InMemoryQueueStore;

/// Column header of the persisted queue file, in file order.
pub const QUEUE_COLUMNS: [&str; 9] = [
    "date_added_to_queue",
    "project_name",
    "sqft",
    "supervisor",
    "supervisor_contact",
    "project_start",
    "cleans",
    "touchups",
    "project_requirements",
];

/// Joins requirement entries inside the single `project_requirements` cell.
/// Commas are legal inside a requirement, so they cannot be used here.
pub const REQUIREMENT_SEPARATOR: char = '|';

#[derive(Debug, Error)]
pub enum QueueStoreError {
    #[error("queue schema mismatch: expected `{expected}`, found `{found}`")]
    SchemaMismatch { expected: String, found: String },
    #[error("queue file io error at `{path}`: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("queue file csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("queue row {row} is invalid: {message}")]
    Decode { row: usize, message: String },
    #[error("queue file could not be encoded: {0}")]
    Encode(String),
}

impl From<QueueStoreError> for PipelineError {
    fn from(error: QueueStoreError) -> Self {
        match error {
            QueueStoreError::SchemaMismatch { expected, found } => {
                PipelineError::SchemaMismatch { expected, found }
            }
            other => PipelineError::Persistence(other.to_string()),
        }
    }
}

/// Durable, append-only collection of committed requests ordered by the
/// date they were added.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Creates the backing store with its header when absent. Never
    /// truncates existing data.
    async fn ensure_initialized(&self) -> Result<(), QueueStoreError>;

    /// Adds one entry and re-sorts the queue by `date_added` (stable).
    async fn append(&self, entry: QueueEntry) -> Result<(), QueueStoreError>;

    async fn all(&self) -> Result<Vec<QueueEntry>, QueueStoreError>;

    async fn exists(&self) -> Result<bool, QueueStoreError>;
}
