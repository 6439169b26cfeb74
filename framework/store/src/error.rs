use load_test_core::prelude::RunId;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Run {0} does not exist")]
    UnknownRun(RunId),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },
}
