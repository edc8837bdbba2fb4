use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("database file already exists")]
    Exists,
    #[error("database is in use by another handle")]
    InUse,
    #[error("could not open the write-ahead log: {0}")]
    LogOpen(io::Error),
    #[error("write-ahead log is full, checkpoint required")]
    LogFull,
    #[error("corruption detected: {0}")]
    Corrupt(String),
    #[error("store is read-only after a log write failure")]
    ReadOnly,
    #[error("transaction is no longer active")]
    Inactive,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
