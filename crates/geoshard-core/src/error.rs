//! Error types for the geoshard core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.

use thiserror::Error;

/// Result type alias for geoshard operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for geoshard.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Relational store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Partition routing or view error
    #[error("Partition error: {0}")]
    Partition(#[from] PartitionError),

    /// Progress ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Manifest loading error
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Relational store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to establish a connection
    #[error("Connection failed to {dsn}: {message}")]
    ConnectionFailed { dsn: String, message: String },

    /// Table creation failed
    #[error("Failed to create table {table}: {message}")]
    TableCreate { table: String, message: String },

    /// Batch insert rejected
    #[error("Insert into {table} failed: {message}")]
    InsertFailed { table: String, message: String },

    /// View creation failed
    #[error("Failed to create view {view}: {message}")]
    ViewCreate { view: String, message: String },

    /// Catalog introspection failed
    #[error("Catalog introspection failed: {0}")]
    Introspection(String),

    /// Read query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A result row could not be decoded
    #[error("Row decode failed: {0}")]
    RowDecode(String),

    /// Table or view does not exist
    #[error("Relation not found: {0}")]
    NotFound(String),
}

/// Partition routing and unified view errors.
#[derive(Error, Debug)]
pub enum PartitionError {
    /// Group key cannot be routed to a partition
    #[error("Invalid group key: {0:?}")]
    InvalidGroupKey(String),

    /// A unified view was requested but no partitions exist
    #[error("No partitions exist; nothing to build the unified view from")]
    NoPartitions,
}

/// Progress ledger errors.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Another run holds the working directory
    #[error("Ledger locked by another run: {path}")]
    LockHeld { path: String },

    /// Entry write failed
    #[error("Entry write failed: {0}")]
    WriteFailed(String),

    /// Log corrupted
    #[error("Ledger corrupted at line {line}: {message}")]
    Corrupted { line: u64, message: String },
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
