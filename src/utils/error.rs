// src/utils/error.rs
use chrono::NaiveDate;
use thiserror::Error;

// Define specific error types for different parts of the application
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error), // Automatically convert reqwest errors

    #[error("HTTP error: {0}")]
    Http(reqwest::StatusCode), // e.g., 500 Internal Server Error

    #[error("CVM rate limit likely exceeded")]
    RateLimited,

    #[error("Invalid page URL: {0}")]
    Url(String),

    #[error("Failed to parse CVM page: {0}")]
    Parse(#[from] ParseError),
}

/// A single field or page could not be extracted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: '{value}'")]
    InvalidValue { field: String, value: String },
}

/// Delta computation hit data it cannot do arithmetic on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MathError {
    #[error("Non-numeric value for account {account} at {quarter}")]
    NonNumeric { account: String, quarter: NaiveDate },

    #[error("Arithmetic overflow for account {0}")]
    Overflow(String),

    #[error("Rows from more than one year group handed to the normalizer ({0})")]
    MixedGroup(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Backup of {path} failed: {source}")]
    Backup {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error), // Automatically convert IO errors

    #[error("CVM interaction failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Data processing failed: {0}")]
    Processing(String),
}
