// src/error.rs

//! Error types shared across the pipeline.
//!
//! Most of these never escape a single document or line item: the
//! orchestrator turns them into notices and keeps going.

use thiserror::Error;

/// Failure to turn a raw document into text or rows.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Text document is not valid UTF-8.
    #[error("document is not valid UTF-8: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    /// The PDF could not be opened or read.
    #[error("failed to read PDF: {0}")]
    Pdf(String),

    /// The CSV could not be parsed as a table.
    #[error("failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of one external service call.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("service returned an empty completion")]
    EmptyResponse,

    /// The backend is configured but not reachable.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Why one cascade step got nothing usable from its service call.
#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The service answered, but not with the expected JSON.
    #[error("malformed response: {0}")]
    Malformed(&'static str),
}

/// Failure of the model-based invoice parser for one document.
#[derive(Error, Debug)]
pub enum InvoiceError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The service answered but no invoice object could be decoded.
    #[error("malformed extraction response")]
    Malformed,
}

/// Failure to load the reference emission-factor table.
#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse reference table: {0}")]
    Csv(#[from] csv::Error),

    /// Required columns are absent from the header row.
    #[error("reference table is missing columns: {}", .0.join(", "))]
    SchemaViolation(Vec<String>),
}

/// Failure of the accumulated result store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid entry: {0}")]
    InvalidEntry(String),
}

/// Failure to read or edit the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config document: {0}")]
    Edit(#[from] toml_edit::TomlError),

    #[error("invalid config key `{0}`")]
    InvalidKey(String),

    /// Nothing can run without a credential for the remote backend.
    #[error("{0} env var required for the remote backend")]
    MissingCredential(&'static str),
}
