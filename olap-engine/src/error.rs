//! FILENAME: olap-engine/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PivotError {
    #[error("Invalid aggregate kind: {0}")]
    InvalidAggregateKind(String),

    #[error("Filter on field '{field}' failed: {message}")]
    Filter { field: String, message: String },

    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Duplicate field header: {0}")]
    DuplicateField(String),

    #[error("View definition error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PivotError>;
