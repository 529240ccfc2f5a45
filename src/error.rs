use thiserror::Error;

use crate::store::{ProjectId, SampleId};

/// Convenience alias for results using the crate error type.
pub type Result<T> = ::std::result::Result<T, CorrectionError>;

#[derive(Error, Debug)]
pub enum CorrectionError {
    #[error("project {0} not found")]
    ProjectNotFound(ProjectId),

    #[error("sample {0} not found")]
    SampleNotFound(SampleId),

    /// A pass cannot start at all. Per-element shortfalls inside a pass do
    /// not raise this; they skip the element and are reported in the
    /// diagnostics payload instead.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed reference table: {0}")]
    ReferenceTable(#[from] csv::Error),

    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),
}
