use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum LocusError {
    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("field '{field}' must be {expected}")]
    InvalidField {
        field: String,
        expected: &'static str,
    },

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("invalid request JSON: {0}")]
    InvalidRequest(String),

    #[error("unknown request type: {0}")]
    UnknownRequestType(String),

    #[error("failed to open matrix source: {0}")]
    SourceOpen(String),

    #[error("failed to open result cache: {0}")]
    CacheOpen(String),

    #[error("{0}")]
    RegionFetch(String),

    #[error("cache access failed: {0}")]
    CacheAccess(String),

    #[error("failed to compute cache key: {0}")]
    KeyComputation(String),

    #[error("invalid cache directive: {0}")]
    InvalidDirective(String),

    #[error("invalid locus: {0}")]
    InvalidLocus(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl LocusError {
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            LocusError::MissingField(_)
                | LocusError::InvalidField { .. }
                | LocusError::FileNotFound(_)
                | LocusError::InvalidRequest(_)
                | LocusError::UnknownRequestType(_)
                | LocusError::SourceOpen(_)
                | LocusError::CacheOpen(_)
        )
    }
}
