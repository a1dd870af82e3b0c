//! Error types for the scraping pipeline.

use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_chains_per_first_user must be at least 1 (0 would drop every sample)")]
    ZeroDiversityCap,
    #[error("max_depth must be at least 1")]
    ZeroDepth,
    #[error("max_response_chars must be at least 1")]
    ZeroResponseCap,
    #[error("offset_step must be at least 1 (0 would fetch the same index page forever)")]
    ZeroOffsetStep,
}

/// A message list that breaks the sample shape.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SampleError {
    #[error("sample needs at least 3 messages, got {0}")]
    TooShort(usize),
    #[error("message {index} should be {expected} but is {found}")]
    WrongRole {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
}

/// Errors surfaced by pipeline I/O.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("no HTML files found under {0}")]
    NoInput(String),
}
