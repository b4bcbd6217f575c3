//! Error taxonomy for the scoring engine
//!
//! Algorithmic modules return [`ScoringResult`]. I/O boundaries wrap these in
//! `anyhow::Error` with file context.

use thiserror::Error;

/// Errors raised while validating input or scoring a cohort
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    /// Duplicate keys, NaN/infinite values, missing columns, malformed periods
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// Zero-variance input or a cohort too small to classify
    #[error("degenerate cohort: {0}")]
    DegenerateCohort(String),

    /// Missing rules, mismatched vector lengths, invalid thresholds
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ScoringError {
    pub fn data(message: impl Into<String>) -> Self {
        Self::DataIntegrity(message.into())
    }

    pub fn degenerate(message: impl Into<String>) -> Self {
        Self::DegenerateCohort(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Message without the kind prefix
    pub fn detail(&self) -> &str {
        match self {
            ScoringError::DataIntegrity(m)
            | ScoringError::DegenerateCohort(m)
            | ScoringError::Configuration(m) => m,
        }
    }

    /// Short kind label used in logs and failure reports
    pub fn kind(&self) -> &'static str {
        match self {
            ScoringError::DataIntegrity(_) => "data-integrity",
            ScoringError::DegenerateCohort(_) => "degenerate-cohort",
            ScoringError::Configuration(_) => "configuration",
        }
    }
}

pub type ScoringResult<T> = std::result::Result<T, ScoringError>;
