//! Error types for the allocation and simulation engine.

use thiserror::Error;

/// Main error type for strata.
///
/// The first five variants are the failure modes of the quantitative core and
/// are always surfaced to the caller; the engine never substitutes a default
/// weight vector or skips an instrument that failed to fit.
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Infeasible optimization: {0}")]
    InfeasibleOptimization(String),

    #[error("Volatility model fit failed: {0}")]
    ModelFit(String),

    #[error("Unknown strategy: '{0}'")]
    UnknownStrategy(String),

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("No data loaded")]
    NoData,

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Result type alias for strata operations.
pub type Result<T> = std::result::Result<T, StrataError>;
