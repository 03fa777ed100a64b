//! Error types for sales journal ingestion

use thiserror::Error;

/// Result type alias for sales journal operations
pub type Result<T> = std::result::Result<T, SjError>;

/// Main error type for sales journal ingestion
#[derive(Error, Debug)]
pub enum SjError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Primary key {key} is outside the configured domain [{min}, {max}]")]
    KeyOutOfRange { key: i64, min: i64, max: i64 },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Type limit check failure for '{field}': {count} entries exceeded max size {max_size}")]
    TypeLimit {
        field: String,
        count: usize,
        max_size: usize,
    },

    #[error("Database error: {0}")]
    Database(String),
}

impl SjError {
    /// Build a configuration error from anything displayable
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Build a parse error from anything displayable
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Whether the error belongs to the configuration class.
    ///
    /// Configuration errors abort the run before (or instead of) any further I/O.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SjError::Config(_)
                | SjError::InvalidPath(_)
                | SjError::KeyOutOfRange { .. }
                | SjError::Pattern(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_class() {
        assert!(SjError::config("bad cap").is_configuration());
        assert!(SjError::KeyOutOfRange { key: 11, min: 0, max: 10 }.is_configuration());
        assert!(!SjError::Database("connection reset".into()).is_configuration());
        assert!(!SjError::parse("bad int").is_configuration());
    }

    #[test]
    fn test_type_limit_message() {
        let err = SjError::TypeLimit {
            field: "PROMOCODE".into(),
            count: 2,
            max_size: 8,
        };
        assert_eq!(
            err.to_string(),
            "Type limit check failure for 'PROMOCODE': 2 entries exceeded max size 8"
        );
    }
}
