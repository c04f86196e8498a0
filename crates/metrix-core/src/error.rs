//! Unified error type for the METRIX stack.
//!
//! Domain-specific errors (network validation, variant application, solver
//! failures) convert into [`MetrixError`] at API boundaries so the variant
//! loop can decide uniformly whether to abort the variant or the whole run.

use thiserror::Error;

/// Unified error type for METRIX operations.
#[derive(Error, Debug)]
pub enum MetrixError {
    /// I/O errors (input files, result files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing errors in config / variant / parade streams
    #[error("Parse error: {0}")]
    Parse(String),

    /// Network structure or data validation errors
    #[error("Network error: {0}")]
    Network(String),

    /// Variant overlay could not be applied cleanly
    #[error("Variant error: {0}")]
    Variant(String),

    /// LP/MIP solver errors
    #[error("Solver error: {0}")]
    Solver(String),

    /// Numerical failure (singular factorization, lost pivot)
    #[error("Numerical error: {0}")]
    Numerical(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience alias for Results using [`MetrixError`].
pub type MetrixResult<T> = Result<T, MetrixError>;

impl From<anyhow::Error> for MetrixError {
    fn from(err: anyhow::Error) -> Self {
        MetrixError::Other(err.to_string())
    }
}

impl From<String> for MetrixError {
    fn from(s: String) -> Self {
        MetrixError::Other(s)
    }
}

impl From<&str> for MetrixError {
    fn from(s: &str) -> Self {
        MetrixError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MetrixError::Numerical("singular pivot on column 3".into());
        assert!(err.to_string().contains("Numerical error"));
        assert!(err.to_string().contains("column 3"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: MetrixError = io_err.into();
        assert!(matches!(err, MetrixError::Io(_)));
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> MetrixResult<()> {
            Err(MetrixError::Variant("test".into()))
        }
        fn outer() -> MetrixResult<()> {
            inner()?;
            Ok(())
        }
        assert!(outer().is_err());
    }
}
