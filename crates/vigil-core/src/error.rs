//! Error types and result aliases for vigil.
//!
//! Errors are structured for programmatic handling and include enough
//! context to be logged directly.

/// The result type used throughout vigil-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the shared primitives.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_display() {
        let err = Error::InvalidInput("window end precedes start".into());
        assert_eq!(err.to_string(), "invalid input: window end precedes start");
    }

    #[test]
    fn invalid_id_display() {
        let err = Error::InvalidId {
            message: "bad".into(),
        };
        assert!(err.to_string().contains("invalid identifier"));
    }
}
