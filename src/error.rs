//! Error types and handling for Ecolit
//!
//! This module defines the error types used throughout the application.
//! Vendor and network failures are recoverable (`Communication`, `Timeout`),
//! configuration problems are fatal at construction (`Config`, `Validation`),
//! and user-actionable conditions such as an unplugged cable surface as
//! `Precondition`.

use thiserror::Error;

/// Result type alias for Ecolit operations
pub type Result<T> = std::result::Result<T, EcolitError>;

/// Main error type for Ecolit
#[derive(Debug, Error)]
pub enum EcolitError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Vendor API or device communication failures; state is unknown
    #[error("Communication error: {message}")]
    Communication { message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// A precondition for the requested action does not hold
    #[error("Precondition failed: {message}")]
    Precondition { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// HTTP/Web server errors
    #[error("Web server error: {message}")]
    Web { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl EcolitError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        EcolitError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        EcolitError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new communication error
    pub fn communication<S: Into<String>>(message: S) -> Self {
        EcolitError::Communication {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        EcolitError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new precondition error
    pub fn precondition<S: Into<String>>(message: S) -> Self {
        EcolitError::Precondition {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        EcolitError::Io {
            message: message.into(),
        }
    }

    /// Create a new web error
    pub fn web<S: Into<String>>(message: S) -> Self {
        EcolitError::Web {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        EcolitError::Generic {
            message: message.into(),
        }
    }

}

impl From<std::io::Error> for EcolitError {
    fn from(err: std::io::Error) -> Self {
        EcolitError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for EcolitError {
    fn from(err: serde_yaml::Error) -> Self {
        EcolitError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EcolitError {
    fn from(err: serde_json::Error) -> Self {
        EcolitError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<csv::Error> for EcolitError {
    fn from(err: csv::Error) -> Self {
        EcolitError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<tokio::time::error::Elapsed> for EcolitError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        EcolitError::timeout(err.to_string())
    }
}

#[cfg(feature = "wall-connector")]
impl From<reqwest::Error> for EcolitError {
    fn from(err: reqwest::Error) -> Self {
        EcolitError::communication(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = EcolitError::config("test config error");
        assert!(matches!(err, EcolitError::Config { .. }));

        let err = EcolitError::communication("vehicle offline");
        assert!(matches!(err, EcolitError::Communication { .. }));

        let err = EcolitError::validation("field", "test validation error");
        assert!(matches!(err, EcolitError::Validation { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = EcolitError::config("test error");
        assert_eq!(format!("{}", err), "Configuration error: test error");

        let err = EcolitError::validation("ev_charging.max_amps", "must be at least 6");
        assert_eq!(
            format!("{}", err),
            "Validation error: ev_charging.max_amps - must be at least 6"
        );
    }
}
