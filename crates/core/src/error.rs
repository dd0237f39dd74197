//! Error types for the code runner.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using the runner's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the code runner.
///
/// Messages carried by the sandbox variants are already sanitized: backend
/// error text and sandbox names are logged where they occur and never placed
/// here.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Execution cancelled")]
    Cancelled,

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Profile incompatible: {0}")]
    ProfileIncompatible(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // =========================================================================
    // Sandbox Lifecycle Errors
    // =========================================================================
    #[error("Sandbox creation failed: {0}")]
    SandboxCreateFailed(String),

    #[error("Sandbox start failed: {0}")]
    SandboxStartFailed(String),

    #[error("Execution timed out after {}ms", limit.as_millis())]
    ExecutionTimeout { limit: Duration },

    #[error("Output capture failed: {0}")]
    OutputCaptureFailed(String),

    #[error("Sandbox cleanup failed: {0}")]
    CleanupFailed(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an unsupported language error.
    pub fn unsupported_language(language: impl Into<String>) -> Self {
        Self::UnsupportedLanguage(language.into())
    }

    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a profile incompatible error.
    pub fn profile_incompatible(msg: impl Into<String>) -> Self {
        Self::ProfileIncompatible(msg.into())
    }

    /// Create a sandbox create error.
    pub fn sandbox_create(msg: impl Into<String>) -> Self {
        Self::SandboxCreateFailed(msg.into())
    }

    /// Create a sandbox start error.
    pub fn sandbox_start(msg: impl Into<String>) -> Self {
        Self::SandboxStartFailed(msg.into())
    }

    /// Create an output capture error.
    pub fn output_capture(msg: impl Into<String>) -> Self {
        Self::OutputCaptureFailed(msg.into())
    }

    /// Create a cleanup error.
    pub fn cleanup(msg: impl Into<String>) -> Self {
        Self::CleanupFailed(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable code for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedLanguage(_) => "unsupported_language",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Cancelled => "cancelled",
            Self::ProfileIncompatible(_) => "profile_incompatible",
            Self::Config(_) => "config",
            Self::SandboxCreateFailed(_) => "sandbox_create_failed",
            Self::SandboxStartFailed(_) => "sandbox_start_failed",
            Self::ExecutionTimeout { .. } => "execution_timeout",
            Self::OutputCaptureFailed(_) => "output_capture_failed",
            Self::CleanupFailed(_) => "cleanup_failed",
            Self::Internal(_) => "internal",
            Self::Other(_) => "other",
        }
    }

    /// Whether the error was caused by the request itself rather than the
    /// engine or its backend.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedLanguage(_) | Self::InvalidRequest(_) | Self::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_is_stable() {
        assert_eq!(
            Error::unsupported_language("cobol").kind(),
            "unsupported_language"
        );
        assert_eq!(
            Error::ExecutionTimeout {
                limit: Duration::from_secs(2)
            }
            .kind(),
            "execution_timeout"
        );
        assert_eq!(Error::cleanup("x").kind(), "cleanup_failed");
    }

    #[test]
    fn test_timeout_message_uses_millis() {
        let err = Error::ExecutionTimeout {
            limit: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "Execution timed out after 1500ms");
    }

    #[test]
    fn test_client_errors() {
        assert!(Error::unsupported_language("cobol").is_client_error());
        assert!(Error::invalid_request("bad").is_client_error());
        assert!(!Error::sandbox_create("down").is_client_error());
    }
}
