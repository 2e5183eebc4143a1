//! Custom error types for conductor.
//!
//! Variants are grouped by how the orchestrator treats them: configuration
//! and resume errors abort before the state machine starts, attempt-local and
//! isolation errors are absorbed inside a build, and guardian ceilings end the
//! run in `Failed`.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for conductor operations
#[derive(Error, Debug)]
pub enum ConductorError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Missing required tool
    #[error("Missing required tool: {tool}")]
    MissingTool { tool: String },

    // =========================================================================
    // Attempt-local Errors
    // =========================================================================
    /// Generation step failed
    #[error("Generation failed: {message}")]
    Generation { message: String },

    /// A generated artifact failed its self-test
    #[error("Self-test failed for {file}: {message}")]
    SelfTest { file: String, message: String },

    /// A bounded operation ran out of time
    #[error("{what} timed out after {secs}s")]
    Timeout { what: String, secs: u64 },

    /// Generated file path escapes the workspace
    #[error("Rejected artifact path: {path}")]
    UnsafePath { path: String },

    // =========================================================================
    // Isolation Errors
    // =========================================================================
    /// Branch or commit operation failed on every strategy
    #[error("Isolation operation failed: {operation} - {message}")]
    Isolation { operation: String, message: String },

    // =========================================================================
    // Guardian Errors
    // =========================================================================
    /// A guardian ceiling was reached
    #[error("Guardian ceiling reached: {ceiling}")]
    GuardianLimit { ceiling: String },

    // =========================================================================
    // Planning / Resume Errors
    // =========================================================================
    /// Plan approval did not arrive in time
    #[error("Plan approval timed out after {secs}s")]
    ApprovalTimeout { secs: u64 },

    /// Persisted run state is missing or unreadable
    #[error("Cannot resume from {path}: {reason}")]
    Resume { path: PathBuf, reason: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// TOML parse error wrapper
    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConductorError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a generation error
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }

    /// Create a self-test error
    pub fn self_test(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SelfTest {
            file: file.into(),
            message: message.into(),
        }
    }

    /// Create an isolation error
    pub fn isolation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Isolation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a resume error
    pub fn resume(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Resume {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Recover a conductor error carried through a collaborator's
    /// `anyhow::Error`, wrapping anything else as [`ConductorError::Other`].
    pub fn from_collaborator(err: anyhow::Error) -> Self {
        match err.downcast::<Self>() {
            Ok(inner) => inner,
            Err(other) => Self::Other(other),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error is recovered inside a build attempt
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Generation { .. }
                | Self::SelfTest { .. }
                | Self::Timeout { .. }
                | Self::UnsafePath { .. }
                | Self::Isolation { .. }
        )
    }

    /// Check if this error is fatal (the run does not start or cannot continue)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::InvalidConfig { .. }
                | Self::MissingTool { .. }
                | Self::Resume { .. }
                | Self::GuardianLimit { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::GuardianLimit { .. } => 3,
            Self::ApprovalTimeout { .. } => 4,
            Self::Resume { .. } => 5,
            Self::MissingTool { .. } => 6,
            Self::Config { .. } | Self::InvalidConfig { .. } | Self::Toml(_) => 7,
            _ => 1,
        }
    }
}

/// Type alias for conductor results
pub type Result<T> = std::result::Result<T, ConductorError>;
