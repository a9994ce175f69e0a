use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the UI layer: the accessibility engine, elements and the
/// `Desktop` facade.
#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Element is stale: {0}")]
    ElementStale(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Platform-specific error: {0}")]
    PlatformError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("UI Automation API error: {message}")]
    UIAutomationAPIError {
        message: String,
        com_error: Option<i32>,
        operation: String,
        is_retryable: bool,
    },
}

impl AutomationError {
    /// Whether retrying the same operation shortly afterwards can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AutomationError::ElementStale(_) | AutomationError::Timeout(_) => true,
            AutomationError::UIAutomationAPIError { is_retryable, .. } => *is_retryable,
            _ => false,
        }
    }
}

/// Unknown symbolic token passed to the locale dictionary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocaleError {
    #[error("Unknown UI token: {0}")]
    UnknownToken(String),

    #[error("Unknown language: {0}")]
    UnknownLanguage(String),
}

/// Errors surfaced by the batch pipeline.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Registry I/O failed for {}: {source}", path.display())]
    Registry {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{phase} failed: {reason}")]
    Phase { phase: &'static str, reason: String },

    #[error("Save dialog failed: {0}")]
    SaveDialog(String),

    #[error("No exported CSV found for {0}")]
    Verification(String),

    #[error("Interrupted by user")]
    Interrupted,

    #[error(transparent)]
    Automation(#[from] AutomationError),
}

impl ExtractError {
    pub(crate) fn phase(phase: &'static str, reason: impl Into<String>) -> Self {
        ExtractError::Phase {
            phase,
            reason: reason.into(),
        }
    }
}
