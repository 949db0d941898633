//! Shared primitives used across Periscope crates.

use core::fmt;

/// Result alias used across the workspace.
pub type ViewerResult<T> = Result<T, ViewerError>;

/// Top-level error type shared by every viewer subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerError {
    pub code: &'static str,
    pub message: String,
}

impl ViewerError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ViewerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ViewerError {}
