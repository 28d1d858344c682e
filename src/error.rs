//! Error types for the scorerender library.
//!
//! Three distinct error types reflect three distinct moments of failure:
//!
//! * [`RenderError`] - returned by [`crate::render::Renderer::render`]. Every
//!   failure inside the pipeline is converted into exactly one variant of this
//!   enum before it crosses the orchestrator boundary, and every variant maps
//!   to exactly one stable [`ErrorCode`].
//!
//! * [`ConfigError`] - builder validation failed while constructing a
//!   [`crate::config::RenderConfig`].
//!
//! * [`RegistryError`] - a notation could not be added to a
//!   [`crate::notation::NotationRegistry`].
//!
//! Only `RenderError` is ever seen on the render path; the other two surface
//! at start-up, before any fragment is processed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All failures a render operation can report.
///
/// The set is closed: callers can match exhaustively on [`RenderError::code`]
/// and decide how to present each group (see [`ErrorCategory`]).
#[derive(Debug, Error)]
pub enum RenderError {
    // ── Input rejection ───────────────────────────────────────────────────
    /// Fragment is empty or matched the notation's blacklist.
    #[error("Invalid input for notation '{notation}': {reason}")]
    InvalidInput { notation: String, reason: String },

    /// Fragment is longer than the configured maximum.
    #[error("Fragment is {length} bytes long, the limit is {limit} bytes")]
    LengthExceeded { length: usize, limit: usize },

    // ── Environment misconfiguration ──────────────────────────────────────
    /// The image-conversion program is missing or not executable.
    #[error("Image conversion program '{path}' is missing or not executable")]
    ConvertUnusable { path: PathBuf },

    /// The cache directory does not exist or cannot be written to.
    #[error("Cache directory '{path}' does not exist or is not writable")]
    CacheDirectoryNotWritable { path: PathBuf },

    /// Neither the configured nor the system temporary directory is usable.
    #[error("Temporary directory '{path}' does not exist or is not writable")]
    TempDirectoryNotWritable { path: PathBuf },

    /// The input document or the intermediate placeholder could not be written.
    #[error("Failed to write temporary file '{path}': {source}")]
    TempFileNotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── External-process failure ──────────────────────────────────────────
    /// Stage 1 (source → page description) failed or produced nothing.
    #[error("Rendering with '{notation}' failed: {detail}")]
    RenderingError {
        notation: String,
        detail: String,
        command_output: String,
    },

    /// Stage 2 (page description → PNG) failed.
    #[error("Image conversion failed: {detail}")]
    ImageConvertFailure {
        detail: String,
        command_output: String,
    },

    // ── Internal contract violation ───────────────────────────────────────
    /// The requested notation is not registered, or a registered notation
    /// could not fulfil its contract.
    #[error("Notation '{notation}' is not available: {detail}")]
    InternalClass { notation: String, detail: String },
}

impl RenderError {
    /// The stable identifier for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            RenderError::InvalidInput { .. } => ErrorCode::InvalidInput,
            RenderError::LengthExceeded { .. } => ErrorCode::LengthExceeded,
            RenderError::ConvertUnusable { .. } => ErrorCode::ConvertUnusable,
            RenderError::CacheDirectoryNotWritable { .. } => ErrorCode::CacheDirectoryNotWritable,
            RenderError::TempDirectoryNotWritable { .. } => ErrorCode::TempDirectoryNotWritable,
            RenderError::TempFileNotWritable { .. } => ErrorCode::TempFileNotWritable,
            RenderError::RenderingError { .. } => ErrorCode::RenderingError,
            RenderError::ImageConvertFailure { .. } => ErrorCode::ImageConvertFailure,
            RenderError::InternalClass { .. } => ErrorCode::InternalClass,
        }
    }

    /// Combined stdout/stderr of the last external command, when the failure
    /// came from one.
    pub fn command_output(&self) -> Option<&str> {
        match self {
            RenderError::RenderingError { command_output, .. }
            | RenderError::ImageConvertFailure { command_output, .. } => Some(command_output),
            _ => None,
        }
    }

    /// Shorthand for `self.code().category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code().category()
    }
}

/// Stable, closed set of error identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidInput,
    LengthExceeded,
    ConvertUnusable,
    CacheDirectoryNotWritable,
    TempDirectoryNotWritable,
    TempFileNotWritable,
    RenderingError,
    ImageConvertFailure,
    InternalClass,
}

impl ErrorCode {
    /// Every code, in pipeline order.
    pub const ALL: [ErrorCode; 9] = [
        ErrorCode::InvalidInput,
        ErrorCode::LengthExceeded,
        ErrorCode::ConvertUnusable,
        ErrorCode::CacheDirectoryNotWritable,
        ErrorCode::TempDirectoryNotWritable,
        ErrorCode::TempFileNotWritable,
        ErrorCode::RenderingError,
        ErrorCode::ImageConvertFailure,
        ErrorCode::InternalClass,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::LengthExceeded => "LENGTH_EXCEEDED",
            ErrorCode::ConvertUnusable => "CONVERT_UNUSABLE",
            ErrorCode::CacheDirectoryNotWritable => "CACHE_DIRECTORY_NOT_WRITABLE",
            ErrorCode::TempDirectoryNotWritable => "TEMP_DIRECTORY_NOT_WRITABLE",
            ErrorCode::TempFileNotWritable => "TEMP_FILE_NOT_WRITABLE",
            ErrorCode::RenderingError => "RENDERING_ERROR",
            ErrorCode::ImageConvertFailure => "IMAGE_CONVERT_FAILURE",
            ErrorCode::InternalClass => "INTERNAL_CLASS",
        }
    }

    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorCode::InvalidInput | ErrorCode::LengthExceeded => ErrorCategory::InputRejection,
            ErrorCode::ConvertUnusable
            | ErrorCode::CacheDirectoryNotWritable
            | ErrorCode::TempDirectoryNotWritable
            | ErrorCode::TempFileNotWritable => ErrorCategory::Environment,
            ErrorCode::RenderingError | ErrorCode::ImageConvertFailure => {
                ErrorCategory::ExternalProcess
            }
            ErrorCode::InternalClass => ErrorCategory::Internal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who can act on a failure.
///
/// | Category | Audience |
/// |----------|----------|
/// | `InputRejection` | the author of the fragment |
/// | `Environment` | the operator (directories, missing programs) |
/// | `ExternalProcess` | the operator, with the raw program output |
/// | `Internal` | the integrator (notation registration / configuration) |
///
/// None of them is retried automatically: the external programs are assumed
/// deterministic on identical input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    InputRejection,
    Environment,
    ExternalProcess,
    Internal,
}

/// Builder validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid cache prefix '{0}': use letters, digits and underscores only")]
    InvalidCachePrefix(String),

    #[error("Image width must be at least 1 pixel")]
    ZeroImageWidth,

    #[error("Stage timeout must be greater than zero")]
    ZeroTimeout,
}

/// Notation registration failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Notation '{0}' is already registered")]
    Duplicate(String),

    #[error("Invalid notation identifier '{0}': use letters, digits and underscores only")]
    InvalidIdentifier(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_have_stable_identifiers() {
        let ids: Vec<&str> = ErrorCode::ALL.iter().map(|c| c.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "INVALID_INPUT",
                "LENGTH_EXCEEDED",
                "CONVERT_UNUSABLE",
                "CACHE_DIRECTORY_NOT_WRITABLE",
                "TEMP_DIRECTORY_NOT_WRITABLE",
                "TEMP_FILE_NOT_WRITABLE",
                "RENDERING_ERROR",
                "IMAGE_CONVERT_FAILURE",
                "INTERNAL_CLASS",
            ]
        );
    }

    #[test]
    fn serde_uses_the_stable_identifier() {
        let json = serde_json::to_string(&ErrorCode::CacheDirectoryNotWritable).unwrap();
        assert_eq!(json, "\"CACHE_DIRECTORY_NOT_WRITABLE\"");
        let back: ErrorCode = serde_json::from_str("\"RENDERING_ERROR\"").unwrap();
        assert_eq!(back, ErrorCode::RenderingError);
    }

    #[test]
    fn categories_follow_taxonomy() {
        assert_eq!(ErrorCode::LengthExceeded.category(), ErrorCategory::InputRejection);
        assert_eq!(ErrorCode::TempFileNotWritable.category(), ErrorCategory::Environment);
        assert_eq!(ErrorCode::ImageConvertFailure.category(), ErrorCategory::ExternalProcess);
        assert_eq!(ErrorCode::InternalClass.category(), ErrorCategory::Internal);
    }

    #[test]
    fn command_output_only_for_process_failures() {
        let e = RenderError::RenderingError {
            notation: "mup".into(),
            detail: "exit status 1".into(),
            command_output: "mup: syntax error".into(),
        };
        assert_eq!(e.code(), ErrorCode::RenderingError);
        assert_eq!(e.command_output(), Some("mup: syntax error"));

        let e = RenderError::LengthExceeded { length: 10, limit: 5 };
        assert_eq!(e.command_output(), None);
        assert!(e.to_string().contains("10 bytes"));
    }

    #[test]
    fn invalid_input_display() {
        let e = RenderError::InvalidInput {
            notation: "latex".into(),
            reason: "blacklisted token 'include'".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("latex"), "got: {msg}");
        assert!(msg.contains("include"), "got: {msg}");
    }
}
