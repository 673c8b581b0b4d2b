//! Error types for pagescribe.
//!
//! The taxonomy follows the blast radius of each failure:
//! - `ConfigError`: fatal, raised before any model call
//! - `RecognitionError`: one attempt, recorded as a failed candidate
//! - `ArbitrationError`: fails the current page only
//! - `UnitError`: fails the current document unit only

use crate::models::{ConfigError, JudgeMode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for pagescribe.
#[derive(Debug, Error)]
pub enum ScribeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Recognition error: {0}")]
    Recognition(#[from] RecognitionError),

    #[error("Arbitration error: {0}")]
    Arbitration(#[from] ArbitrationError),

    #[error("Unit error: {0}")]
    Unit(#[from] UnitError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScribeError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Whether a failed recognition call is worth attempting again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognitionErrorKind {
    /// Network failure, timeout, rate limit or server-side error
    Transient,
    /// Malformed response or a request the endpoint will never accept
    Permanent,
}

impl fmt::Display for RecognitionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// Failure of a single recognition call against one model.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} failure from {model}: {cause}")]
pub struct RecognitionError {
    pub kind: RecognitionErrorKind,
    pub model: String,
    pub cause: String,
}

impl RecognitionError {
    pub fn transient(model: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            kind: RecognitionErrorKind::Transient,
            model: model.into(),
            cause: cause.into(),
        }
    }

    pub fn permanent(model: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            kind: RecognitionErrorKind::Permanent,
            model: model.into(),
            cause: cause.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == RecognitionErrorKind::Transient
    }
}

/// Failure to select an authoritative text for one page.
#[derive(Debug, Error)]
pub enum ArbitrationError {
    #[error("Judge mode '{0}' is not supported")]
    UnsupportedMode(JudgeMode),

    #[error("No successful candidates to arbitrate for {image}")]
    NoSuccessfulCandidates { image: String },

    #[error("{count} successful candidates for {image} but no judge model is configured")]
    MissingJudgeModel { image: String, count: usize },

    #[error("Judge call failed: {0}")]
    JudgeFailed(#[source] RecognitionError),

    #[error("Failed to write decision log: {0}")]
    Log(#[source] std::io::Error),
}

/// Failure that stops one document unit; sibling units keep running.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("Cannot read image directory {path:?}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot open {what} {path:?}: {source}")]
    Open {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed writing {what} {path:?}: {source}")]
    Write {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unit task aborted: {0}")]
    Aborted(String),
}

/// Result type alias for pagescribe.
pub type Result<T> = std::result::Result<T, ScribeError>;
