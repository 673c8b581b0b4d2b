//! The recognition call seam.
//!
//! A `ModelInvoker` performs exactly one call against one named model and
//! never retries. Repeats are expressed by the collector, pacing by the
//! implementation's rate limiter.

use crate::models::RecognitionError;
use async_trait::async_trait;
use std::fmt;

/// Why a call is being made. Recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPurpose {
    Recognition,
    Judge,
}

impl fmt::Display for CallPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recognition => write!(f, "recognition"),
            Self::Judge => write!(f, "judge"),
        }
    }
}

/// Image attached to a request.
#[derive(Debug, Clone, Copy)]
pub struct ImagePayload<'a> {
    pub bytes: &'a [u8],
    pub mime_type: &'a str,
}

/// One request to one model.
#[derive(Debug, Clone, Copy)]
pub struct RecognitionRequest<'a> {
    pub model: &'a str,
    /// Identifier of the page the call is about (file name)
    pub image_ref: &'a str,
    pub prompt: &'a str,
    pub image: Option<ImagePayload<'a>>,
    pub purpose: CallPurpose,
}

/// Performs one text-generation call and returns the model's text.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(&self, request: RecognitionRequest<'_>) -> Result<String, RecognitionError>;
}
