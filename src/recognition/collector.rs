//! Candidate collection for one page.
//!
//! Every configured model is called `repeat_count` times, in configured
//! order, one call at a time. A failed attempt becomes a failed candidate;
//! it never stops the remaining attempts.

use crate::client::{CallPurpose, ImagePayload, ModelInvoker, RecognitionRequest};
use crate::models::{Candidate, JobConfig, PageImage, RecognitionError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Prompt sent with every page image.
pub const DEFAULT_OCR_PROMPT: &str =
    "Read the content of the image word by word. Do not output anything else";

/// Hook consulted after a failed attempt, before the next attempt of the
/// same model. Returning a delay pauses collection; `None` continues at once.
pub trait RetryPolicy: Send + Sync {
    fn delay_after(&self, model: &str, attempt: u32, error: &RecognitionError)
    -> Option<Duration>;
}

/// Continue immediately after a failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackoff;

impl RetryPolicy for NoBackoff {
    fn delay_after(&self, _model: &str, _attempt: u32, _error: &RecognitionError) -> Option<Duration> {
        None
    }
}

/// Runs the configured models and repeats against one page.
pub struct CandidateCollector {
    invoker: Arc<dyn ModelInvoker>,
    prompt: String,
    retry: Arc<dyn RetryPolicy>,
}

impl CandidateCollector {
    pub fn new(invoker: Arc<dyn ModelInvoker>, prompt: impl Into<String>) -> Self {
        Self {
            invoker,
            prompt: prompt.into(),
            retry: Arc::new(NoBackoff),
        }
    }

    pub fn with_retry_policy(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    /// Collect one candidate per (model, attempt), in configured order.
    pub async fn collect(&self, page: &PageImage, bytes: &[u8], config: &JobConfig) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        for spec in &config.models {
            for attempt in 1..=spec.repeat_count {
                let request = RecognitionRequest {
                    model: &spec.name,
                    image_ref: &page.name,
                    prompt: &self.prompt,
                    image: Some(ImagePayload {
                        bytes,
                        mime_type: page.mime_type,
                    }),
                    purpose: CallPurpose::Recognition,
                };

                match self.invoker.invoke(request).await {
                    Ok(text) => {
                        debug!(
                            image = %page.name,
                            model = %spec.name,
                            attempt = attempt,
                            chars = text.chars().count(),
                            "Candidate recognized"
                        );
                        candidates.push(Candidate::ok(&spec.name, attempt, text));
                    }
                    Err(e) => {
                        warn!(
                            image = %page.name,
                            model = %spec.name,
                            attempt = attempt,
                            error = %e,
                            "Recognition attempt failed"
                        );
                        let delay = (attempt < spec.repeat_count)
                            .then(|| self.retry.delay_after(&spec.name, attempt, &e))
                            .flatten();
                        candidates.push(Candidate::failed(&spec.name, attempt, e));

                        if let Some(delay) = delay {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        candidates
    }
}
