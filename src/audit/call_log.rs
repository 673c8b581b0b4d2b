//! Structured log of every model call.
//!
//! One JSON line per call: who was asked, about which page, a truncated view
//! of the prompt and answer, and how it ended. Credentials never pass through
//! this layer, so they cannot be logged.

use crate::client::{ModelInvoker, RecognitionRequest};
use crate::models::{RecognitionError, RecognitionErrorKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::warn;
use uuid::Uuid;

/// Characters of prompt/response text kept per entry.
const LOG_TEXT_LIMIT: usize = 500;

/// How a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallOutcome {
    Ok,
    Transient,
    Permanent,
}

impl From<RecognitionErrorKind> for CallOutcome {
    fn from(kind: RecognitionErrorKind) -> Self {
        match kind {
            RecognitionErrorKind::Transient => Self::Transient,
            RecognitionErrorKind::Permanent => Self::Permanent,
        }
    }
}

/// One call log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: String,
    pub timestamp: DateTime<Utc>,
    pub unit: String,
    pub purpose: String,
    pub model: String,
    pub image: String,
    pub prompt: String,
    pub image_attached: bool,
    pub outcome: CallOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Append-only JSONL call log for one unit.
#[derive(Debug)]
pub struct CallLog {
    unit: String,
    path: PathBuf,
    file: Mutex<File>,
}

impl CallLog {
    /// Open (or create) the log for appending.
    pub fn open(path: &Path, unit: impl Into<String>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            unit: unit.into(),
            path: path.to_owned(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Append one entry.
    pub fn append(&self, record: &CallRecord) -> std::io::Result<()> {
        let line = serde_json::to_string(record).map_err(std::io::Error::other)?;
        let mut file = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(file, "{line}")?;
        file.flush()
    }
}

/// Keep the first `limit` characters of `text`, noting how much was cut.
pub fn truncate_for_log(text: &str, limit: usize) -> String {
    let total = text.chars().count();
    if total <= limit {
        return text.to_string();
    }
    let kept: String = text.chars().take(limit).collect();
    format!("{kept}... [{} more chars]", total - limit)
}

/// Wraps a `ModelInvoker` so every call is written to a unit's call log.
pub struct LoggedInvoker {
    inner: Arc<dyn ModelInvoker>,
    log: CallLog,
}

impl LoggedInvoker {
    pub fn new(inner: Arc<dyn ModelInvoker>, log: CallLog) -> Self {
        Self { inner, log }
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }
}

#[async_trait]
impl ModelInvoker for LoggedInvoker {
    async fn invoke(&self, request: RecognitionRequest<'_>) -> Result<String, RecognitionError> {
        let start = Instant::now();
        let result = self.inner.invoke(request).await;

        let (outcome, response, error) = match &result {
            Ok(text) => (
                CallOutcome::Ok,
                Some(truncate_for_log(text, LOG_TEXT_LIMIT)),
                None,
            ),
            Err(e) => (
                CallOutcome::from(e.kind),
                None,
                Some(truncate_for_log(&e.cause, LOG_TEXT_LIMIT)),
            ),
        };

        let record = CallRecord {
            call_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            unit: self.log.unit.clone(),
            purpose: request.purpose.to_string(),
            model: request.model.to_string(),
            image: request.image_ref.to_string(),
            prompt: truncate_for_log(request.prompt, LOG_TEXT_LIMIT),
            image_attached: request.image.is_some(),
            outcome,
            response,
            error,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        if let Err(e) = self.log.append(&record) {
            warn!(path = ?self.log.path, error = %e, "Failed to write call log entry");
        }

        result
    }
}
