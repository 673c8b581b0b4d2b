//! Page, candidate and decision records.
//!
//! These represent the data flow through one page: a `PageImage` yields a
//! set of `Candidate`s, which may be reduced to a `Decision`, and always end
//! in one `PageResult`.

use crate::models::RecognitionError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;

/// One page image on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// Page number embedded in the file name (`page_<N>`), if any
    pub index: Option<u64>,
    /// File name, used as the page identifier in output and logs
    pub name: String,
    pub path: PathBuf,
    pub mime_type: &'static str,
}

impl PageImage {
    /// Read the image bytes.
    pub fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        std::fs::read(&self.path)
    }
}

/// One recognized-text attempt from one model invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub model: String,
    /// 1-based attempt number for this model
    pub attempt: u32,
    /// Recognized text (empty when the attempt failed)
    pub text: String,
    pub error: Option<RecognitionError>,
}

impl Candidate {
    pub fn ok(model: impl Into<String>, attempt: u32, text: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            attempt,
            text: text.into(),
            error: None,
        }
    }

    pub fn failed(model: impl Into<String>, attempt: u32, error: RecognitionError) -> Self {
        Self {
            model: model.into(),
            attempt,
            text: String::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Who picked the chosen text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChosenBy {
    /// Exactly one candidate succeeded, no judge call was needed
    Single,
    Judge,
}

impl fmt::Display for ChosenBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Judge => write!(f, "judge"),
        }
    }
}

/// Outcome of arbitration for one page. Appended to the decision log.
#[derive(Debug, Clone)]
pub struct Decision {
    pub image: String,
    pub candidates: Vec<Candidate>,
    pub chosen_text: String,
    pub chosen_by: ChosenBy,
    pub judge_model: Option<String>,
    /// Position (0-based) of the candidate whose text equals the chosen text
    pub matched_candidate: Option<usize>,
    pub decided_at: DateTime<Utc>,
}

/// Processing state of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Pending,
    Collecting,
    Arbitrating,
    Done,
    Failed,
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Collecting => "collecting",
            Self::Arbitrating => "arbitrating",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Terminal result for one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult {
    pub image: String,
    pub state: PageState,
    pub final_text: Option<String>,
    pub error: Option<String>,
}

impl PageResult {
    pub fn done(image: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            state: PageState::Done,
            final_text: Some(text.into()),
            error: None,
        }
    }

    pub fn failed(image: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            state: PageState::Failed,
            final_text: None,
            error: Some(error.into()),
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == PageState::Done
    }
}
