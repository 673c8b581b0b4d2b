//! Human-readable decision log.
//!
//! One block per arbitrated page, appended to a per-unit file. Blocks are
//! never rewritten; rotation is left to the operator.

use crate::models::{Candidate, Decision};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Delimits decision blocks.
pub const SEPARATOR: &str =
    "================================================================================";

/// Append-only decision log for one unit.
#[derive(Debug)]
pub struct DecisionLog {
    path: PathBuf,
    file: File,
}

impl DecisionLog {
    /// Open (or create) the log for appending.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_owned(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one decision block.
    pub fn record(&mut self, decision: &Decision) -> std::io::Result<()> {
        self.append(&format_decision(decision))
    }

    /// Append a block for a page whose judge call failed.
    pub fn record_failure(
        &mut self,
        image: &str,
        candidates: &[Candidate],
        judge_model: &str,
        cause: &str,
    ) -> std::io::Result<()> {
        self.append(&format_failure(image, candidates, judge_model, cause, Utc::now()))
    }

    fn append(&mut self, block: &str) -> std::io::Result<()> {
        self.file.write_all(block.as_bytes())?;
        self.file.flush()
    }
}

/// Render a decision block.
pub fn format_decision(decision: &Decision) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{SEPARATOR}");
    let _ = writeln!(out, "Timestamp: {}", timestamp(decision.decided_at));
    let _ = writeln!(out, "Image: {}", decision.image);
    match &decision.judge_model {
        Some(judge) => {
            let _ = writeln!(out, "Chosen by: {} ({judge})", decision.chosen_by);
        }
        None => {
            let _ = writeln!(out, "Chosen by: {}", decision.chosen_by);
        }
    }
    let matched = decision
        .matched_candidate
        .map(|i| (i + 1).to_string())
        .unwrap_or_else(|| "none".to_string());
    let _ = writeln!(out, "Matched candidate: {matched}");
    write_candidates(&mut out, &decision.candidates);
    let _ = writeln!(out, "--- Chosen text ---");
    let _ = writeln!(out, "{}", decision.chosen_text);
    let _ = writeln!(out, "{SEPARATOR}");
    out
}

fn format_failure(
    image: &str,
    candidates: &[Candidate],
    judge_model: &str,
    cause: &str,
    at: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{SEPARATOR}");
    let _ = writeln!(out, "ARBITRATION FAILED");
    let _ = writeln!(out, "Timestamp: {}", timestamp(at));
    let _ = writeln!(out, "Image: {image}");
    let _ = writeln!(out, "Judge: {judge_model}");
    let _ = writeln!(out, "Cause: {cause}");
    write_candidates(&mut out, candidates);
    let _ = writeln!(out, "{SEPARATOR}");
    out
}

fn write_candidates(out: &mut String, candidates: &[Candidate]) {
    let _ = writeln!(out, "Candidates: {}", candidates.len());
    for (i, candidate) in candidates.iter().enumerate() {
        let status = match &candidate.error {
            None => "ok".to_string(),
            Some(err) => format!("failed ({}): {}", err.kind, err.cause),
        };
        let _ = writeln!(
            out,
            "--- Candidate {} | model: {} | attempt: {} | {status} ---",
            i + 1,
            candidate.model,
            candidate.attempt
        );
        if candidate.is_success() {
            let _ = writeln!(out, "{}", candidate.text);
        }
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
