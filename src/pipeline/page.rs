//! Per-page state machine.
//!
//! `Pending -> Collecting -> (Arbitrating)? -> Done | Failed`. Every page
//! ends with exactly one block in the output stream: its text when done, an
//! error marker when failed.

use crate::models::{JobConfig, PageImage, PageResult, PageState, UnitError};
use crate::pipeline::OutputWriter;
use crate::recognition::{CandidateCollector, JudgeArbiter};
use tracing::{debug, info, warn};

pub struct PageProcessor {
    collector: CandidateCollector,
    arbiter: JudgeArbiter,
    output: OutputWriter,
}

impl PageProcessor {
    pub fn new(collector: CandidateCollector, arbiter: JudgeArbiter, output: OutputWriter) -> Self {
        Self {
            collector,
            arbiter,
            output,
        }
    }

    pub fn output_mut(&mut self) -> &mut OutputWriter {
        &mut self.output
    }

    /// Run one page to a terminal state and append its block to the output.
    ///
    /// Page failures are returned as a failed `PageResult`. `Err` means the
    /// output itself could not be written, which stops the unit.
    pub async fn process(&mut self, page: &PageImage, config: &JobConfig) -> Result<PageResult, UnitError> {
        let result = self.run(page, config).await;

        let written = match (&result.final_text, &result.error) {
            (Some(text), _) => self.output.write_page(&page.name, text),
            (None, cause) => self
                .output
                .write_error(&page.name, cause.as_deref().unwrap_or("unknown error")),
        };
        written.map_err(|source| UnitError::Write {
            what: "output",
            path: self.output.path().to_owned(),
            source,
        })?;

        Ok(result)
    }

    async fn run(&mut self, page: &PageImage, config: &JobConfig) -> PageResult {
        transition(page, PageState::Pending, PageState::Collecting);

        let bytes = match page.read_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(image = %page.name, error = %e, "Failed to read page image");
                transition(page, PageState::Collecting, PageState::Failed);
                return PageResult::failed(&page.name, format!("cannot read image: {e}"));
            }
        };

        let mut candidates = self.collector.collect(page, &bytes, config).await;

        if candidates.len() == 1 {
            let candidate = candidates.remove(0);
            return match candidate.error {
                None => {
                    transition(page, PageState::Collecting, PageState::Done);
                    PageResult::done(&page.name, candidate.text)
                }
                Some(e) => {
                    transition(page, PageState::Collecting, PageState::Failed);
                    PageResult::failed(&page.name, e.to_string())
                }
            };
        }

        transition(page, PageState::Collecting, PageState::Arbitrating);

        if candidates.iter().all(|c| !c.is_success()) {
            transition(page, PageState::Arbitrating, PageState::Failed);
            let causes: Vec<String> = candidates
                .iter()
                .filter_map(|c| c.error.as_ref().map(ToString::to_string))
                .collect();
            return PageResult::failed(
                &page.name,
                format!("all {} attempts failed: {}", candidates.len(), causes.join("; ")),
            );
        }

        match self.arbiter.arbitrate(page, &bytes, candidates, config).await {
            Ok(decision) => {
                transition(page, PageState::Arbitrating, PageState::Done);
                PageResult::done(&page.name, decision.chosen_text)
            }
            Err(e) => {
                warn!(image = %page.name, error = %e, "Arbitration failed");
                transition(page, PageState::Arbitrating, PageState::Failed);
                PageResult::failed(&page.name, e.to_string())
            }
        }
    }
}

fn transition(page: &PageImage, from: PageState, to: PageState) {
    match to {
        PageState::Done | PageState::Failed => {
            info!(image = %page.name, from = %from, to = %to, "Page finished")
        }
        _ => debug!(image = %page.name, from = %from, to = %to, "Page state"),
    }
}
