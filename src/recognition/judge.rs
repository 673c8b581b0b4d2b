//! Judge arbitration.
//!
//! Given the candidates collected for a page, select one authoritative text.
//! A single successful candidate is taken as is. Two or more go to the judge
//! model, whose reply is the chosen text verbatim, even when it matches none
//! of the candidates.

use crate::audit::DecisionLog;
use crate::client::{CallPurpose, ImagePayload, ModelInvoker, RecognitionRequest};
use crate::models::{
    ArbitrationError, Candidate, ChosenBy, Decision, JobConfig, JudgeMode, PageImage,
};
use chrono::Utc;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Instruction given to the judge ahead of the enumerated candidates.
pub const DEFAULT_JUDGE_PROMPT: &str = "You are given several transcriptions of the same page, \
produced by different text recognition runs. Select the most accurate transcription. \
Reply with the selected transcription exactly as written, without any commentary, \
labels or formatting.";

pub struct JudgeArbiter {
    invoker: Arc<dyn ModelInvoker>,
    judge_prompt: String,
    log: DecisionLog,
}

impl JudgeArbiter {
    pub fn new(invoker: Arc<dyn ModelInvoker>, judge_prompt: impl Into<String>, log: DecisionLog) -> Self {
        Self {
            invoker,
            judge_prompt: judge_prompt.into(),
            log,
        }
    }

    /// Select the chosen text for `page` and record the decision.
    ///
    /// Fails when the judge mode is unsupported, when no candidate succeeded,
    /// or when the judge call fails. A failed judge call is still written to
    /// the decision log.
    pub async fn arbitrate(
        &mut self,
        page: &PageImage,
        bytes: &[u8],
        candidates: Vec<Candidate>,
        config: &JobConfig,
    ) -> Result<Decision, ArbitrationError> {
        if let JudgeMode::Unsupported(_) = config.judge_mode {
            return Err(ArbitrationError::UnsupportedMode(config.judge_mode.clone()));
        }

        let successful: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_success())
            .map(|(i, _)| i)
            .collect();

        let decision = match successful.as_slice() {
            [] => {
                return Err(ArbitrationError::NoSuccessfulCandidates {
                    image: page.name.clone(),
                });
            }
            &[only] => {
                debug!(image = %page.name, model = %candidates[only].model, "Single successful candidate, judge skipped");
                Decision {
                    image: page.name.clone(),
                    chosen_text: candidates[only].text.clone(),
                    candidates,
                    chosen_by: ChosenBy::Single,
                    judge_model: None,
                    matched_candidate: Some(only),
                    decided_at: Utc::now(),
                }
            }
            many => {
                let judge_model = config.judge_model.clone().ok_or_else(|| {
                    ArbitrationError::MissingJudgeModel {
                        image: page.name.clone(),
                        count: many.len(),
                    }
                })?;

                let prompt = self.build_judge_prompt(many.iter().map(|&i| &candidates[i]));
                let request = RecognitionRequest {
                    model: &judge_model,
                    image_ref: &page.name,
                    prompt: &prompt,
                    image: config.judge_with_image.then_some(ImagePayload {
                        bytes,
                        mime_type: page.mime_type,
                    }),
                    purpose: CallPurpose::Judge,
                };

                let chosen_text = match self.invoker.invoke(request).await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(image = %page.name, judge = %judge_model, error = %e, "Judge call failed");
                        self.log
                            .record_failure(&page.name, &candidates, &judge_model, &e.to_string())
                            .map_err(ArbitrationError::Log)?;
                        return Err(ArbitrationError::JudgeFailed(e));
                    }
                };

                let matched_candidate = many
                    .iter()
                    .copied()
                    .find(|&i| candidates[i].text == chosen_text);
                if matched_candidate.is_none() {
                    info!(image = %page.name, judge = %judge_model, "Judge reply matches no candidate, accepted as is");
                }

                Decision {
                    image: page.name.clone(),
                    candidates,
                    chosen_text,
                    chosen_by: ChosenBy::Judge,
                    judge_model: Some(judge_model),
                    matched_candidate,
                    decided_at: Utc::now(),
                }
            }
        };

        self.log.record(&decision).map_err(ArbitrationError::Log)?;
        Ok(decision)
    }

    fn build_judge_prompt<'c>(&self, candidates: impl Iterator<Item = &'c Candidate>) -> String {
        let mut prompt = self.judge_prompt.clone();
        prompt.push_str("\n\n");
        for (i, candidate) in candidates.enumerate() {
            let _ = write!(
                prompt,
                "Candidate {} (model: {}):\n{}\n\n",
                i + 1,
                candidate.model,
                candidate.text
            );
        }
        prompt.truncate(prompt.trim_end().len());
        prompt
    }
}
