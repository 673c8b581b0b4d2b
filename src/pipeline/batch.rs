//! Parallel processing of document units.
//!
//! Each unit is a directory of page images with its own output file,
//! decision log and call log. Units run concurrently up to a bounded
//! parallelism; pages inside a unit always run in order, one at a time.
//! A failing unit is recorded in the report and never stops its siblings.

use crate::audit::{CallLog, DecisionLog, LoggedInvoker};
use crate::client::ModelInvoker;
use crate::models::{
    ConfigResolver, JobConfig, ModelPrompter, OcrOverrides, PageImage, ScribeError, Settings,
    UnitError,
};
use crate::pipeline::{OutputWriter, PageProcessor, discover_pages};
use crate::recognition::{
    CandidateCollector, DEFAULT_JUDGE_PROMPT, DEFAULT_OCR_PROMPT, JudgeArbiter, NoBackoff,
    RetryPolicy,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Upper bound on concurrently processed units.
pub const MAX_PARALLEL_UNITS: usize = 8;

/// Units actually run at once: the request, capped by the unit count and
/// `MAX_PARALLEL_UNITS`, never below 1.
pub fn effective_parallelism(requested: usize, units: usize) -> usize {
    requested.min(units).min(MAX_PARALLEL_UNITS).max(1)
}

/// One document unit: a directory of page images and where its results go.
#[derive(Debug, Clone)]
pub struct BatchUnit {
    pub name: String,
    pub images_dir: PathBuf,
    pub output_path: PathBuf,
    pub decision_log_path: PathBuf,
    pub call_log_path: PathBuf,
    pub config: Arc<JobConfig>,
}

impl BatchUnit {
    /// Logs are placed next to the output: `<stem>.decisions.log` and
    /// `<stem>.calls.jsonl`.
    pub fn new(images_dir: PathBuf, output_path: PathBuf, config: Arc<JobConfig>) -> Self {
        let name = images_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| images_dir.display().to_string());
        let stem = output_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let decision_log_path = output_path.with_file_name(format!("{stem}.decisions.log"));
        let call_log_path = output_path.with_file_name(format!("{stem}.calls.jsonl"));

        Self {
            name,
            images_dir,
            output_path,
            decision_log_path,
            call_log_path,
            config,
        }
    }
}

/// How a unit ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStatus {
    /// Every page reached a terminal state (some may have failed)
    Completed,
    /// Stopped between pages on request
    Cancelled,
    Failed(String),
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed(cause) => write!(f, "failed: {cause}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnitReport {
    pub name: String,
    pub output_path: PathBuf,
    pub pages_total: usize,
    pub pages_done: usize,
    pub pages_failed: usize,
    pub status: UnitStatus,
}

impl UnitReport {
    fn new(name: &str, output_path: &Path, status: UnitStatus) -> Self {
        Self {
            name: name.to_string(),
            output_path: output_path.to_owned(),
            pages_total: 0,
            pages_done: 0,
            pages_failed: 0,
            status,
        }
    }
}

/// Outcome of a batch run, one report per unit in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub units: Vec<UnitReport>,
    pub runtime_secs: f64,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.count(|s| *s == UnitStatus::Completed)
    }

    pub fn cancelled(&self) -> usize {
        self.count(|s| *s == UnitStatus::Cancelled)
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, UnitStatus::Failed(_)))
    }

    pub fn pages_done(&self) -> usize {
        self.units.iter().map(|u| u.pages_done).sum()
    }

    pub fn pages_failed(&self) -> usize {
        self.units.iter().map(|u| u.pages_failed).sum()
    }

    /// True when every unit completed and every page is done.
    pub fn is_clean(&self) -> bool {
        self.completed() == self.units.len() && self.pages_failed() == 0
    }

    fn count(&self, f: impl Fn(&UnitStatus) -> bool) -> usize {
        self.units.iter().filter(|u| f(&u.status)).count()
    }
}

/// Runs units concurrently, each through its own `PageProcessor`.
#[derive(Clone)]
pub struct BatchOrchestrator {
    invoker: Arc<dyn ModelInvoker>,
    ocr_prompt: String,
    judge_prompt: String,
    retry: Arc<dyn RetryPolicy>,
    cancel: CancellationToken,
    show_progress: bool,
}

impl BatchOrchestrator {
    pub fn new(invoker: Arc<dyn ModelInvoker>) -> Self {
        Self {
            invoker,
            ocr_prompt: DEFAULT_OCR_PROMPT.to_string(),
            judge_prompt: DEFAULT_JUDGE_PROMPT.to_string(),
            retry: Arc::new(NoBackoff),
            cancel: CancellationToken::new(),
            show_progress: false,
        }
    }

    pub fn with_prompts(mut self, ocr_prompt: impl Into<String>, judge_prompt: impl Into<String>) -> Self {
        self.ocr_prompt = ocr_prompt.into();
        self.judge_prompt = judge_prompt.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    /// Stop starting new pages and units once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Process all units and report on each, in input order.
    pub async fn run(&self, units: Vec<BatchUnit>, max_parallelism: usize) -> BatchReport {
        let start = Instant::now();
        let parallelism = effective_parallelism(max_parallelism, units.len());

        info!(
            units = units.len(),
            parallelism = parallelism,
            "Starting batch"
        );

        let pb = self.progress_bar(units.len());
        let semaphore = Arc::new(Semaphore::new(parallelism));
        let mut handles = Vec::with_capacity(units.len());

        for unit in units {
            let orchestrator = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let pb = pb.clone();
            let name = unit.name.clone();
            let output_path = unit.output_path.clone();

            let handle = tokio::spawn(async move {
                let report = match semaphore.acquire_owned().await {
                    Ok(_permit) => orchestrator.run_unit(unit).await,
                    Err(_) => UnitReport::new(
                        &unit.name,
                        &unit.output_path,
                        UnitStatus::Failed("Semaphore closed".to_string()),
                    ),
                };
                pb.inc(1);
                report
            });
            handles.push((name, output_path, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (name, output_path, handle) in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(unit = %name, error = %e, "Unit task panicked");
                    let cause = UnitError::Aborted(e.to_string()).to_string();
                    reports.push(UnitReport::new(&name, &output_path, UnitStatus::Failed(cause)));
                }
            }
        }

        let report = BatchReport {
            units: reports,
            runtime_secs: start.elapsed().as_secs_f64(),
        };

        pb.finish_with_message(format!(
            "{} completed, {} failed, {} cancelled",
            report.completed(),
            report.failed(),
            report.cancelled()
        ));
        info!(
            completed = report.completed(),
            failed = report.failed(),
            cancelled = report.cancelled(),
            pages_done = report.pages_done(),
            pages_failed = report.pages_failed(),
            runtime_secs = report.runtime_secs,
            "Batch finished"
        );

        report
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} units {msg}")
        {
            pb.set_style(style.progress_chars("##-"));
        }
        pb
    }

    async fn run_unit(&self, unit: BatchUnit) -> UnitReport {
        let mut report = UnitReport::new(&unit.name, &unit.output_path, UnitStatus::Completed);

        if self.cancel.is_cancelled() {
            info!(unit = %unit.name, "Cancelled before start");
            report.status = UnitStatus::Cancelled;
            return report;
        }

        info!(unit = %unit.name, dir = ?unit.images_dir, "Processing unit");
        if let Err(e) = self.process_unit(&unit, &mut report).await {
            error!(unit = %unit.name, error = %e, "Unit failed");
            report.status = UnitStatus::Failed(e.to_string());
        }
        report
    }

    async fn process_unit(&self, unit: &BatchUnit, report: &mut UnitReport) -> Result<(), UnitError> {
        let mut output = OutputWriter::create(&unit.output_path).map_err(|source| UnitError::Open {
            what: "output",
            path: unit.output_path.clone(),
            source,
        })?;

        let (pages, call_log, decision_log) = match prepare_unit(unit) {
            Ok(prepared) => prepared,
            Err(e) => {
                if let Err(write_err) = output.write_unit_error(&unit.name, &e.to_string()) {
                    warn!(unit = %unit.name, error = %write_err, "Failed to write unit error marker");
                }
                return Err(e);
            }
        };

        let invoker: Arc<dyn ModelInvoker> =
            Arc::new(LoggedInvoker::new(Arc::clone(&self.invoker), call_log));
        let collector = CandidateCollector::new(Arc::clone(&invoker), self.ocr_prompt.clone())
            .with_retry_policy(Arc::clone(&self.retry));
        let arbiter = JudgeArbiter::new(invoker, self.judge_prompt.clone(), decision_log);
        let mut processor = PageProcessor::new(collector, arbiter, output);

        report.pages_total = pages.len();
        if pages.is_empty() {
            warn!(unit = %unit.name, dir = ?unit.images_dir, "No page images found");
        }

        for (i, page) in pages.iter().enumerate() {
            if self.cancel.is_cancelled() {
                let remaining = pages.len() - i;
                info!(unit = %unit.name, remaining = remaining, "Cancelled between pages");
                processor
                    .output_mut()
                    .write_unit_error(&unit.name, &format!("cancelled, {remaining} pages not processed"))
                    .map_err(|source| UnitError::Write {
                        what: "output",
                        path: unit.output_path.clone(),
                        source,
                    })?;
                report.status = UnitStatus::Cancelled;
                return Ok(());
            }

            let result = processor.process(page, &unit.config).await?;
            if result.is_done() {
                report.pages_done += 1;
            } else {
                report.pages_failed += 1;
            }
        }

        info!(
            unit = %unit.name,
            pages_done = report.pages_done,
            pages_failed = report.pages_failed,
            "Unit completed"
        );
        Ok(())
    }
}

fn prepare_unit(unit: &BatchUnit) -> Result<(Vec<PageImage>, CallLog, DecisionLog), UnitError> {
    let pages = discover_pages(&unit.images_dir).map_err(|source| UnitError::Source {
        path: unit.images_dir.clone(),
        source,
    })?;
    let call_log = CallLog::open(&unit.call_log_path, &unit.name).map_err(|source| UnitError::Open {
        what: "call log",
        path: unit.call_log_path.clone(),
        source,
    })?;
    let decision_log = DecisionLog::open(&unit.decision_log_path).map_err(|source| UnitError::Open {
        what: "decision log",
        path: unit.decision_log_path.clone(),
        source,
    })?;
    Ok((pages, call_log, decision_log))
}

/// Resolve the job, then connect and build the orchestrator.
///
/// `connect` runs only once the job is valid, so a configuration error
/// returns before any client exists and no model is ever called.
pub fn prepare_batch<F>(
    settings: &Settings,
    overrides: &OcrOverrides,
    prompter: Option<&dyn ModelPrompter>,
    connect: F,
) -> Result<(BatchOrchestrator, Arc<JobConfig>), ScribeError>
where
    F: FnOnce() -> Result<Arc<dyn ModelInvoker>, ScribeError>,
{
    let mut resolver = ConfigResolver::new(settings);
    if let Some(prompter) = prompter {
        resolver = resolver.with_prompter(prompter);
    }
    let job = Arc::new(resolver.resolve(overrides)?);

    let invoker = connect()?;
    let defaults = &settings.defaults;
    let orchestrator = BatchOrchestrator::new(invoker).with_prompts(
        defaults.ocr_prompt.as_deref().unwrap_or(DEFAULT_OCR_PROMPT),
        defaults.judge_prompt.as_deref().unwrap_or(DEFAULT_JUDGE_PROMPT),
    );
    Ok((orchestrator, job))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::CallRecord;
    use crate::client::CallPurpose;
    use crate::models::{ConfigError, ModelSpec, RecognitionError};
    use crate::pipeline::discover_units;
    use crate::testing::ScriptedInvoker;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Create `<base>/<unit>/page_<n>.png` for each unit.
    fn make_units(base: &Path, units: &[(&str, usize)]) {
        for (unit, pages) in units {
            let dir = base.join(unit);
            std::fs::create_dir_all(&dir).unwrap();
            for n in 1..=*pages {
                std::fs::write(dir.join(format!("page_{n}.png")), format!("{unit}-{n}")).unwrap();
            }
        }
    }

    fn units(base: &Path, config: JobConfig) -> Vec<BatchUnit> {
        discover_units(base, "output.txt", Arc::new(config)).unwrap()
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap_or_default()
    }

    fn two_model_config() -> JobConfig {
        JobConfig {
            models: vec![ModelSpec::new("vision/a", 1), ModelSpec::new("vision/b", 1)],
            judge_model: Some("judge/x".to_string()),
            ..JobConfig::single("unused")
        }
    }

    #[test]
    fn test_effective_parallelism() {
        assert_eq!(effective_parallelism(4, 10), 4);
        assert_eq!(effective_parallelism(4, 2), 2);
        assert_eq!(effective_parallelism(64, 100), MAX_PARALLEL_UNITS);
        assert_eq!(effective_parallelism(0, 3), 1);
        assert_eq!(effective_parallelism(4, 0), 1);
    }

    #[test]
    fn test_unit_log_paths_follow_output_stem() {
        let unit = BatchUnit::new(
            PathBuf::from("/data/book"),
            PathBuf::from("/out/book.txt"),
            Arc::new(JobConfig::single("m")),
        );
        assert_eq!(unit.name, "book");
        assert_eq!(unit.decision_log_path, PathBuf::from("/out/book.decisions.log"));
        assert_eq!(unit.call_log_path, PathBuf::from("/out/book.calls.jsonl"));
    }

    #[tokio::test]
    async fn test_single_model_writes_text_and_no_decisions() {
        let temp_dir = TempDir::new().unwrap();
        make_units(temp_dir.path(), &[("doc", 2)]);
        let stub = Arc::new(ScriptedInvoker::echo());

        let report = BatchOrchestrator::new(stub.clone())
            .run(units(temp_dir.path(), JobConfig::single("vision/a")), 2)
            .await;

        assert!(report.is_clean());
        assert_eq!(report.pages_done(), 2);
        let unit_dir = temp_dir.path().join("doc");
        assert_eq!(
            read(&unit_dir.join("output.txt")),
            "Image: page_1.png\nvision/a:page_1.png\n\nImage: page_2.png\nvision/a:page_2.png"
        );
        assert!(!read(&unit_dir.join("output.decisions.log")).contains("Image:"));
        assert!(stub.judge_calls().is_empty());

        let calls = read(&unit_dir.join("output.calls.jsonl"));
        assert_eq!(calls.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_judge_text_accepted_when_matching_no_candidate() {
        let temp_dir = TempDir::new().unwrap();
        make_units(temp_dir.path(), &[("doc", 1)]);
        let stub = Arc::new(ScriptedInvoker::new(|call| match call.purpose {
            CallPurpose::Recognition => Ok(format!("text from {}", call.model)),
            CallPurpose::Judge => Ok("judge rewrote it".to_string()),
        }));

        let report = BatchOrchestrator::new(stub.clone())
            .run(units(temp_dir.path(), two_model_config()), 1)
            .await;

        assert!(report.is_clean());
        let unit_dir = temp_dir.path().join("doc");
        assert_eq!(
            read(&unit_dir.join("output.txt")),
            "Image: page_1.png\njudge rewrote it"
        );

        let decisions = read(&unit_dir.join("output.decisions.log"));
        assert!(decisions.contains("Candidates: 2"));
        assert!(decisions.contains("text from vision/a"));
        assert!(decisions.contains("text from vision/b"));
        assert!(decisions.contains("Matched candidate: none"));
        assert!(decisions.contains("--- Chosen text ---\njudge rewrote it"));
        assert_eq!(stub.judge_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_repeat_without_judge_fails_before_any_call() {
        let temp_dir = TempDir::new().unwrap();
        make_units(temp_dir.path(), &[("doc", 1)]);
        let settings = Settings::default();
        let overrides = OcrOverrides {
            models: vec!["vision/a".to_string()],
            repeats: vec![3],
            ..Default::default()
        };
        let stub = Arc::new(ScriptedInvoker::echo());
        let mut connected = false;

        let result = prepare_batch(&settings, &overrides, None, || {
            connected = true;
            Ok(stub.clone() as Arc<dyn ModelInvoker>)
        });

        let Err(err) = result else {
            panic!("job without a judge must not resolve");
        };
        assert!(matches!(err, ScribeError::Config(ConfigError::MissingJudge { .. })));
        assert!(err.to_string().contains("repeated 3 times"));
        assert!(!connected);
        assert!(stub.calls().is_empty());
        assert!(!temp_dir.path().join("doc").join("output.txt").exists());
    }

    #[tokio::test]
    async fn test_prepared_batch_uses_settings_prompt() {
        let temp_dir = TempDir::new().unwrap();
        make_units(temp_dir.path(), &[("doc", 1)]);
        let mut settings = Settings::default();
        settings.defaults.ocr_prompt = Some("transcribe".to_string());
        let overrides = OcrOverrides {
            models: vec!["vision/a".to_string()],
            ..Default::default()
        };
        let stub = Arc::new(ScriptedInvoker::echo());

        let (orchestrator, job) = prepare_batch(&settings, &overrides, None, || {
            Ok(stub.clone() as Arc<dyn ModelInvoker>)
        })
        .unwrap();
        let report = orchestrator
            .run(discover_units(temp_dir.path(), "output.txt", job).unwrap(), 1)
            .await;

        assert!(report.is_clean());
        let calls = stub.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].prompt, "transcribe");
    }

    /// Strip fields that legitimately differ between runs.
    fn normalized_logs(unit_dir: &Path) -> (String, String, Vec<(String, String, String, String)>) {
        let output = read(&unit_dir.join("output.txt"));
        let decisions: String = read(&unit_dir.join("output.decisions.log"))
            .lines()
            .filter(|line| !line.starts_with("Timestamp: "))
            .collect::<Vec<_>>()
            .join("\n");
        let calls = read(&unit_dir.join("output.calls.jsonl"))
            .lines()
            .map(|line| {
                let record: CallRecord = serde_json::from_str(line).unwrap();
                (
                    record.model,
                    record.image,
                    record.purpose,
                    record.response.unwrap_or_default(),
                )
            })
            .collect();
        (output, decisions, calls)
    }

    #[tokio::test]
    async fn test_parallelism_does_not_change_results() {
        let sequential = TempDir::new().unwrap();
        let parallel = TempDir::new().unwrap();
        let layout = [("alpha", 3), ("beta", 2), ("gamma", 4), ("delta", 1)];
        make_units(sequential.path(), &layout);
        make_units(parallel.path(), &layout);

        let script = |call: &crate::testing::RecordedCall| match call.purpose {
            CallPurpose::Recognition if call.model == "vision/b" && call.image_ref == "page_2.png" => {
                Err(RecognitionError::transient(&call.model, "timeout"))
            }
            CallPurpose::Recognition => Ok(format!("{} read {}", call.model, call.image_ref)),
            CallPurpose::Judge => Ok(format!("best of {}", call.image_ref)),
        };

        let stub = Arc::new(ScriptedInvoker::new(script).with_delay(Duration::from_millis(2)));
        let first = BatchOrchestrator::new(stub)
            .run(units(sequential.path(), two_model_config()), 1)
            .await;
        let stub = Arc::new(ScriptedInvoker::new(script).with_delay(Duration::from_millis(2)));
        let second = BatchOrchestrator::new(stub)
            .run(units(parallel.path(), two_model_config()), 4)
            .await;

        assert_eq!(first.units.len(), 4);
        assert_eq!(first.completed(), 4);
        assert_eq!(second.completed(), 4);
        for (a, b) in first.units.iter().zip(&second.units) {
            assert_eq!(a.name, b.name);
            assert_eq!(
                normalized_logs(&sequential.path().join(&a.name)),
                normalized_logs(&parallel.path().join(&b.name))
            );
        }
    }

    #[tokio::test]
    async fn test_failed_page_keeps_order_and_following_pages() {
        let temp_dir = TempDir::new().unwrap();
        make_units(temp_dir.path(), &[("doc", 3)]);
        let stub = Arc::new(ScriptedInvoker::new(|call| {
            if call.image_ref == "page_2.png" {
                Err(RecognitionError::permanent(&call.model, "HTTP 400"))
            } else {
                Ok(format!("ok {}", call.image_ref))
            }
        }));

        let report = BatchOrchestrator::new(stub)
            .run(units(temp_dir.path(), JobConfig::single("vision/a")), 1)
            .await;

        assert_eq!(report.completed(), 1);
        assert_eq!(report.pages_done(), 2);
        assert_eq!(report.pages_failed(), 1);
        assert!(!report.is_clean());

        let output = read(&temp_dir.path().join("doc/output.txt"));
        let blocks: Vec<&str> = output.split("\n\n").collect();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0], "Image: page_1.png\nok page_1.png");
        assert!(blocks[1].starts_with("Image: page_2.png\nError processing page_2.png: "));
        assert_eq!(blocks[2], "Image: page_3.png\nok page_3.png");
    }

    #[tokio::test]
    async fn test_rerun_rewrites_output_and_appends_logs() {
        let temp_dir = TempDir::new().unwrap();
        make_units(temp_dir.path(), &[("doc", 2)]);

        for _ in 0..2 {
            let stub = Arc::new(ScriptedInvoker::echo());
            BatchOrchestrator::new(stub)
                .run(units(temp_dir.path(), two_model_config()), 1)
                .await;
        }

        let unit_dir = temp_dir.path().join("doc");
        let output = read(&unit_dir.join("output.txt"));
        assert_eq!(output.matches("Image: page_1.png").count(), 1);
        assert_eq!(output, "Image: page_1.png\njudged:page_1.png\n\nImage: page_2.png\njudged:page_2.png");

        let decisions = read(&unit_dir.join("output.decisions.log"));
        assert_eq!(decisions.matches("Image: page_1.png").count(), 2);
    }

    #[tokio::test]
    async fn test_all_attempts_failing_skips_judge() {
        let temp_dir = TempDir::new().unwrap();
        make_units(temp_dir.path(), &[("doc", 2)]);
        let stub = Arc::new(ScriptedInvoker::new(|call| match call.purpose {
            CallPurpose::Recognition => Err(RecognitionError::transient(&call.model, "HTTP 503")),
            CallPurpose::Judge => Ok("unreachable".to_string()),
        }));

        let report = BatchOrchestrator::new(stub.clone())
            .run(units(temp_dir.path(), two_model_config()), 1)
            .await;

        assert_eq!(report.completed(), 1);
        assert_eq!(report.pages_failed(), 2);
        assert!(stub.judge_calls().is_empty());
        assert_eq!(stub.calls().len(), 4);

        let output = read(&temp_dir.path().join("doc/output.txt"));
        assert_eq!(output.matches("Error processing").count(), 2);
    }

    #[tokio::test]
    async fn test_unit_failure_does_not_affect_siblings() {
        let temp_dir = TempDir::new().unwrap();
        make_units(temp_dir.path(), &[("good", 2)]);
        let config = Arc::new(JobConfig::single("vision/a"));

        let mut all_units = discover_units(temp_dir.path(), "output.txt", Arc::clone(&config)).unwrap();
        all_units.push(BatchUnit::new(
            temp_dir.path().join("missing"),
            temp_dir.path().join("missing.txt"),
            config,
        ));

        let report = BatchOrchestrator::new(Arc::new(ScriptedInvoker::echo()))
            .run(all_units, 2)
            .await;

        assert_eq!(report.units[0].status, UnitStatus::Completed);
        assert_eq!(report.units[0].pages_done, 2);
        assert!(matches!(report.units[1].status, UnitStatus::Failed(_)));

        // The failed unit still leaves an output with an explicit marker.
        let marker = read(&temp_dir.path().join("missing.txt"));
        assert!(marker.starts_with("Error processing missing: Cannot read image directory"));
    }

    #[tokio::test]
    async fn test_cancel_before_start_makes_no_calls() {
        let temp_dir = TempDir::new().unwrap();
        make_units(temp_dir.path(), &[("a", 2), ("b", 2)]);
        let stub = Arc::new(ScriptedInvoker::echo());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = BatchOrchestrator::new(stub.clone())
            .with_cancellation(cancel)
            .run(units(temp_dir.path(), JobConfig::single("vision/a")), 2)
            .await;

        assert_eq!(report.cancelled(), 2);
        assert!(stub.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_between_pages() {
        let temp_dir = TempDir::new().unwrap();
        make_units(temp_dir.path(), &[("doc", 3)]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let stub = Arc::new(ScriptedInvoker::new(move |call| {
            trigger.cancel();
            Ok(format!("text {}", call.image_ref))
        }));

        let report = BatchOrchestrator::new(stub.clone())
            .with_cancellation(cancel)
            .run(units(temp_dir.path(), JobConfig::single("vision/a")), 1)
            .await;

        let unit = &report.units[0];
        assert_eq!(unit.status, UnitStatus::Cancelled);
        assert_eq!(unit.pages_total, 3);
        assert_eq!(unit.pages_done, 1);
        assert_eq!(stub.calls().len(), 1);

        let output = read(&temp_dir.path().join("doc/output.txt"));
        assert!(output.starts_with("Image: page_1.png\ntext page_1.png\n\n"));
        assert!(output.ends_with("Error processing doc: cancelled, 2 pages not processed"));
    }
}
