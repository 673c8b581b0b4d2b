//! pagescribe CLI - multi-model page OCR with judge arbitration.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pagescribe::client::ModelInvoker;
use pagescribe::models::{ConfigError, ModelPrompter, OcrOverrides};
use pagescribe::pipeline::{discover_units, prepare_batch};
use pagescribe::{BatchOrchestrator, BatchReport, BatchUnit, JobConfig, LlmClient, Settings};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Settings file picked up from the working directory when `--config` is absent.
const DEFAULT_SETTINGS_FILE: &str = "pagescribe.toml";

#[derive(Parser)]
#[command(name = "pagescribe")]
#[command(version)]
#[command(about = "Extract text from page images with one or more OCR models and a judge")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to settings file (defaults to ./pagescribe.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize one directory of page images into one text file
    Pic2text {
        /// Directory containing page_<N>.png/.jpg images
        images_dir: PathBuf,

        /// Output text file
        output: PathBuf,

        #[command(flatten)]
        ocr: OcrArgs,
    },

    /// Recognize every subdirectory of a base directory, in parallel
    Batch {
        /// Directory whose subdirectories each hold one document's pages
        base_dir: PathBuf,

        /// Output file name written inside each subdirectory
        #[arg(long, default_value = "output.txt")]
        output_name: String,

        /// Maximum number of documents processed at once
        #[arg(short, long)]
        parallel: Option<usize>,

        #[command(flatten)]
        ocr: OcrArgs,
    },

    /// Validate settings file and API key
    Validate,

    /// Show example settings file
    Example,
}

#[derive(Args, Debug, Default)]
struct OcrArgs {
    /// OCR model to call; pass several times for several models
    #[arg(short, long = "model")]
    models: Vec<String>,

    /// Calls per model, paired with --model in order
    #[arg(short, long = "repeat")]
    repeats: Vec<u32>,

    /// Model that picks the final text when a page has several candidates
    #[arg(long)]
    judge_model: Option<String>,

    /// How the judge's reply is used (only "authoritative" is supported)
    #[arg(long)]
    judge_mode: Option<String>,

    /// Send the page image to the judge as well (`--judge-with-image=false` overrides a preset)
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    judge_with_image: Option<bool>,

    /// Named preset from the settings file
    #[arg(long)]
    preset: Option<String>,

    /// Reserved: recorded but not applied
    #[arg(long)]
    ensemble_strategy: Option<String>,

    /// Reserved: recorded but not applied
    #[arg(long)]
    trust_score: Option<f64>,
}

impl From<OcrArgs> for OcrOverrides {
    fn from(args: OcrArgs) -> Self {
        Self {
            preset: args.preset,
            models: args.models,
            repeats: args.repeats,
            judge_model: args.judge_model,
            judge_mode: args.judge_mode,
            judge_with_image: args.judge_with_image,
            ensemble_strategy: args.ensemble_strategy,
            trust_score: args.trust_score,
        }
    }
}

/// Asks for a model name on the terminal.
struct DialoguerPrompter;

impl ModelPrompter for DialoguerPrompter {
    fn prompt_model(&self) -> Result<String, ConfigError> {
        dialoguer::Input::<String>::new()
            .with_prompt("OCR model (e.g. google/gemini-flash-1.5)")
            .interact_text()
            .map_err(|e| ConfigError::Prompt(e.to_string()))
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

fn print_example_config() {
    let example = r#"# pagescribe settings file

[openrouter]
# API key (can also use OPENROUTER_API_KEY env var)
# api_key = "${OPENROUTER_API_KEY}"
base_url = "https://openrouter.ai/api/v1"
timeout_secs = 180
max_tokens = 4096
temperature = 0.0

[defaults]
# Used when neither --model nor a preset names a model
model = "google/gemini-flash-1.5"
# ocr_prompt = "Read the content of the image word by word. Do not output anything else"
max_parallel_units = 4

[presets.careful]
models = ["google/gemini-flash-1.5"]
repeats = [2]
judge_model = "google/gemini-flash-1.5"
judge_mode = "authoritative"
judge_with_image = true

[presets.ensemble]
models = ["google/gemini-flash-1.5", "openai/gpt-4o-mini"]
judge_model = "anthropic/claude-3.5-sonnet"
"#;
    println!("{example}");
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("Failed to load settings from {path:?}")),
        None => {
            let fallback = Path::new(DEFAULT_SETTINGS_FILE);
            if fallback.is_file() {
                Settings::from_file(fallback)
                    .with_context(|| format!("Failed to load settings from {fallback:?}"))
            } else {
                Ok(Settings::default())
            }
        }
    }
}

/// Resolve the job, then build the client and orchestrator. Configuration
/// errors return before any client exists, so they cost nothing.
fn prepare(
    settings: &Settings,
    ocr: OcrArgs,
) -> Result<(BatchOrchestrator, Arc<JobConfig>, Arc<LlmClient>)> {
    let overrides = OcrOverrides::from(ocr);
    let terminal = DialoguerPrompter;
    let prompter: Option<&dyn ModelPrompter> =
        std::io::stdin().is_terminal().then_some(&terminal as &dyn ModelPrompter);

    let mut client = None;
    let (orchestrator, job) = prepare_batch(settings, &overrides, prompter, || {
        let api_key = settings.resolve_api_key()?;
        let llm = Arc::new(LlmClient::from_settings(&settings.openrouter, api_key)?);
        client = Some(Arc::clone(&llm));
        Ok(llm as Arc<dyn ModelInvoker>)
    })
    .context("Failed to prepare recognition job")?;
    let client = client.context("Client was not created")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight pages");
            on_signal.cancel();
        }
    });

    let orchestrator = orchestrator.with_cancellation(cancel).with_progress(true);
    Ok((orchestrator, job, client))
}

fn print_summary(report: &BatchReport, client: &LlmClient) {
    println!("\n=== Recognition Complete ===");
    for unit in &report.units {
        println!(
            "{:<24} {:>4} done {:>4} failed  {}  ({})",
            unit.name,
            unit.pages_done,
            unit.pages_failed,
            unit.status,
            unit.output_path.display()
        );
    }
    let (input_tokens, output_tokens) = client.total_tokens();
    let limits = client.rate_limiter().stats();
    println!(
        "Units:       {} completed, {} failed, {} cancelled",
        report.completed(),
        report.failed(),
        report.cancelled()
    );
    println!(
        "Pages:       {} done, {} failed",
        report.pages_done(),
        report.pages_failed()
    );
    println!("Tokens:      {input_tokens} in / {output_tokens} out");
    println!(
        "Requests:    {} ({} rate limited, {:.1}s waited)",
        limits.total_requests, limits.total_429s, limits.total_wait_secs
    );
    println!("Runtime:     {:.1}s", report.runtime_secs);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            print_example_config();
            return Ok(());
        }

        Commands::Validate => {
            let settings = load_settings(cli.config.as_deref())?;

            settings
                .resolve_api_key()
                .context("Failed to resolve API key")?;

            info!("Configuration is valid");
            info!("  Endpoint: {}", settings.openrouter.base_url);
            info!(
                "  Default model: {}",
                settings.defaults.model.as_deref().unwrap_or("(none)")
            );
            for (name, preset) in &settings.presets {
                info!(
                    "  Preset '{}': models {:?}, repeats {:?}, judge {}",
                    name,
                    preset.models,
                    preset.repeats,
                    preset.judge_model.as_deref().unwrap_or("(none)")
                );
            }
            return Ok(());
        }

        Commands::Pic2text {
            images_dir,
            output,
            ocr,
        } => {
            let settings = load_settings(cli.config.as_deref())?;
            let (orchestrator, job, client) = prepare(&settings, ocr)?;

            if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create output directory {parent:?}"))?;
            }

            let unit = BatchUnit::new(images_dir, output, job);
            let report = orchestrator.run(vec![unit], 1).await;
            print_summary(&report, &client);
        }

        Commands::Batch {
            base_dir,
            output_name,
            parallel,
            ocr,
        } => {
            let settings = load_settings(cli.config.as_deref())?;
            let (orchestrator, job, client) = prepare(&settings, ocr)?;

            let units = discover_units(&base_dir, &output_name, job)
                .with_context(|| format!("Failed to list document directories in {base_dir:?}"))?;
            if units.is_empty() {
                warn!(dir = ?base_dir, "No document directories found");
            }

            let requested = parallel
                .or(settings.defaults.max_parallel_units)
                .unwrap_or_else(|| {
                    std::thread::available_parallelism()
                        .map(|n| n.get())
                        .unwrap_or(1)
                });

            let report = orchestrator.run(units, requested).await;
            print_summary(&report, &client);
        }
    }

    Ok(())
}
