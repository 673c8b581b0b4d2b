//! Configuration models for pagescribe.
//!
//! `Settings` is the read-only key-value store loaded from TOML (endpoint,
//! global defaults, named presets). `JobConfig` is the effective, immutable
//! configuration of one recognition run, produced by `ConfigResolver`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Top-level settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// OpenAI-compatible endpoint used for recognition and judging
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Global defaults
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Named bundles of OCR settings
    #[serde(default)]
    pub presets: BTreeMap<String, OcrPreset>,
}

/// Endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// API key (supports ${VAR} expansion; falls back to `api_key_env`)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL of the chat completions API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-call timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum tokens per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_timeout() -> u64 {
    180
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f64 {
    0.0
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Global defaults applied when neither the CLI nor a preset decides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default recognition model
    #[serde(default)]
    pub model: Option<String>,

    /// Override for the built-in recognition prompt
    #[serde(default)]
    pub ocr_prompt: Option<String>,

    /// Override for the built-in judge instructions
    #[serde(default)]
    pub judge_prompt: Option<String>,

    /// Default cap on concurrently processed units
    #[serde(default)]
    pub max_parallel_units: Option<usize>,
}

/// A named, reusable bundle of OCR settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrPreset {
    #[serde(default)]
    pub models: Vec<String>,

    /// Repeat counts, paired positionally with `models`
    #[serde(default)]
    pub repeats: Vec<u32>,

    #[serde(default)]
    pub judge_model: Option<String>,

    #[serde(default)]
    pub judge_mode: Option<String>,

    #[serde(default)]
    pub judge_with_image: Option<bool>,

    #[serde(default)]
    pub ensemble_strategy: Option<String>,

    #[serde(default)]
    pub trust_score: Option<f64>,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Resolve the API key from the settings file or the environment.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = &self.openrouter.api_key {
            return Ok(expand_env_vars(key));
        }

        std::env::var(&self.openrouter.api_key_env).map_err(|_| ConfigError::MissingApiKey {
            env_var: self.openrouter.api_key_env.clone(),
        })
    }

    /// Look up a preset by name.
    pub fn preset(&self, name: &str) -> Result<&OcrPreset, ConfigError> {
        self.presets
            .get(name)
            .ok_or_else(|| ConfigError::UnknownPreset(name.to_string()))
    }
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax. Unset variables are left in place.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return result;
    };

    for cap in re.captures_iter(s) {
        if let Ok(value) = std::env::var(&cap[1]) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// One requested model and how many times to call it per page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub repeat_count: u32,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, repeat_count: u32) -> Self {
        Self {
            name: name.into(),
            repeat_count,
        }
    }
}

/// How the judge's answer is turned into the chosen text.
///
/// Only `Authoritative` is implemented. Any other name is carried as
/// `Unsupported` so it can be rejected loudly instead of degrading.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum JudgeMode {
    /// The judge's reply is the chosen text, verbatim
    #[default]
    Authoritative,
    Unsupported(String),
}

impl FromStr for JudgeMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Ok(match normalized.as_str() {
            "authoritative" => Self::Authoritative,
            _ => Self::Unsupported(normalized),
        })
    }
}

impl fmt::Display for JudgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authoritative => write!(f, "authoritative"),
            Self::Unsupported(name) => write!(f, "{name}"),
        }
    }
}

/// Reserved ensemble merging strategy. Stored, never applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnsembleStrategy {
    #[default]
    None,
    MajorityVote,
    SimilarityMerge,
}

impl FromStr for EnsembleStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "none" => Ok(Self::None),
            "majority-vote" => Ok(Self::MajorityVote),
            "similarity-merge" => Ok(Self::SimilarityMerge),
            other => Err(ConfigError::UnknownEnsembleStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for EnsembleStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::MajorityVote => write!(f, "majority-vote"),
            Self::SimilarityMerge => write!(f, "similarity-merge"),
        }
    }
}

/// Effective settings for one recognition run. Immutable once resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    /// Models in call order
    pub models: Vec<ModelSpec>,
    pub judge_model: Option<String>,
    pub judge_mode: JudgeMode,
    /// Send the page image to the judge alongside the candidate texts
    pub judge_with_image: bool,
    pub ensemble_strategy: EnsembleStrategy,
    pub trust_score: Option<f64>,
}

impl JobConfig {
    /// One model, called once, no judge.
    pub fn single(model: impl Into<String>) -> Self {
        Self {
            models: vec![ModelSpec::new(model, 1)],
            judge_model: None,
            judge_mode: JudgeMode::Authoritative,
            judge_with_image: false,
            ensemble_strategy: EnsembleStrategy::None,
            trust_score: None,
        }
    }

    /// Number of candidates produced per page. Summed as `u64` so no
    /// combination of repeat counts can wrap.
    pub fn total_candidates(&self) -> u64 {
        self.models.iter().map(|m| u64::from(m.repeat_count)).sum()
    }

    /// True when a page can yield more than one candidate.
    pub fn needs_judge(&self) -> bool {
        self.models.len() > 1 || self.total_candidates() > 1
    }
}

/// Why a configuration produces more than one candidate per page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultiCandidateReason {
    MultipleModels { count: usize },
    RepeatedModel { model: String, repeat: u32 },
}

impl fmt::Display for MultiCandidateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MultipleModels { count } => write!(f, "{count} models are configured"),
            Self::RepeatedModel { model, repeat } => {
                write!(f, "model '{model}' is repeated {repeat} times")
            }
        }
    }
}

/// Configuration errors. All are raised before any model is invoked.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read settings file {path:?}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse settings file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key: set {env_var} or api_key in [openrouter]")]
    MissingApiKey { env_var: String },

    #[error("Unknown preset '{0}'")]
    UnknownPreset(String),

    #[error(
        "No OCR model configured: pass --model, use a preset, or set [defaults] model (no terminal to ask)"
    )]
    NoModel,

    #[error("Model name must not be empty")]
    EmptyModelName,

    #[error("Repeat count for model '{model}' must be at least 1, got {value}")]
    InvalidRepeat { model: String, value: u32 },

    #[error(
        "A judge model is required because {reason} ({total} candidates per page); pass --judge-model or set judge_model in the preset"
    )]
    MissingJudge {
        reason: MultiCandidateReason,
        total: u64,
    },

    #[error("Judge mode '{0}' is not supported (supported: authoritative)")]
    UnsupportedJudgeMode(String),

    #[error("Unknown ensemble strategy '{0}' (expected none, majority-vote or similarity-merge)")]
    UnknownEnsembleStrategy(String),

    #[error("Interactive prompt failed: {0}")]
    Prompt(String),
}
