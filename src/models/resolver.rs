//! Layered resolution of a `JobConfig`.
//!
//! Each field is resolved on its own, first match wins:
//! 1. explicit CLI arguments
//! 2. the selected preset
//! 3. global defaults (model name only)
//! 4. an interactive prompt, when a terminal is attached (model name only)
//!
//! Validation happens here, once, so a job that would need a judge but has
//! none fails before any model is called.

use crate::models::{
    ConfigError, EnsembleStrategy, JobConfig, JudgeMode, ModelSpec, MultiCandidateReason,
    OcrPreset, Settings,
};
use tracing::{debug, warn};

/// Explicit overrides taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct OcrOverrides {
    pub preset: Option<String>,
    pub models: Vec<String>,
    pub repeats: Vec<u32>,
    pub judge_model: Option<String>,
    pub judge_mode: Option<String>,
    pub judge_with_image: Option<bool>,
    pub ensemble_strategy: Option<String>,
    pub trust_score: Option<f64>,
}

/// Last-resort source for the model name when nothing else provides one.
pub trait ModelPrompter: Send + Sync {
    fn prompt_model(&self) -> Result<String, ConfigError>;
}

/// Merges CLI overrides, a preset and global defaults into a `JobConfig`.
pub struct ConfigResolver<'a> {
    settings: &'a Settings,
    prompter: Option<&'a dyn ModelPrompter>,
}

impl<'a> ConfigResolver<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            settings,
            prompter: None,
        }
    }

    /// Allow asking for a model name interactively.
    pub fn with_prompter(mut self, prompter: &'a dyn ModelPrompter) -> Self {
        self.prompter = Some(prompter);
        self
    }

    pub fn resolve(&self, cli: &OcrOverrides) -> Result<JobConfig, ConfigError> {
        let empty = OcrPreset::default();
        let preset = match &cli.preset {
            Some(name) => self.settings.preset(name)?,
            None => &empty,
        };

        let model_names = self.resolve_model_names(cli, preset)?;
        let repeats = if !cli.repeats.is_empty() {
            &cli.repeats
        } else {
            &preset.repeats
        };
        let models = pair_repeats(model_names, repeats)?;

        let judge_model = non_empty(cli.judge_model.as_deref())
            .or_else(|| non_empty(preset.judge_model.as_deref()))
            .map(str::to_string);

        let judge_mode: JudgeMode = cli
            .judge_mode
            .as_deref()
            .or(preset.judge_mode.as_deref())
            .map(|s| s.parse::<JudgeMode>().unwrap_or_default())
            .unwrap_or_default();
        if let JudgeMode::Unsupported(name) = &judge_mode {
            return Err(ConfigError::UnsupportedJudgeMode(name.clone()));
        }

        let judge_with_image = cli
            .judge_with_image
            .or(preset.judge_with_image)
            .unwrap_or(false);

        let ensemble_strategy = match cli
            .ensemble_strategy
            .as_deref()
            .or(preset.ensemble_strategy.as_deref())
        {
            Some(s) => s.parse::<EnsembleStrategy>()?,
            None => EnsembleStrategy::None,
        };
        if ensemble_strategy != EnsembleStrategy::None {
            warn!(
                strategy = %ensemble_strategy,
                "Ensemble merging is not implemented; the strategy is recorded but not applied"
            );
        }

        let config = JobConfig {
            models,
            judge_model,
            judge_mode,
            judge_with_image,
            ensemble_strategy,
            trust_score: cli.trust_score.or(preset.trust_score),
        };

        validate_judge(&config)?;

        debug!(
            models = ?config.models,
            judge = ?config.judge_model,
            judge_with_image = config.judge_with_image,
            "Resolved job configuration"
        );

        Ok(config)
    }

    fn resolve_model_names(
        &self,
        cli: &OcrOverrides,
        preset: &OcrPreset,
    ) -> Result<Vec<String>, ConfigError> {
        if !cli.models.is_empty() {
            return Ok(cli.models.clone());
        }
        if !preset.models.is_empty() {
            return Ok(preset.models.clone());
        }
        if let Some(model) = non_empty(self.settings.defaults.model.as_deref()) {
            return Ok(vec![model.to_string()]);
        }
        match self.prompter {
            Some(prompter) => Ok(vec![prompter.prompt_model()?]),
            None => Err(ConfigError::NoModel),
        }
    }
}

/// Pair model names with repeat counts by position; missing counts default to 1.
fn pair_repeats(names: Vec<String>, repeats: &[u32]) -> Result<Vec<ModelSpec>, ConfigError> {
    if repeats.len() > names.len() {
        warn!(
            models = names.len(),
            repeats = repeats.len(),
            "More repeat counts than models; extra counts ignored"
        );
    }

    names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(ConfigError::EmptyModelName);
            }
            let repeat = repeats.get(i).copied().unwrap_or(1);
            if repeat == 0 {
                return Err(ConfigError::InvalidRepeat {
                    model: name,
                    value: repeat,
                });
            }
            Ok(ModelSpec::new(name, repeat))
        })
        .collect()
}

/// More than one candidate per page requires a judge.
fn validate_judge(config: &JobConfig) -> Result<(), ConfigError> {
    if !config.needs_judge() || config.judge_model.is_some() {
        return Ok(());
    }
    let total = config.total_candidates();

    let reason = if config.models.len() > 1 {
        MultiCandidateReason::MultipleModels {
            count: config.models.len(),
        }
    } else {
        let spec = &config.models[0];
        MultiCandidateReason::RepeatedModel {
            model: spec.name.clone(),
            repeat: spec.repeat_count,
        }
    };

    Err(ConfigError::MissingJudge { reason, total })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}
