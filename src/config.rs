#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    path::Path,
    sync::{Arc, Mutex, OnceLock},
    time::Duration,
};

use anyhow::{Context, Result};

use crate::grade::agent::RetryPolicy;

/// Default OpenAI-compatible endpoint.
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Default chat model.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default sampling temperature for both agents.
const DEFAULT_TEMPERATURE: f32 = 0.2;

/// OpenAI credentials and tuning parameters sourced from the environment.
#[derive(Clone)]
pub struct OpenAiEnv {
    /// Base URL for the OpenAI-compatible API endpoint.
    api_base:    String,
    /// API key used to authenticate OpenAI requests.
    api_key:     String,
    /// Default model identifier for chat completions.
    model:       String,
    /// Sampling temperature.
    temperature: f32,
}

impl OpenAiEnv {
    /// Construct an `OpenAiEnv` from variables resolved by `lookup`; returns
    /// `None` when no API key is set.
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Option<Self> {
        let api_key = non_empty_var(lookup, "OPENAI_API_KEY")?;
        let api_base =
            non_empty_var(lookup, "OPENAI_ENDPOINT").unwrap_or_else(|| DEFAULT_API_BASE.into());
        let model = non_empty_var(lookup, "OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into());
        let temperature = lookup("OPENAI_TEMPERATURE")
            .and_then(|s| s.trim().parse::<f32>().ok())
            .unwrap_or(DEFAULT_TEMPERATURE);

        Some(Self::new(api_base, api_key, model, temperature))
    }

    /// Builds a configuration from explicit values.
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature,
        }
    }

    /// Returns the API base URL used for OpenAI requests.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Returns the API key used for OpenAI requests.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Returns the default model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the sampling temperature.
    pub fn temperature(&self) -> f32 {
        self.temperature
    }
}

/// System prompts for the two grading roles.
#[derive(Debug, Clone)]
pub struct GraderPrompts {
    /// Prompt for the examiner, who produces the initial assessment.
    examiner: String,
    /// Prompt for the reviewer, who audits the examiner.
    reviewer: String,
}

impl Default for GraderPrompts {
    fn default() -> Self {
        Self {
            examiner: include_str!("prompts/examiner.md").to_string(),
            reviewer: include_str!("prompts/reviewer.md").to_string(),
        }
    }
}

impl GraderPrompts {
    /// Builds a catalog from explicit prompt texts.
    pub fn new(examiner: impl Into<String>, reviewer: impl Into<String>) -> Self {
        Self {
            examiner: examiner.into(),
            reviewer: reviewer.into(),
        }
    }

    /// Loads the embedded prompts, replacing each one whose override variable
    /// names a readable file.
    fn load(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut prompts = Self::default();
        if let Some(path) = non_empty_var(lookup, "NBGRADE_EXAMINER_PROMPT") {
            prompts.examiner = read_prompt(&path)?;
        }
        if let Some(path) = non_empty_var(lookup, "NBGRADE_REVIEWER_PROMPT") {
            prompts.reviewer = read_prompt(&path)?;
        }
        Ok(prompts)
    }

    /// Returns the examiner system prompt.
    pub fn examiner(&self) -> &str {
        &self.examiner
    }

    /// Returns the reviewer system prompt.
    pub fn reviewer(&self) -> &str {
        &self.reviewer
    }
}

/// Reads a prompt override from disk.
fn read_prompt(path: &str) -> Result<String> {
    std::fs::read_to_string(Path::new(path))
        .with_context(|| format!("Could not read prompt override {path}"))
}

/// Runtime and prompt configuration shared across the crate.
pub struct ConfigState {
    /// Cached OpenAI configuration, if an API key is available.
    openai:          Option<OpenAiEnv>,
    /// System prompts for examiner and reviewer.
    prompts:         GraderPrompts,
    /// Retry policy applied to every model call.
    retry:           RetryPolicy,
    /// Per-request timeout for model calls.
    request_timeout: Duration,
}

impl ConfigState {
    /// Construct a new configuration instance from the process environment
    /// and prompt assets.
    fn new() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from variables resolved by `lookup` instead
    /// of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = RetryPolicy::default();
        let retry = RetryPolicy::new(
            read_u32(&lookup, "NBGRADE_MAX_ATTEMPTS", defaults.max_attempts()),
            defaults.base_delay(),
            read_timeout_secs(
                &lookup,
                "NBGRADE_MAX_BACKOFF_SECS",
                defaults.max_backoff().as_secs(),
            ),
        );

        Ok(Self {
            openai: OpenAiEnv::from_lookup(&lookup),
            prompts: GraderPrompts::load(&lookup)?,
            retry,
            request_timeout: read_timeout_secs(&lookup, "NBGRADE_TIMEOUT_SECS", 30),
        })
    }

    /// Returns the OpenAI configuration, if an API key is present.
    pub fn openai(&self) -> Option<&OpenAiEnv> {
        self.openai.as_ref()
    }

    /// Returns the grading prompts.
    pub fn prompts(&self) -> &GraderPrompts {
        &self.prompts
    }

    /// Returns the retry policy for model calls.
    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// Returns the per-request timeout for model calls.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

/// Shared configuration handle used throughout the crate.
#[derive(Clone)]
pub struct ConfigHandle(Arc<ConfigState>);

impl From<ConfigState> for ConfigHandle {
    fn from(state: ConfigState) -> Self {
        Self(Arc::new(state))
    }
}

impl std::ops::Deref for ConfigHandle {
    type Target = ConfigState;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Global storage for the lazily constructed configuration state.
static CONFIG_SLOT: OnceLock<Mutex<Option<Arc<ConfigState>>>> = OnceLock::new();

/// Returns the mutex guarding the global configuration slot.
fn slot() -> &'static Mutex<Option<Arc<ConfigState>>> {
    CONFIG_SLOT.get_or_init(|| Mutex::new(None))
}

/// Ensure the global configuration has been initialized and return a handle.
pub fn ensure_initialized() -> Result<ConfigHandle> {
    let slot = slot();
    let mut guard = slot.lock().expect("config slot poisoned");
    if let Some(cfg) = guard.as_ref() {
        return Ok(ConfigHandle(Arc::clone(cfg)));
    }

    let cfg = Arc::new(ConfigState::new()?);
    *guard = Some(Arc::clone(&cfg));
    Ok(ConfigHandle(cfg))
}

/// Returns the variable's trimmed value, or `None` if unset or blank.
fn non_empty_var(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

/// Parses a variable as a positive count, falling back to `default` when it
/// is missing, unparsable or zero.
fn read_u32(lookup: &impl Fn(&str) -> Option<String>, env: &str, default: u32) -> u32 {
    lookup(env)
        .and_then(|value| value.trim().parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

/// Parses a variable into a `Duration`, falling back to `default_secs` when
/// parsing fails or the variable is missing.
fn read_timeout_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    env: &str,
    default_secs: u64,
) -> Duration {
    lookup(env)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}
