#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! A single LLM grading role and the transport it talks through.

use std::{fmt::Display, future::Future, time::Duration};

use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client as OpenAIClient,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs, ResponseFormat,
    },
};
use bon::Builder;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ConfigHandle;

/// Highest score an agent may award.
pub const MAX_SCORE: u8 = 5;

/// Why a model reply could not be turned into an [`Assessment`].
///
/// Every variant is retried by [`Agent::assess`].
#[derive(Error, Debug)]
pub enum AssessmentError {
    /// The request itself failed (network, timeout, API error).
    #[error("request failed: {0}")]
    Request(String),

    /// The model answered with no content.
    #[error("model returned an empty reply")]
    EmptyReply,

    /// The reply was not a JSON object with the expected fields.
    #[error("malformed assessment: {0}")]
    Malformed(String),

    /// The reply carried a score outside `0..=5`.
    #[error("score {0} is outside 0..={MAX_SCORE}")]
    ScoreOutOfRange(f64),
}

/// A validated score with its justification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    /// Integer score in `0..=5`.
    pub score:   u8,
    /// Short justification of the score.
    pub comment: String,
}

impl Assessment {
    /// Creates an assessment, rejecting out-of-range scores.
    pub fn new(score: u8, comment: impl Into<String>) -> Result<Self, AssessmentError> {
        if score > MAX_SCORE {
            return Err(AssessmentError::ScoreOutOfRange(f64::from(score)));
        }
        Ok(Self {
            score,
            comment: comment.into(),
        })
    }

    /// Parses and validates a model reply of the form
    /// `{"score": int, "comment": str}`.
    ///
    /// Markdown code fences around the object are tolerated. The score may
    /// be an integer, an integral float, or a numeric string.
    pub fn parse(reply: &str) -> Result<Self, AssessmentError> {
        let body = strip_fences(reply);
        if body.is_empty() {
            return Err(AssessmentError::EmptyReply);
        }

        let value: Value =
            serde_json::from_str(body).map_err(|e| AssessmentError::Malformed(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| AssessmentError::Malformed("expected a JSON object".into()))?;

        let raw_score = object
            .get("score")
            .ok_or_else(|| AssessmentError::Malformed("missing `score`".into()))?;
        let score = integral_score(raw_score)?;
        if !(0.0..=f64::from(MAX_SCORE)).contains(&score) {
            return Err(AssessmentError::ScoreOutOfRange(score));
        }

        let comment = match object.get("comment") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text.trim().to_string(),
            Some(other) => other.to_string(),
        };

        Ok(Self {
            score: score as u8,
            comment,
        })
    }
}

/// Reads a JSON score, accepting only whole numbers.
fn integral_score(value: &Value) -> Result<f64, AssessmentError> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| AssessmentError::Malformed(format!("`score` is not a number: {value}")))?;

    if number.fract() != 0.0 || !number.is_finite() {
        return Err(AssessmentError::Malformed(format!("`score` is not an integer: {number}")));
    }
    Ok(number)
}

/// Removes a surrounding ```` ``` ```` / ```` ```json ```` fence.
fn strip_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Bounded retries with randomised exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    max_attempts: u32,
    /// Backoff ceiling before the first retry; doubles on every retry.
    base_delay:   Duration,
    /// Upper bound for any single backoff.
    max_backoff:  Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay:   Duration::from_secs(1),
            max_backoff:  Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is raised to at least one.
    pub fn new(max_attempts: u32, base_delay: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_backoff,
        }
    }

    /// A policy that retries immediately, for tests and scripted backends.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Returns the total number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the base backoff delay.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Returns the backoff ceiling.
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Wait before retry number `retry` (1-based): uniform in
    /// `[0, min(base * 2^(retry-1), max)]`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        let ceiling = self.base_delay.saturating_mul(factor).min(self.max_backoff);
        let ceiling_ms = ceiling.as_millis() as u64;
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling_ms))
    }
}

/// Which side of the two-stage pipeline an agent plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Produces the initial score.
    Examiner,
    /// Audits and possibly adjusts the examiner's score.
    Reviewer,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Examiner => write!(f, "examiner"),
            Role::Reviewer => write!(f, "reviewer"),
        }
    }
}

/// Something that can turn a chat transcript into the assistant's reply.
pub trait ChatBackend {
    /// Sends `messages` and returns the raw reply text.
    fn complete(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> impl Future<Output = Result<String, AssessmentError>> + Send;
}

/// Chat backend for any OpenAI-compatible endpoint, in strict JSON mode.
#[derive(Clone)]
pub struct OpenAiBackend {
    /// Configured API client.
    client:      OpenAIClient<OpenAIConfig>,
    /// Model identifier sent with every request.
    model:       String,
    /// Sampling temperature.
    temperature: f32,
}

impl OpenAiBackend {
    /// Builds a backend whose HTTP client gives up after `timeout`.
    pub fn new(
        api_base: &str,
        api_key: &str,
        model: impl Into<String>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to construct HTTP client for model calls")?;
        let client = OpenAIClient::with_config(
            OpenAIConfig::new()
                .with_api_base(api_base.to_owned())
                .with_api_key(api_key.to_owned()),
        )
        .with_http_client(http);

        Ok(Self {
            client,
            model: model.into(),
            temperature,
        })
    }

    /// Builds a backend from the global configuration, optionally overriding
    /// the model.
    pub fn from_config(config: &ConfigHandle, model: Option<&str>) -> Result<Self> {
        let openai = config
            .openai()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY must be set to grade submissions"))?;
        Self::new(
            openai.api_base(),
            openai.api_key(),
            model.unwrap_or(openai.model()),
            openai.temperature(),
            config.request_timeout(),
        )
    }

    /// Returns the model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl ChatBackend for OpenAiBackend {
    async fn complete(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> Result<String, AssessmentError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(self.temperature)
            .response_format(ResponseFormat::JsonObject)
            .build()
            .map_err(|e| AssessmentError::Request(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| AssessmentError::Request(e.to_string()))?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or(AssessmentError::EmptyReply)
    }
}

/// One grading role bound to a backend.
#[derive(Clone, Builder)]
#[builder(on(String, into))]
pub struct Agent<B> {
    /// Role played in the pipeline.
    #[builder(getter)]
    role:          Role,
    /// System prompt sent before every user message.
    system_prompt: String,
    /// Transport used for model calls.
    backend:       B,
    /// Retry behaviour for failed or invalid replies.
    #[builder(default)]
    #[builder(getter)]
    retry:         RetryPolicy,
}

impl<B: ChatBackend> Agent<B> {
    /// Asks the model to assess `user_message`, retrying until a valid
    /// assessment arrives or the attempts run out.
    pub async fn assess(&self, user_message: &str) -> Result<Assessment> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(self.system_prompt.clone())
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_message.to_string())
                .build()?
                .into(),
        ];

        let mut attempt = 1;
        loop {
            let outcome = match self.backend.complete(messages.clone()).await {
                Ok(reply) => Assessment::parse(&reply),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(assessment) => {
                    debug!(
                        role = %self.role,
                        attempt,
                        score = assessment.score,
                        "assessment accepted"
                    );
                    return Ok(assessment);
                }
                Err(e) if attempt < self.retry.max_attempts() => {
                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        role = %self.role,
                        error = %e,
                        attempt,
                        max_attempts = self.retry.max_attempts(),
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying model call"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e).context(format!(
                        "The {} gave no valid assessment after {} attempts",
                        self.role, attempt
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigState;

    #[test]
    fn parses_plain_and_fenced_replies() {
        let plain = Assessment::parse(r#"{"score": 4, "comment": "Good"}"#).unwrap();
        assert_eq!(plain, Assessment::new(4, "Good").unwrap());

        let fenced = Assessment::parse("```json\n{\"score\": \"3\", \"comment\": \"ok\"}\n```")
            .unwrap();
        assert_eq!(fenced.score, 3);

        let float = Assessment::parse(r#"{"score": 5.0, "comment": "x"}"#).unwrap();
        assert_eq!(float.score, 5);
    }

    #[test]
    fn missing_comment_is_empty() {
        let parsed = Assessment::parse(r#"{"score": 0}"#).unwrap();
        assert_eq!(parsed.comment, "");
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(matches!(Assessment::parse("   "), Err(AssessmentError::EmptyReply)));
        assert!(matches!(Assessment::parse("not json"), Err(AssessmentError::Malformed(_))));
        assert!(matches!(Assessment::parse("[1, 2]"), Err(AssessmentError::Malformed(_))));
        assert!(matches!(
            Assessment::parse(r#"{"comment": "no score"}"#),
            Err(AssessmentError::Malformed(_))
        ));
        assert!(matches!(
            Assessment::parse(r#"{"score": 3.5, "comment": ""}"#),
            Err(AssessmentError::Malformed(_))
        ));
        assert!(matches!(
            Assessment::parse(r#"{"score": "high", "comment": ""}"#),
            Err(AssessmentError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_scores() {
        assert!(matches!(
            Assessment::parse(r#"{"score": 6, "comment": ""}"#),
            Err(AssessmentError::ScoreOutOfRange(s)) if s == 6.0
        ));
        assert!(matches!(
            Assessment::parse(r#"{"score": -1, "comment": ""}"#),
            Err(AssessmentError::ScoreOutOfRange(_))
        ));
        assert!(Assessment::new(9, "").is_err());
    }

    #[test]
    fn backoff_stays_under_cap() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100), Duration::from_millis(250));
        for retry in 1..10 {
            assert!(policy.backoff(retry) <= Duration::from_millis(250));
        }
        assert_eq!(RetryPolicy::immediate(3).backoff(2), Duration::ZERO);
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).max_attempts(), 1);
    }

    #[test]
    fn role_names() {
        assert_eq!(Role::Examiner.to_string(), "examiner");
        assert_eq!(Role::Reviewer.to_string(), "reviewer");
    }

    #[test]
    fn backend_requires_api_key() {
        let config = ConfigHandle::from(ConfigState::from_lookup(|_| None).unwrap());
        let err = OpenAiBackend::from_config(&config, None).err().unwrap();
        assert!(err.to_string().contains("OPENAI_API_KEY must be set"));
    }

    #[test]
    fn backend_model_override_wins() {
        let config = ConfigHandle::from(
            ConfigState::from_lookup(|name| {
                match name {
                    "OPENAI_API_KEY" => Some("sk-test".to_string()),
                    "OPENAI_MODEL" => Some("configured".to_string()),
                    _ => None,
                }
            })
            .unwrap(),
        );

        let backend = OpenAiBackend::from_config(&config, None).unwrap();
        assert_eq!(backend.model(), "configured");
        let backend = OpenAiBackend::from_config(&config, Some("override")).unwrap();
        assert_eq!(backend.model(), "override");
    }
}
