//! Field generation: ask the generative service for one value per placeholder.
//!
//! The request is a system prompt plus a user prompt listing the requested
//! field names and the company. The response is expected to be a JSON object
//! but is treated as untrusted text: fences are stripped, the outermost
//! `{...}` is sliced out, and anything that still fails to parse yields an
//! empty mapping rather than an error. Missing fields are the merger's
//! problem, not this module's.
//!
//! ## Retry Strategy
//!
//! Only transient failures are retried (rate limits, timeouts, 5xx), with
//! exponential backoff `retry_backoff_ms * 2^(attempt-1)` capped at
//! [`MAX_BACKOFF_MS`]. Authentication and request errors fail the company
//! immediately.

use crate::config::{ProfileConfig, DEFAULT_MODEL, DEFAULT_PROVIDER};
use crate::error::{CompanyError, Phase, ProfileError};
use crate::output::FieldValues;
use crate::prompts::{field_request_prompt, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{
    AnthropicProvider, ChatMessage, CompletionOptions, GeminiProvider, LLMProvider, OpenAIProvider,
    ProviderFactory,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Produces field values for a company.
///
/// The production implementation is [`LlmFieldGenerator`]; tests and
/// embedders can supply their own.
#[async_trait]
pub trait FieldGenerator: Send + Sync {
    /// Generate a value for each of `fields`.
    ///
    /// A malformed or partial response is not an error: return whatever
    /// could be parsed. Only service failures are `Err`.
    async fn generate(&self, company: &str, fields: &[String])
        -> Result<FieldValues, CompanyError>;
}

/// [`FieldGenerator`] backed by an `edgequake-llm` provider.
pub struct LlmFieldGenerator {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    api_timeout_secs: u64,
}

impl LlmFieldGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ProfileConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout_secs: config.api_timeout_secs,
        }
    }

    /// Resolve the provider from `config` and wrap it.
    pub fn from_config(config: &ProfileConfig) -> Result<Self, ProfileError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl FieldGenerator for LlmFieldGenerator {
    async fn generate(
        &self,
        company: &str,
        fields: &[String],
    ) -> Result<FieldValues, CompanyError> {
        let start = Instant::now();
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user(field_request_prompt(company, fields).as_str()),
        ];
        let options = self.options();

        let mut last_err: Option<String> = None;
        let mut last_was_timeout = false;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_delay_ms(self.retry_backoff_ms, attempt);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    company, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let call = self.provider.chat(&messages, Some(&options));
            match timeout(Duration::from_secs(self.api_timeout_secs), call).await {
                Ok(Ok(response)) => {
                    debug!(
                        "{}: {} input tokens, {} output tokens, {:?}",
                        company,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    let values = parse_field_response(&response.content).unwrap_or_else(|| {
                        warn!(
                            "{}: response is not a JSON object, using fallbacks for all fields. Raw: {:.100}",
                            company, response.content
                        );
                        FieldValues::new()
                    });
                    info!("{}: received {}/{} fields", company, values.len(), fields.len());
                    return Ok(values);
                }
                Ok(Err(e)) => {
                    let msg = format!("{e}");
                    warn!("{}: attempt {} failed: {}", company, attempt + 1, msg);
                    last_was_timeout = false;
                    if !is_transient(&msg) {
                        return Err(CompanyError::Generation {
                            company: company.to_string(),
                            retries: attempt,
                            detail: msg,
                        });
                    }
                    last_err = Some(msg);
                }
                Err(_) => {
                    warn!(
                        "{}: attempt {} timed out after {}s",
                        company,
                        attempt + 1,
                        self.api_timeout_secs
                    );
                    last_was_timeout = true;
                    last_err = Some(format!("timed out after {}s", self.api_timeout_secs));
                }
            }
        }

        if last_was_timeout {
            return Err(CompanyError::Timeout {
                company: company.to_string(),
                phase: Phase::Generate,
                secs: self.api_timeout_secs,
            });
        }
        Err(CompanyError::Generation {
            company: company.to_string(),
            retries: self.max_retries,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

/// Longest pause between two attempts.
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// Delay before retry number `attempt` (1-based), doubling from `base_ms`.
fn backoff_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    2u64.checked_pow(attempt.saturating_sub(1))
        .map_or(u64::MAX, |factor| base_ms.saturating_mul(factor))
        .min(MAX_BACKOFF_MS)
}

static RE_TRANSIENT_STATUS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:408|429|50[0234])\b").unwrap());

/// Heuristic for errors worth retrying, based on the provider's message.
///
/// Status codes only count as whole tokens, so numbers that merely contain
/// them (`4500 tokens`) do not trigger a retry.
fn is_transient(message: &str) -> bool {
    if RE_TRANSIENT_STATUS.is_match(message) {
        return true;
    }
    let m = message.to_ascii_lowercase();
    ["rate limit", "rate_limit", "too many requests", "timeout", "timed out",
     "overloaded", "unavailable", "internal server error", "bad gateway"]
        .iter()
        .any(|needle| m.contains(needle))
}

static RE_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*\n?(.*?)\n?```\s*$").unwrap());

/// Parse a model response into field values.
///
/// Returns `None` when no JSON object can be recovered.
pub fn parse_field_response(raw: &str) -> Option<FieldValues> {
    let trimmed = raw.trim();
    let unfenced = match RE_FENCES.captures(trimmed) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(trimmed),
        None => trimmed,
    };

    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    if end < start {
        return None;
    }

    match serde_json::from_str::<Value>(&unfenced[start..=end]) {
        Ok(Value::Object(map)) => Some(FieldValues::from(map)),
        Ok(_) => None,
        Err(e) => {
            debug!("JSON parse error: {}", e);
            None
        }
    }
}

/// Requested fields absent from `values`, in request order.
pub fn missing_fields(requested: &[String], values: &FieldValues) -> Vec<String> {
    requested
        .iter()
        .filter(|f| !values.contains(f))
        .cloned()
        .collect()
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ProfileError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ProfileError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Build a provider that authenticates with `key` instead of reading the
/// environment. Providers without a key-taking constructor fall back to the
/// factory and keep their own configuration.
fn create_provider_with_key(
    provider_name: &str,
    model: &str,
    key: &str,
) -> Result<Arc<dyn LLMProvider>, ProfileError> {
    match provider_name.to_ascii_lowercase().as_str() {
        "gemini" | "google" => Ok(Arc::new(GeminiProvider::new(key).with_model(model))),
        "openai" => Ok(Arc::new(OpenAIProvider::new(key).with_model(model))),
        "anthropic" | "claude" => Ok(Arc::new(AnthropicProvider::new(key).with_model(model))),
        _ => {
            warn!(
                "Provider '{}' does not take an explicit API key; ignoring the one supplied",
                provider_name
            );
            create_provider(provider_name, model)
        }
    }
}

/// Where a [`ProviderChoice`] came from, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderSource {
    /// `provider_name` in the config (`--provider`).
    Named,
    /// `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
    EnvPair,
    /// Only an API key was configured; the default provider is used.
    KeyOnly,
    /// `GEMINI_API_KEY` is set in the environment.
    GeminiEnv,
}

/// The provider, model and explicit key resolution settled on.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderChoice {
    pub provider: String,
    pub model: String,
    /// Key passed in the config. `None` means the provider reads its own
    /// environment variable.
    pub api_key: Option<String>,
    pub source: ProviderSource,
}

impl std::fmt::Debug for ProviderChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderChoice")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("source", &self.source)
            .finish()
    }
}

/// Pick a provider from `config` and the environment seen through `env`.
///
/// Returns `None` when nothing points at a provider, leaving full
/// auto-detection to the caller. The order is:
///
/// 1. **Named provider** (`config.provider_name`).
/// 2. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 3. **API key only**: Gemini with the configured or default model.
/// 4. **`GEMINI_API_KEY` present**: Gemini, reading its own key.
///
/// An explicit `config.api_key` rides along with whichever provider wins.
pub fn choose_provider<F>(config: &ProfileConfig, env: F) -> Option<ProviderChoice>
where
    F: Fn(&str) -> Option<String>,
{
    let env_set = |name: &str| env(name).filter(|v| !v.trim().is_empty());
    let api_key = config.api_key.clone();

    if let Some(name) = config.provider_name.clone() {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| default_model_for(&name).to_string());
        return Some(ProviderChoice { provider: name, model, api_key, source: ProviderSource::Named });
    }

    if let (Some(provider), Some(model)) =
        (env_set("EDGEQUAKE_LLM_PROVIDER"), env_set("EDGEQUAKE_MODEL"))
    {
        return Some(ProviderChoice { provider, model, api_key, source: ProviderSource::EnvPair });
    }

    let model = config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
    if api_key.is_some() {
        return Some(ProviderChoice {
            provider: DEFAULT_PROVIDER.to_string(),
            model,
            api_key,
            source: ProviderSource::KeyOnly,
        });
    }
    if env_set("GEMINI_API_KEY").is_some() {
        return Some(ProviderChoice {
            provider: DEFAULT_PROVIDER.to_string(),
            model,
            api_key: None,
            source: ProviderSource::GeminiEnv,
        });
    }
    None
}

/// Resolve the LLM provider.
///
/// A pre-built `config.provider` is used as-is. Otherwise
/// [`choose_provider`] decides against the process environment, and
/// `ProviderFactory::from_env` is the last resort. The environment is
/// only ever read.
pub fn resolve_provider(config: &ProfileConfig) -> Result<Arc<dyn LLMProvider>, ProfileError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(choice) = choose_provider(config, |name| std::env::var(name).ok()) {
        info!("Using provider {} / {} ({:?})", choice.provider, choice.model, choice.source);
        return match choice.api_key {
            Some(ref key) => create_provider_with_key(&choice.provider, &choice.model, key),
            None => create_provider(&choice.provider, &choice.model),
        };
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ProfileError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Pass --api-key, or set GEMINI_API_KEY / OPENAI_API_KEY / ANTHROPIC_API_KEY.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

fn default_model_for(provider_name: &str) -> &'static str {
    match provider_name.to_ascii_lowercase().as_str() {
        "openai" => "gpt-4.1-mini",
        "anthropic" | "claude" => "claude-sonnet-4-20250514",
        "ollama" => "llama3.2",
        _ => DEFAULT_MODEL,
    }
}
