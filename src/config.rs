//! Configuration types for profile generation.
//!
//! All batch behaviour is controlled through [`ProfileConfig`], built via its
//! [`ProfileConfigBuilder`]. The same struct is passed by reference to every
//! pipeline stage; nothing is read from ambient global state apart from the
//! provider API-key environment variables.

use crate::batch::StopHandle;
use crate::error::ProfileError;
use crate::pipeline::render::RenderEngine;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default provider when only an API key is supplied.
pub const DEFAULT_PROVIDER: &str = "gemini";

/// Default model for [`DEFAULT_PROVIDER`].
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Default image-search endpoint used by the logo resolver.
pub const DEFAULT_LOGO_SEARCH_URL: &str = "https://www.bing.com/images/search";

/// Configuration for a profile-generation batch.
///
/// # Example
/// ```rust
/// use profile_forge::{ProfileConfig, UnresolvedPolicy};
///
/// let config = ProfileConfig::builder()
///     .template("profile_template.html")
///     .output_dir("output")
///     .cooldown_secs(0)
///     .unresolved(UnresolvedPolicy::Passthrough)
///     .build()
///     .unwrap();
/// assert_eq!(config.cooldown_secs, 0);
/// ```
#[derive(Clone)]
pub struct ProfileConfig {
    /// Template file: a bare file name is looked up in `template_dir`,
    /// anything with a directory component is used as given.
    pub template: PathBuf,

    /// Directory holding selectable templates. Default: `templates`.
    pub template_dir: PathBuf,

    /// Where per-company artifacts are written. Default: `output`.
    pub output_dir: PathBuf,

    /// API key for the generative service. Exported to the provider's key
    /// variable before the provider is created.
    pub api_key: Option<String>,

    /// LLM provider name (e.g. "gemini", "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// LLM model identifier. If None, uses [`DEFAULT_MODEL`] for Gemini or
    /// the provider's default.
    pub model: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.8.
    ///
    /// Profiles are invented prose, so a livelier temperature than a
    /// transcription task reads better.
    pub temperature: f32,

    /// Maximum tokens the model may generate per company. Default: 4096.
    pub max_tokens: usize,

    /// Retries on transient generative-service failures (429, 5xx, timeout). Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 2000.
    pub retry_backoff_ms: u64,

    /// Per generative-service call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Timeout for logo search and download requests in seconds. Default: 20.
    pub http_timeout_secs: u64,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Look up a logo for each company. Default: true.
    pub fetch_logos: bool,

    /// Reuse `<safe_name>_logo.png` if already present in the output directory. Default: true.
    pub reuse_existing_logos: bool,

    /// Image-search endpoint queried with `q=<company> logo`.
    pub logo_search_url: String,

    /// How many search candidates to try before giving up. Default: 3.
    pub max_logo_candidates: usize,

    /// What to substitute for placeholders without a value. Default: [`UnresolvedPolicy::Empty`].
    pub unresolved: UnresolvedPolicy,

    /// PDF page format. Default: [`PageSize::A4`].
    pub page_size: PageSize,

    /// HTML-to-PDF engine. `None` picks the first one installed.
    pub render_engine: Option<RenderEngine>,

    /// Explicit engine executable, skipping detection.
    pub render_binary: Option<PathBuf>,

    /// Seconds one PDF render may take. Default: 120.
    pub render_timeout_secs: u64,

    /// Pause between companies in seconds. Default: 10.
    ///
    /// Free-tier generative APIs rate-limit bursts; a short pause between
    /// companies avoids most 429s.
    pub cooldown_secs: u64,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,

    /// Cooperative stop flag checked before each company.
    pub stop: StopHandle,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            template: PathBuf::from("profile_template.html"),
            template_dir: PathBuf::from("templates"),
            output_dir: PathBuf::from("output"),
            api_key: None,
            provider_name: None,
            model: None,
            provider: None,
            temperature: 0.8,
            max_tokens: 4096,
            max_retries: 2,
            retry_backoff_ms: 2000,
            api_timeout_secs: 60,
            http_timeout_secs: 20,
            system_prompt: None,
            fetch_logos: true,
            reuse_existing_logos: true,
            logo_search_url: DEFAULT_LOGO_SEARCH_URL.to_string(),
            max_logo_candidates: 3,
            unresolved: UnresolvedPolicy::default(),
            page_size: PageSize::default(),
            render_engine: None,
            render_binary: None,
            render_timeout_secs: 120,
            cooldown_secs: 10,
            progress_callback: None,
            stop: StopHandle::new(),
        }
    }
}

impl fmt::Debug for ProfileConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileConfig")
            .field("template", &self.template)
            .field("template_dir", &self.template_dir)
            .field("output_dir", &self.output_dir)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("fetch_logos", &self.fetch_logos)
            .field("unresolved", &self.unresolved)
            .field("page_size", &self.page_size)
            .field("render_engine", &self.render_engine)
            .field("render_binary", &self.render_binary)
            .field("cooldown_secs", &self.cooldown_secs)
            .finish()
    }
}

impl ProfileConfig {
    /// Create a new builder for `ProfileConfig`.
    pub fn builder() -> ProfileConfigBuilder {
        ProfileConfigBuilder {
            config: Self::default(),
        }
    }

    /// The template file this config points at.
    pub fn template_path(&self) -> PathBuf {
        resolve_template_path(&self.template, &self.template_dir)
    }
}

/// Resolve a template selection against the template directory.
///
/// A bare file name (`profile.html`) is joined onto `template_dir`; a path
/// with any directory component (`./profile.html`, `/tmp/x.html`) is
/// returned unchanged.
pub fn resolve_template_path(template: &Path, template_dir: &Path) -> PathBuf {
    if template.is_absolute() || template.components().count() > 1 {
        template.to_path_buf()
    } else {
        template_dir.join(template)
    }
}

/// Builder for [`ProfileConfig`].
#[derive(Debug)]
pub struct ProfileConfigBuilder {
    config: ProfileConfig,
}

impl ProfileConfigBuilder {
    pub fn template(mut self, template: impl Into<PathBuf>) -> Self {
        self.config.template = template.into();
        self
    }

    pub fn template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.template_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn http_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn fetch_logos(mut self, v: bool) -> Self {
        self.config.fetch_logos = v;
        self
    }

    pub fn reuse_existing_logos(mut self, v: bool) -> Self {
        self.config.reuse_existing_logos = v;
        self
    }

    pub fn logo_search_url(mut self, url: impl Into<String>) -> Self {
        self.config.logo_search_url = url.into();
        self
    }

    pub fn max_logo_candidates(mut self, n: usize) -> Self {
        self.config.max_logo_candidates = n.max(1);
        self
    }

    pub fn unresolved(mut self, policy: UnresolvedPolicy) -> Self {
        self.config.unresolved = policy;
        self
    }

    pub fn page_size(mut self, size: PageSize) -> Self {
        self.config.page_size = size;
        self
    }

    pub fn render_engine(mut self, engine: RenderEngine) -> Self {
        self.config.render_engine = Some(engine);
        self
    }

    pub fn render_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.render_binary = Some(path.into());
        self
    }

    pub fn render_timeout_secs(mut self, secs: u64) -> Self {
        self.config.render_timeout_secs = secs;
        self
    }

    pub fn cooldown_secs(mut self, secs: u64) -> Self {
        self.config.cooldown_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn stop_handle(mut self, stop: StopHandle) -> Self {
        self.config.stop = stop;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ProfileConfig, ProfileError> {
        let c = &self.config;
        if c.template.as_os_str().is_empty() {
            return Err(ProfileError::InvalidConfig("Template must be set".into()));
        }
        if c.output_dir.as_os_str().is_empty() {
            return Err(ProfileError::InvalidConfig(
                "Output directory must be set".into(),
            ));
        }
        if c.api_timeout_secs == 0 || c.http_timeout_secs == 0 || c.render_timeout_secs == 0 {
            return Err(ProfileError::InvalidConfig(
                "Timeouts must be ≥ 1 second".into(),
            ));
        }
        if let Some(ref key) = c.api_key {
            if key.trim().is_empty() {
                return Err(ProfileError::InvalidConfig("API key is empty".into()));
            }
        }
        if c.fetch_logos && reqwest::Url::parse(&c.logo_search_url).is_err() {
            return Err(ProfileError::InvalidConfig(format!(
                "Logo search URL is not a valid URL: '{}'",
                c.logo_search_url
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// What the merger substitutes for a placeholder with no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnresolvedPolicy {
    /// Replace with an empty string. (default)
    #[default]
    Empty,
    /// Leave `${name}` in the document untouched.
    Passthrough,
}

/// PDF page format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageSize {
    /// 210 × 297 mm. (default)
    #[default]
    A4,
    /// 215.9 × 279.4 mm.
    Letter,
}

impl PageSize {
    /// Name used by CSS `@page { size: ... }` and engine flags.
    pub fn css_name(&self) -> &'static str {
        match self {
            PageSize::A4 => "A4",
            PageSize::Letter => "Letter",
        }
    }
}
