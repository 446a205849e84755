//! Configuration types for batch table extraction.
//!
//! All batch behaviour is controlled through [`BatchConfig`], built via its
//! [`BatchConfigBuilder`]. The config is an immutable value handed to the
//! orchestrator and the extraction client at construction; nothing in the
//! pipeline reads the environment on its own, which keeps every stage
//! testable against a fake extraction oracle.

use crate::error::Pdf2CsvError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default LLM provider. The original extraction prompts were tuned on Gemini.
pub const DEFAULT_PROVIDER: &str = "gemini";

/// Configuration for a batch conversion run.
///
/// # Example
/// ```rust
/// use edgequake_pdf2csv::{BatchConfig, ModelTier, NamingMode};
///
/// let config = BatchConfig::builder()
///     .recursive(true)
///     .model_tier(ModelTier::Accurate)
///     .naming(NamingMode::Monthly)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_attempts, 3);
/// ```
#[derive(Clone)]
pub struct BatchConfig {
    /// Walk subdirectories of the input root. Default: false.
    pub recursive: bool,

    /// LLM provider name (e.g. "gemini", "openai", "anthropic"). Default: "gemini".
    pub provider_name: String,

    /// Which model to use: a quality/cost tier or an explicit model id.
    pub model: ModelSelection,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Transcribing numbers out of a scanned table is not a creative task;
    /// low temperature keeps the model faithful to what it sees.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 8192.
    ///
    /// Dense monitoring tables with dozens of rows easily pass 4 000 tokens
    /// once rendered as CSV.
    pub max_tokens: usize,

    /// Total extraction attempts per page, first try included. Default: 3.
    pub max_attempts: u32,

    /// Base backoff between attempts in milliseconds. Default: 2000.
    ///
    /// The wait before attempt `n` (n ≥ 2) is `retry_backoff_ms * 2^(n-2)`,
    /// so three attempts wait 2 s then 4 s. A rate-limit response carrying a
    /// longer `retry-after` wins over the computed value.
    pub retry_backoff_ms: u64,

    /// Minimum spacing between consecutive extraction calls in milliseconds.
    /// Default: 1000.
    ///
    /// Applied regardless of whether the previous call succeeded.
    pub inter_call_delay_ms: u64,

    /// How output CSV files are named. Default: [`NamingMode::PerPage`].
    pub naming: NamingMode,

    /// Longest edge, in pixels, of a page sent to the model. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom extraction prompt. If None, uses [`crate::prompts::EXTRACTION_PROMPT`].
    pub system_prompt: Option<String>,

    /// Optional per-item progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            recursive: false,
            provider_name: DEFAULT_PROVIDER.to_string(),
            model: ModelSelection::default(),
            temperature: 0.1,
            max_tokens: 8192,
            max_attempts: 3,
            retry_backoff_ms: 2000,
            inter_call_delay_ms: 1000,
            naming: NamingMode::default(),
            max_rendered_pixels: 2000,
            password: None,
            system_prompt: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("recursive", &self.recursive)
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("inter_call_delay_ms", &self.inter_call_delay_ms)
            .field("naming", &self.naming)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }

    /// The concrete model id sent to the provider.
    ///
    /// Returns `None` when a tier was selected for a provider that has no
    /// built-in tier table; callers must then pass an explicit model id.
    pub fn model_id(&self) -> Option<String> {
        match &self.model {
            ModelSelection::Explicit(id) => Some(id.clone()),
            ModelSelection::Tier(tier) => tier.model_for(&self.provider_name).map(str::to_string),
        }
    }

    /// Retry and pacing knobs consumed by the extraction client.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_ms: self.retry_backoff_ms,
            inter_call_delay_ms: self.inter_call_delay_ms,
        }
    }
}

/// Builder for [`BatchConfig`].
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn recursive(mut self, v: bool) -> Self {
        self.config.recursive = v;
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = name.into();
        self
    }

    pub fn model(mut self, selection: ModelSelection) -> Self {
        self.config.model = selection;
        self
    }

    pub fn model_tier(mut self, tier: ModelTier) -> Self {
        self.config.model = ModelSelection::Tier(tier);
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

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn inter_call_delay_ms(mut self, ms: u64) -> Self {
        self.config.inter_call_delay_ms = ms;
        self
    }

    pub fn naming(mut self, mode: NamingMode) -> Self {
        self.config.naming = mode;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, Pdf2CsvError> {
        let c = &self.config;
        if c.max_attempts == 0 {
            return Err(Pdf2CsvError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        if c.max_rendered_pixels < 100 || c.max_rendered_pixels > 10_000 {
            return Err(Pdf2CsvError::InvalidConfig(format!(
                "max_rendered_pixels must be 100–10000, got {}",
                c.max_rendered_pixels
            )));
        }
        if c.provider_name.trim().is_empty() {
            return Err(Pdf2CsvError::InvalidConfig(
                "provider name must not be empty".into(),
            ));
        }
        if let ModelSelection::Explicit(id) = &c.model {
            if id.trim().is_empty() {
                return Err(Pdf2CsvError::InvalidConfig(
                    "model id must not be empty".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

/// Retry/backoff/pacing parameters for [`crate::pipeline::llm::ExtractionClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub inter_call_delay_ms: u64,
}

impl RetryPolicy {
    /// Delay before attempt number `attempt` (1-based; the first attempt has none).
    pub fn backoff_before(&self, attempt: u32) -> u64 {
        if attempt <= 1 {
            return 0;
        }
        self.backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt - 2))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        BatchConfig::default().retry_policy()
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Quality/cost tier of the extraction model.
///
/// | Tier | Gemini | OpenAI | Anthropic |
/// |------|--------|--------|-----------|
/// | `Fast` (default) | gemini-2.0-flash | gpt-4.1-mini | claude-haiku-4-20250514 |
/// | `Accurate` | gemini-2.5-pro | gpt-4.1 | claude-sonnet-4-20250514 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelTier {
    /// Cheap and quick; good for clean, typed tables.
    #[default]
    Fast,
    /// Slower and pricier; better on handwriting and faint scans.
    Accurate,
}

impl ModelTier {
    /// Model id for this tier on a given provider, if the provider is known.
    pub fn model_for(&self, provider: &str) -> Option<&'static str> {
        let id = match (provider.to_ascii_lowercase().as_str(), self) {
            ("gemini" | "google", ModelTier::Fast) => "gemini-2.0-flash",
            ("gemini" | "google", ModelTier::Accurate) => "gemini-2.5-pro",
            ("openai" | "azure", ModelTier::Fast) => "gpt-4.1-mini",
            ("openai" | "azure", ModelTier::Accurate) => "gpt-4.1",
            ("anthropic", ModelTier::Fast) => "claude-haiku-4-20250514",
            ("anthropic", ModelTier::Accurate) => "claude-sonnet-4-20250514",
            _ => return None,
        };
        Some(id)
    }
}

/// Model chosen on the command line: a tier name or an explicit model id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelSelection {
    Tier(ModelTier),
    Explicit(String),
}

impl Default for ModelSelection {
    fn default() -> Self {
        ModelSelection::Tier(ModelTier::default())
    }
}

impl FromStr for ModelSelection {
    type Err = Pdf2CsvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" => Err(Pdf2CsvError::InvalidConfig("empty model name".into())),
            "fast" | "cheap" | "flash" => Ok(ModelSelection::Tier(ModelTier::Fast)),
            "accurate" | "pro" | "slow" => Ok(ModelSelection::Tier(ModelTier::Accurate)),
            _ => Ok(ModelSelection::Explicit(trimmed.to_string())),
        }
    }
}

/// How output files are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NamingMode {
    /// `<stem>.csv` for single-page sources, `<stem>_page<N>.csv` otherwise. (default)
    #[default]
    PerPage,
    /// `<Month>_<Year>.csv` when the page's collection month is known,
    /// falling back to the per-page name when it is not.
    Monthly,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documentation() {
        let c = BatchConfig::default();
        assert!(!c.recursive);
        assert_eq!(c.provider_name, "gemini");
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.inter_call_delay_ms, 1000);
        assert_eq!(c.naming, NamingMode::PerPage);
        assert_eq!(c.model_id().as_deref(), Some("gemini-2.0-flash"));
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = BatchConfig::builder().max_attempts(0).build().unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn tiers_resolve_per_provider() {
        let c = BatchConfig::builder()
            .provider_name("openai")
            .model_tier(ModelTier::Accurate)
            .build()
            .unwrap();
        assert_eq!(c.model_id().as_deref(), Some("gpt-4.1"));

        let c = BatchConfig::builder()
            .provider_name("ollama")
            .build()
            .unwrap();
        assert_eq!(c.model_id(), None);
    }

    #[test]
    fn model_selection_parses_tiers_and_ids() {
        assert_eq!(
            "fast".parse::<ModelSelection>().unwrap(),
            ModelSelection::Tier(ModelTier::Fast)
        );
        assert_eq!(
            "ACCURATE".parse::<ModelSelection>().unwrap(),
            ModelSelection::Tier(ModelTier::Accurate)
        );
        assert_eq!(
            "gemini-1.5-pro".parse::<ModelSelection>().unwrap(),
            ModelSelection::Explicit("gemini-1.5-pro".into())
        );
        assert!("  ".parse::<ModelSelection>().is_err());
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let p = RetryPolicy {
            max_attempts: 4,
            backoff_ms: 500,
            inter_call_delay_ms: 0,
        };
        assert_eq!(p.backoff_before(1), 0);
        assert_eq!(p.backoff_before(2), 500);
        assert_eq!(p.backoff_before(3), 1000);
        assert_eq!(p.backoff_before(4), 2000);
    }

    #[test]
    fn debug_redacts_password() {
        let c = BatchConfig::builder().password("hunter2").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("hunter2"));
    }
}
