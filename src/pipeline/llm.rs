//! Extraction client: send a page to the model with bounded retries.
//!
//! The model is reached through the [`ExtractionOracle`] trait so the retry,
//! pacing and classification logic here can be tested against a scripted
//! fake. [`LlmOracle`] is the production implementation over an
//! `edgequake_llm` provider. All prompt text lives in [`crate::prompts`].
//!
//! ## Retry Strategy
//!
//! Rate limits and network blips are frequent on free-tier vision APIs.
//! Each page gets at most `max_attempts` calls. Before attempt `n > 1` the
//! client waits `retry_backoff_ms * 2^(n-2)`, or the server's `retry-after`
//! when that is longer: with a 2 s base and 3 attempts the waits are
//! 2 s → 4 s. Authentication and request errors are permanent and end the
//! loop immediately.
//!
//! ## Pacing
//!
//! Independently of retries, consecutive calls are separated by at least
//! `inter_call_delay_ms`, success or failure. Processing is sequential, so
//! this alone keeps a batch under most per-minute quotas.

use crate::config::{BatchConfig, RetryPolicy};
use crate::error::{OracleError, Pdf2CsvError};
use crate::pipeline::encode::to_image_data;
use crate::pipeline::render::{Page, PagePayload};
use crate::prompts::EXTRACTION_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// One request to the extraction oracle.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    /// Fixed extraction instruction (system turn).
    pub instruction: String,
    /// Short page identification (user turn text).
    pub hint: String,
    pub image: PagePayload,
}

/// The external model that turns a page image into table-like text.
#[async_trait]
pub trait ExtractionOracle: Send + Sync {
    /// Perform exactly one call. Retries are the caller's business.
    async fn extract(&self, request: &OracleRequest) -> Result<String, OracleError>;
}

/// Outcome of a single attempt, or of a whole extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStatus {
    Ok,
    /// Only ever seen per attempt; a rate-limited attempt is retried.
    RateLimited,
    Failed,
}

impl ExtractionStatus {
    fn of_attempt(err: &OracleError) -> Self {
        match err {
            OracleError::RateLimited { .. } => ExtractionStatus::RateLimited,
            _ => ExtractionStatus::Failed,
        }
    }
}

/// Result of [`ExtractionClient::extract`]. `status` is `Ok` or `Failed`.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub page_index: usize,
    pub status: ExtractionStatus,
    /// Raw model text; empty when the extraction failed.
    pub raw_text: String,
    /// Calls made for this page.
    pub attempts: u32,
    /// Last error seen, when the extraction failed.
    pub error: Option<OracleError>,
}

impl ExtractionResult {
    pub fn is_ok(&self) -> bool {
        self.status == ExtractionStatus::Ok
    }
}

/// Drives an oracle with retry, backoff and inter-call pacing.
pub struct ExtractionClient {
    oracle: Arc<dyn ExtractionOracle>,
    policy: RetryPolicy,
    instruction: String,
    last_call: Mutex<Option<Instant>>,
}

impl ExtractionClient {
    pub fn new(oracle: Arc<dyn ExtractionOracle>, policy: RetryPolicy, instruction: Option<String>) -> Self {
        Self {
            oracle,
            policy,
            instruction: instruction.unwrap_or_else(|| EXTRACTION_PROMPT.to_string()),
            last_call: Mutex::new(None),
        }
    }

    /// Build a client from the batch configuration.
    pub fn from_config(oracle: Arc<dyn ExtractionOracle>, config: &BatchConfig) -> Self {
        Self::new(oracle, config.retry_policy(), config.system_prompt.clone())
    }

    /// Extract one page. Never returns `RateLimited`.
    pub async fn extract(&self, page: &Page, hint: String) -> ExtractionResult {
        let request = OracleRequest {
            instruction: self.instruction.clone(),
            hint,
            image: page.payload.clone(),
        };

        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_err: Option<OracleError> = None;
        let mut attempts = 0;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let mut wait = self.policy.backoff_before(attempt);
                if let Some(OracleError::RateLimited {
                    retry_after_secs: Some(secs),
                }) = &last_err
                {
                    wait = wait.max(secs.saturating_mul(1000));
                }
                warn!(
                    "Page {}: retry {}/{} after {}ms",
                    page.index,
                    attempt - 1,
                    max_attempts - 1,
                    wait
                );
                sleep(Duration::from_millis(wait)).await;
            }

            attempts = attempt;
            match self.paced_call(&request).await {
                Ok(text) => {
                    debug!(
                        "Page {}: {} chars after {} attempt(s)",
                        page.index,
                        text.len(),
                        attempt
                    );
                    return ExtractionResult {
                        page_index: page.index,
                        status: ExtractionStatus::Ok,
                        raw_text: text,
                        attempts,
                        error: None,
                    };
                }
                Err(e) => {
                    warn!(
                        "Page {}: attempt {} {:?}: {}",
                        page.index,
                        attempt,
                        ExtractionStatus::of_attempt(&e),
                        e
                    );
                    let retryable = e.is_retryable();
                    last_err = Some(e);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        ExtractionResult {
            page_index: page.index,
            status: ExtractionStatus::Failed,
            raw_text: String::new(),
            attempts,
            error: last_err,
        }
    }

    async fn paced_call(&self, request: &OracleRequest) -> Result<String, OracleError> {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let min_gap = Duration::from_millis(self.policy.inter_call_delay_ms);
            let elapsed = prev.elapsed();
            if elapsed < min_gap {
                sleep(min_gap - elapsed).await;
            }
        }
        let result = self.oracle.extract(request).await;
        *last = Some(Instant::now());
        result
    }
}

// ── Production oracle ────────────────────────────────────────────────────────

/// [`ExtractionOracle`] over an `edgequake_llm` vision provider.
pub struct LlmOracle {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl LlmOracle {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &BatchConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn build_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ExtractionOracle for LlmOracle {
    async fn extract(&self, request: &OracleRequest) -> Result<String, OracleError> {
        let messages = vec![
            ChatMessage::system(&request.instruction),
            ChatMessage::user_with_images(&request.hint, vec![to_image_data(&request.image)]),
        ];
        let options = self.build_options();

        match self.provider.chat(&messages, Some(&options)).await {
            Ok(response) => {
                debug!(
                    "{} input tokens, {} output tokens",
                    response.prompt_tokens, response.completion_tokens
                );
                Ok(response.content)
            }
            Err(e) => Err(classify_error(&e.to_string())),
        }
    }
}

static RE_RETRY_AFTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)retry(?:[- ]after|[- ]delay| in)\D{0,12}(\d+(?:\.\d+)?)\s*s").unwrap()
});

/// Classify a provider error from its message text.
///
/// Providers surface HTTP status and quota problems in different shapes;
/// matching on the rendered message covers all of them.
pub fn classify_error(message: &str) -> OracleError {
    let lower = message.to_lowercase();

    if lower.contains("rate limit")
        || lower.contains("ratelimit")
        || lower.contains("429")
        || lower.contains("too many requests")
        || lower.contains("quota")
        || lower.contains("resource_exhausted")
    {
        let retry_after_secs = RE_RETRY_AFTER
            .captures(message)
            .and_then(|c| c[1].parse::<f64>().ok())
            .map(|s| s.ceil() as u64);
        return OracleError::RateLimited { retry_after_secs };
    }

    if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("forbidden")
        || lower.contains("api key")
        || lower.contains("authentication")
        || lower.contains("permission denied")
        || lower.contains("400 bad request")
        || lower.contains("invalid_argument")
    {
        return OracleError::Permanent(message.to_string());
    }

    OracleError::Transient(message.to_string())
}

// ── Provider resolution ──────────────────────────────────────────────────────

/// Environment variable holding the API key for a provider, when known.
pub fn credential_var(provider: &str) -> Option<&'static str> {
    match provider.to_ascii_lowercase().as_str() {
        "gemini" | "google" => Some("GEMINI_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "azure" => Some("AZURE_OPENAI_API_KEY"),
        _ => None,
    }
}

/// Build the configured provider, checking its credential first.
///
/// The credential is checked once here, before any file is touched, so a
/// missing key fails the invocation instead of every page.
pub fn resolve_provider(config: &BatchConfig) -> Result<Arc<dyn LLMProvider>, Pdf2CsvError> {
    let provider = config.provider_name.as_str();

    let model = config
        .model_id()
        .ok_or_else(|| Pdf2CsvError::ProviderNotConfigured {
            provider: provider.to_string(),
            hint: "No built-in model tiers for this provider; pass an explicit model id (--model <id>).".to_string(),
        })?;

    if let Some(var) = credential_var(provider) {
        let present = std::env::var(var).map(|v| !v.trim().is_empty()).unwrap_or(false);
        if !present {
            return Err(Pdf2CsvError::MissingCredential {
                provider: provider.to_string(),
                var: var.to_string(),
            });
        }
    }

    debug!("Using provider '{}' with model '{}'", provider, model);
    ProviderFactory::create_llm_provider(provider, &model).map_err(|e| {
        Pdf2CsvError::ProviderNotConfigured {
            provider: provider.to_string(),
            hint: format!("{e}"),
        }
    })
}
