//! Content providers.
//!
//! Slot content comes from one of exactly two [`ContentProvider`]
//! implementations: the deterministic [`FallbackProvider`] and the
//! [`AiProvider`], which calls an external text service and degrades to the
//! fallback in lenient mode.

mod ai;
mod cache;
mod client;
mod fallback;
mod prompt;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, warn};

pub use ai::{backoff_delay, AiProvider};
pub use cache::{CacheKey, ContentCache};
pub use client::{CompletionRequest, HttpTextService, TextService, TextServiceError};
pub use fallback::FallbackProvider;
pub use prompt::{max_tokens_for, Prompt};

use crate::config::AiConfig;
use crate::error::{LessonError, Result};
use crate::request::{GenerationRequest, Module, Topic};
use crate::template::Slot;

/// What to generate.
#[derive(Debug, Clone, Copy)]
pub struct ContentRequest<'a> {
    /// Slot being filled.
    pub slot: Slot,
    /// Topic the content belongs to.
    pub topic: &'a Topic,
    /// Module, for module slots.
    pub module: Option<&'a Module>,
    /// Generated code of the file a test slot exercises.
    pub subject_code: Option<&'a str>,
}

impl<'a> ContentRequest<'a> {
    /// Request for a topic-level slot.
    #[must_use]
    pub const fn for_topic(slot: Slot, topic: &'a Topic) -> Self {
        Self {
            slot,
            topic,
            module: None,
            subject_code: None,
        }
    }

    /// Request for a module slot.
    #[must_use]
    pub const fn for_module(slot: Slot, topic: &'a Topic, module: &'a Module) -> Self {
        Self {
            slot,
            topic,
            module: Some(module),
            subject_code: None,
        }
    }

    /// Attaches the code under test.
    #[must_use]
    pub const fn with_subject_code(mut self, code: &'a str) -> Self {
        self.subject_code = Some(code);
        self
    }
}

/// Where a piece of content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
    /// Fresh from the text service.
    Ai,
    /// Reused from the run-scoped cache.
    Cache,
    /// Fallback substituted after an AI failure.
    Fallback,
    /// Produced deterministically by design.
    Deterministic,
}

/// Content for one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedContent {
    /// The text.
    pub text: String,
    /// Provenance.
    pub source: ContentSource,
}

impl GeneratedContent {
    /// Deterministic content.
    #[must_use]
    pub fn deterministic(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: ContentSource::Deterministic,
        }
    }
}

/// Counters describing how content was obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStats {
    /// Calls made to the text service, retries included.
    pub ai_calls: u64,
    /// Results served from the cache.
    pub cache_hits: u64,
    /// Slots that fell back to deterministic content after an AI failure.
    pub fallbacks: u64,
}

impl ContentStats {
    /// Share of AI-eligible requests answered from the cache.
    ///
    /// # Examples
    ///
    /// ```
    /// use lesson_orchestrator::ContentStats;
    ///
    /// let stats = ContentStats { ai_calls: 3, cache_hits: 1, fallbacks: 0 };
    /// assert!((stats.cache_efficiency() - 0.25).abs() < f64::EPSILON);
    /// assert_eq!(ContentStats::default().cache_efficiency(), 0.0);
    /// ```
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cache_efficiency(&self) -> f64 {
        let total = self.ai_calls + self.cache_hits;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

/// Produces content for a slot.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Short name for logs and reports.
    fn name(&self) -> &'static str;

    /// Generates content for one slot.
    async fn generate(&self, request: &ContentRequest<'_>) -> Result<GeneratedContent>;

    /// Counters accumulated so far.
    fn stats(&self) -> ContentStats {
        ContentStats::default()
    }
}

/// Checks that AI content can be produced for a request.
///
/// A missing API key is only an error in strict mode; lenient runs fall
/// back to deterministic content.
pub fn check_ai_available(request: &GenerationRequest, config: &AiConfig) -> Result<()> {
    if request.ai && request.strict_or(config.strict) && config.api_key().is_none() {
        return Err(LessonError::AiUnavailable {
            api_key_env: config.api_key_env.clone(),
        });
    }
    Ok(())
}

/// Picks the provider for a run.
///
/// `service` overrides the HTTP text service built from `config`. All AI
/// calls acquire a permit from `rate_budget`.
pub fn select_provider(
    request: &GenerationRequest,
    config: &AiConfig,
    service: Option<Arc<dyn TextService>>,
    rate_budget: Arc<Semaphore>,
) -> Result<Arc<dyn ContentProvider>> {
    if !request.ai {
        info!("AI disabled, using deterministic content");
        return Ok(Arc::new(FallbackProvider));
    }

    let strict = request.strict_or(config.strict);
    let service = match service {
        Some(service) => service,
        None => {
            if let Some(key) = config.api_key() {
                Arc::new(HttpTextService::new(config, key)?) as Arc<dyn TextService>
            } else if strict {
                return Err(LessonError::AiUnavailable {
                    api_key_env: config.api_key_env.clone(),
                });
            } else {
                warn!(
                    api_key_env = %config.api_key_env,
                    "No API key set, using deterministic content"
                );
                return Ok(Arc::new(FallbackProvider));
            }
        }
    };

    info!(
        model = %config.model,
        strict,
        cost_efficient = request.cost_efficient,
        "Using AI content provider"
    );
    Ok(Arc::new(AiProvider::new(
        service,
        config.clone(),
        rate_budget,
        strict,
        request.cost_efficient,
    )))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn config_without_key() -> AiConfig {
        AiConfig {
            api_key_env: "LESSONGEN_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..AiConfig::default()
        }
    }

    #[test]
    fn test_ai_disabled_selects_fallback() {
        let request = GenerationRequest::new(["x"]).with_ai(false);
        let provider =
            select_provider(&request, &config_without_key(), None, Arc::new(Semaphore::new(1)))
                .unwrap();
        assert_eq!(provider.name(), "fallback");
    }

    #[test]
    fn test_missing_key_strict_is_unavailable() {
        let request = GenerationRequest::new(["x"]).with_strict(true);
        let config = config_without_key();

        assert!(check_ai_available(&request, &config).unwrap_err().is_validation());
        let err = select_provider(&request, &config, None, Arc::new(Semaphore::new(1)))
            .err()
            .unwrap();
        assert!(matches!(err, LessonError::AiUnavailable { .. }));
    }

    #[test]
    fn test_missing_key_lenient_falls_back() {
        let request = GenerationRequest::new(["x"]).with_strict(false);
        let config = config_without_key();

        assert!(check_ai_available(&request, &config).is_ok());
        let provider =
            select_provider(&request, &config, None, Arc::new(Semaphore::new(1))).unwrap();
        assert_eq!(provider.name(), "fallback");
    }
}
