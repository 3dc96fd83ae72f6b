//! AI-backed content with retries, caching and lenient fallback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::{
    CacheKey, CompletionRequest, ContentCache, ContentProvider, ContentRequest, ContentSource,
    ContentStats, FallbackProvider, GeneratedContent, Prompt, TextService, TextServiceError,
};
use crate::config::AiConfig;
use crate::error::{LessonError, ProviderErrorKind, Result};
use crate::python::{self, cached_regex};
use crate::template::Slot;

/// Content provider backed by an external text service.
pub struct AiProvider {
    service: Arc<dyn TextService>,
    config: AiConfig,
    rate_budget: Arc<Semaphore>,
    strict: bool,
    cost_efficient: bool,
    request_timeout: Duration,
    cache: ContentCache,
    ai_calls: AtomicU64,
    cache_hits: AtomicU64,
    fallbacks: AtomicU64,
}

impl std::fmt::Debug for AiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiProvider")
            .field("model", &self.config.model)
            .field("strict", &self.strict)
            .field("cost_efficient", &self.cost_efficient)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Slots whose content comes from the text service. Config files are
/// always deterministic.
const fn uses_ai(slot: Slot) -> bool {
    slot.is_module_slot() || matches!(slot, Slot::Readme)
}

/// Delay before retry number `attempt` (starting at 0).
///
/// A server-provided delay wins over exponential backoff.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use lesson_orchestrator::backoff_delay;
///
/// let base = Duration::from_millis(100);
/// assert_eq!(backoff_delay(base, 0, None), Duration::from_millis(100));
/// assert_eq!(backoff_delay(base, 3, None), Duration::from_millis(800));
/// assert_eq!(backoff_delay(base, 3, Some(Duration::from_secs(2))), Duration::from_secs(2));
/// ```
#[must_use]
pub fn backoff_delay(base: Duration, attempt: u32, retry_after: Option<Duration>) -> Duration {
    retry_after.unwrap_or_else(|| base.saturating_mul(2_u32.saturating_pow(attempt)))
}

fn code_fence_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached_regex(&RE, r"(?s)```(?:python|py)?[ \t]*\n?(.*?)```")
}

/// Takes the largest fenced code block, or the whole text if there is none.
fn extract_code(raw: &str) -> String {
    let Some(re) = code_fence_re() else {
        return raw.trim().to_string();
    };
    re.captures_iter(raw)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .max_by_key(|block| block.len())
        .unwrap_or(raw)
        .trim()
        .to_string()
}

/// Validates and normalizes raw completion text for a slot.
fn post_process(slot: Slot, raw: &str) -> Result<String> {
    if slot.is_code() {
        let code = extract_code(raw);
        if code.is_empty() {
            return Err(LessonError::provider(
                ProviderErrorKind::MalformedResponse,
                format!("{slot}: response contained no code"),
            ));
        }
        let code = python::check_or_repair(&code).map_err(|issue| {
            LessonError::provider(
                ProviderErrorKind::MalformedResponse,
                format!("{slot}: generated code is not valid Python ({issue})"),
            )
        })?;
        return Ok(format!("{}\n", code.trim_end()));
    }

    let text = raw.trim();
    if text.is_empty() {
        return Err(LessonError::provider(
            ProviderErrorKind::MalformedResponse,
            format!("{slot}: response was empty"),
        ));
    }
    Ok(format!("{text}\n"))
}

impl AiProvider {
    /// Creates a provider.
    ///
    /// `strict` decides whether failures fail the slot or fall back to
    /// deterministic content.
    #[must_use]
    pub fn new(
        service: Arc<dyn TextService>,
        config: AiConfig,
        rate_budget: Arc<Semaphore>,
        strict: bool,
        cost_efficient: bool,
    ) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            service,
            config,
            rate_budget,
            strict,
            cost_efficient,
            cache: ContentCache::new(),
            ai_calls: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Overrides the per-call timeout taken from configuration.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// One call under the shared rate budget, bounded by the timeout.
    async fn call_once(
        &self,
        prompt: &CompletionRequest,
    ) -> std::result::Result<String, TextServiceError> {
        let _permit = self.rate_budget.acquire().await.map_err(|_| {
            TextServiceError::new(ProviderErrorKind::Network, "rate budget closed")
        })?;
        self.ai_calls.fetch_add(1, Ordering::Relaxed);

        match tokio::time::timeout(self.request_timeout, self.service.complete(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(TextServiceError::new(
                ProviderErrorKind::Timeout,
                format!("no response within {:?}", self.request_timeout),
            )),
        }
    }

    /// Calls the service with retries and post-processes the result.
    async fn fetch(&self, request: &ContentRequest<'_>) -> Result<String> {
        let prompt = Prompt::build(request, &self.config, self.cost_efficient);
        let mut attempt = 0;

        loop {
            match self.call_once(&prompt).await {
                Ok(raw) => return post_process(request.slot, &raw),
                Err(err) if err.kind.is_transient() && attempt < self.config.max_retries => {
                    let delay =
                        backoff_delay(self.config.retry_base_delay(), attempt, err.retry_after);
                    warn!(
                        slot = %request.slot,
                        topic = %request.topic.slug,
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Transient text service failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[async_trait]
impl ContentProvider for AiProvider {
    fn name(&self) -> &'static str {
        "ai"
    }

    async fn generate(&self, request: &ContentRequest<'_>) -> Result<GeneratedContent> {
        if !uses_ai(request.slot) {
            return Ok(GeneratedContent::deterministic(FallbackProvider::content_for(
                request,
            )));
        }

        let result = if self.config.enable_cache {
            self.cache
                .get_or_try_insert(CacheKey::for_request(request), || self.fetch(request))
                .await
                .map(|(text, hit)| {
                    if hit {
                        self.cache_hits.fetch_add(1, Ordering::Relaxed);
                        debug!(slot = %request.slot, topic = %request.topic.slug, "Content cache hit");
                        (text, ContentSource::Cache)
                    } else {
                        (text, ContentSource::Ai)
                    }
                })
        } else {
            self.fetch(request).await.map(|text| (text, ContentSource::Ai))
        };

        match result {
            Ok((text, source)) => Ok(GeneratedContent { text, source }),
            Err(err) if self.strict => {
                warn!(
                    slot = %request.slot,
                    topic = %request.topic.slug,
                    error = %err,
                    "AI content failed in strict mode"
                );
                Err(err)
            }
            Err(err) => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!(
                    slot = %request.slot,
                    topic = %request.topic.slug,
                    error = %err,
                    "AI content failed, using fallback content"
                );
                Ok(GeneratedContent {
                    text: FallbackProvider::content_for(request),
                    source: ContentSource::Fallback,
                })
            }
        }
    }

    fn stats(&self) -> ContentStats {
        ContentStats {
            ai_calls: self.ai_calls.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::request::{Difficulty, Topic};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted responses; the last one repeats.
    struct ScriptedService {
        responses: Mutex<VecDeque<std::result::Result<String, TextServiceError>>>,
        delay: Duration,
    }

    impl ScriptedService {
        fn new(responses: Vec<std::result::Result<String, TextServiceError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                delay: Duration::ZERO,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                responses: Mutex::new(VecDeque::from([Ok("late".to_string())])),
                delay,
            }
        }
    }

    #[async_trait]
    impl TextService for ScriptedService {
        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> std::result::Result<String, TextServiceError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.pop_front().unwrap()
            } else {
                responses.front().cloned().unwrap()
            }
        }
    }

    fn fast_config() -> AiConfig {
        AiConfig {
            retry_base_delay_ms: 1,
            max_retries: 2,
            ..AiConfig::default()
        }
    }

    fn provider(service: ScriptedService, strict: bool) -> AiProvider {
        AiProvider::new(
            Arc::new(service),
            fast_config(),
            Arc::new(Semaphore::new(2)),
            strict,
            false,
        )
    }

    fn topic() -> Topic {
        Topic::plan("Rust Basics", Difficulty::Beginner, 1).unwrap()
    }

    #[tokio::test]
    async fn test_fenced_code_is_extracted_and_cached() {
        let topic = topic();
        let provider = provider(
            ScriptedService::new(vec![Ok(
                "Here you go:\n```python\nclass A:\n    pass\n```\nEnjoy".to_string(),
            )]),
            true,
        );
        let request = ContentRequest::for_module(Slot::StarterExample, &topic, &topic.modules[0]);

        let first = provider.generate(&request).await.unwrap();
        assert_eq!(first.text, "class A:\n    pass\n");
        assert_eq!(first.source, ContentSource::Ai);

        let second = provider.generate(&request).await.unwrap();
        assert_eq!(second.source, ContentSource::Cache);
        assert_eq!(
            provider.stats(),
            ContentStats {
                ai_calls: 1,
                cache_hits: 1,
                fallbacks: 0
            }
        );
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let topic = topic();
        let provider = provider(
            ScriptedService::new(vec![
                Err(TextServiceError::new(ProviderErrorKind::RateLimit, "slow down")
                    .with_retry_after(Duration::from_millis(1))),
                Err(TextServiceError::new(ProviderErrorKind::Server, "oops")),
                Ok("A learning path.".to_string()),
            ]),
            true,
        );
        let request = ContentRequest::for_module(Slot::LearningPath, &topic, &topic.modules[0]);

        let content = provider.generate(&request).await.unwrap();
        assert_eq!(content.text, "A learning path.\n");
        assert_eq!(provider.stats().ai_calls, 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let topic = topic();
        let provider = provider(
            ScriptedService::new(vec![Err(TextServiceError::new(
                ProviderErrorKind::Network,
                "unreachable",
            ))]),
            true,
        );
        let request = ContentRequest::for_module(Slot::LearningPath, &topic, &topic.modules[0]);

        let err = provider.generate(&request).await.unwrap_err();
        assert_eq!(err.provider_kind(), Some(ProviderErrorKind::Network));
        assert_eq!(provider.stats().ai_calls, 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_strict_vs_lenient() {
        let topic = topic();
        let request = ContentRequest::for_module(Slot::AssignmentA, &topic, &topic.modules[0]);
        let auth_failure = || {
            ScriptedService::new(vec![Err(TextServiceError::new(
                ProviderErrorKind::Authentication,
                "bad key",
            ))])
        };

        let strict = provider(auth_failure(), true);
        let err = strict.generate(&request).await.unwrap_err();
        assert_eq!(err.provider_kind(), Some(ProviderErrorKind::Authentication));
        assert_eq!(strict.stats().ai_calls, 1);

        let lenient = provider(auth_failure(), false);
        let content = lenient.generate(&request).await.unwrap();
        assert_eq!(content.source, ContentSource::Fallback);
        assert_eq!(content.text, FallbackProvider::content_for(&request));
        assert_eq!(lenient.stats().fallbacks, 1);
    }

    #[tokio::test]
    async fn test_invalid_code_is_repaired_or_rejected() {
        let topic = topic();
        let request = ContentRequest::for_module(Slot::AssignmentB, &topic, &topic.modules[0]);

        let repairable = provider(
            ScriptedService::new(vec![Ok("class Rust-Basics:\n    pass\n".to_string())]),
            true,
        );
        assert_eq!(
            repairable.generate(&request).await.unwrap().text,
            "class RustBasics:\n    pass\n"
        );

        let broken = provider(
            ScriptedService::new(vec![Ok("def f(:\n".to_string())]),
            true,
        );
        let err = broken.generate(&request).await.unwrap_err();
        assert_eq!(err.provider_kind(), Some(ProviderErrorKind::MalformedResponse));
    }

    #[tokio::test]
    async fn test_empty_markdown_is_malformed() {
        let topic = topic();
        let provider = provider(ScriptedService::new(vec![Ok("   \n".to_string())]), true);
        let request = ContentRequest::for_module(Slot::ExtraExercises, &topic, &topic.modules[0]);

        let err = provider.generate(&request).await.unwrap_err();
        assert_eq!(err.provider_kind(), Some(ProviderErrorKind::MalformedResponse));
    }

    #[tokio::test]
    async fn test_slow_service_times_out() {
        let topic = topic();
        let provider = AiProvider::new(
            Arc::new(ScriptedService::slow(Duration::from_millis(200))),
            AiConfig {
                max_retries: 0,
                ..fast_config()
            },
            Arc::new(Semaphore::new(1)),
            true,
            false,
        )
        .with_request_timeout(Duration::from_millis(10));
        let request = ContentRequest::for_module(Slot::LearningPath, &topic, &topic.modules[0]);

        let err = provider.generate(&request).await.unwrap_err();
        assert_eq!(err.provider_kind(), Some(ProviderErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_config_slots_never_call_the_service() {
        let topic = topic();
        let provider = provider(
            ScriptedService::new(vec![Err(TextServiceError::new(
                ProviderErrorKind::Authentication,
                "unused",
            ))]),
            true,
        );
        let content = provider
            .generate(&ContentRequest::for_topic(Slot::Makefile, &topic))
            .await
            .unwrap();
        assert_eq!(content.source, ContentSource::Deterministic);
        assert_eq!(provider.stats().ai_calls, 0);
    }

    #[test]
    fn test_extract_code_prefers_largest_block() {
        let raw = "```\nx = 1\n```\ntext\n```py\ndef f():\n    return 2\n```";
        assert_eq!(extract_code(raw), "def f():\n    return 2");
        assert_eq!(extract_code("plain = True"), "plain = True");
        assert!(std::ptr::eq(code_fence_re().unwrap(), code_fence_re().unwrap()));
    }
}
