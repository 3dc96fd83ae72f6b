//! Lesson orchestration.
//!
//! The [`Orchestrator`] turns a [`GenerationRequest`] into lesson directories:
//! for each topic, for each module, for each slot it resolves a template,
//! asks the content provider for content, renders and writes the file. When a
//! topic's tree is complete it is scored by the quality validator.
//!
//! Topics fail independently. A failed topic gets a `GENERATION_FAILED.json`
//! record in its root and never aborts its siblings.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactWriter, GeneratedArtifact};
use crate::config::Config;
use crate::content::{
    check_ai_available, select_provider, ContentProvider, ContentRequest, ContentStats,
    TextService,
};
use crate::error::{LessonError, Result};
use crate::quality::{score_lesson, QualityReport};
use crate::request::{GenerationRequest, Module, Topic};
use crate::template::{Slot, TemplateContext, TemplateResolver, TemplateSource};

/// File written into the root of a topic that failed.
pub const FAILURE_RECORD_FILE: &str = "GENERATION_FAILED.json";

// ============================================================================
// Hooks
// ============================================================================

/// Receives progress updates during a run.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Called with a step label and a percentage in `0..=100`.
    async fn report(&self, step: &str, percent: u8);
}

/// A sink that discards progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn report(&self, _step: &str, _percent: u8) {}
}

/// Cooperative cancellation flag shared between a run and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress reporting and cancellation for one run.
#[derive(Clone)]
pub struct RunHooks {
    progress: Arc<dyn ProgressSink>,
    cancel: CancelFlag,
}

impl std::fmt::Debug for RunHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHooks")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Default for RunHooks {
    fn default() -> Self {
        Self {
            progress: Arc::new(NoProgress),
            cancel: CancelFlag::new(),
        }
    }
}

impl RunHooks {
    /// Hooks that ignore progress and are never cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the progress sink.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Sets the cancellation flag.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// The cancellation flag.
    #[must_use]
    pub const fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Final state of one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicStatus {
    /// Every file written and the quality threshold met.
    Completed,
    /// Generation stopped or the result was rejected.
    Failed,
}

/// Files written for one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleResult {
    /// 1-based module index.
    pub index: u32,
    /// Module name.
    pub name: String,
    /// Directory name below the topic root.
    pub dir_name: String,
    /// File names written, in slot order.
    pub files: Vec<String>,
}

/// Outcome of one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicResult {
    /// Topic name as requested.
    pub name: String,
    /// Directory name.
    pub slug: String,
    /// Topic root.
    pub path: PathBuf,
    /// Whether this run claimed the topic root. Roots that already held
    /// files are never claimed.
    #[serde(default)]
    pub root_created: bool,
    /// Final status.
    pub status: TopicStatus,
    /// Modules fully written.
    pub modules: Vec<ModuleResult>,
    /// Number of files written.
    pub files_written: usize,
    /// Quality report, when scoring ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityReport>,
    /// Failure message for failed topics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TopicResult {
    fn new(topic: &Topic, path: PathBuf) -> Self {
        Self {
            name: topic.name.clone(),
            slug: topic.slug.clone(),
            path,
            root_created: false,
            status: TopicStatus::Completed,
            modules: Vec::new(),
            files_written: 0,
            quality: None,
            error: None,
        }
    }

    fn fail(&mut self, message: impl Into<String>) {
        self.status = TopicStatus::Failed;
        self.error = Some(message.into());
    }

    /// Returns `true` if the topic completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == TopicStatus::Completed
    }
}

/// Result of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutcome {
    /// Directory holding the topic roots.
    pub output_root: PathBuf,
    /// Per-topic outcomes, in request order.
    pub topics: Vec<TopicResult>,
    /// Name of the content provider used.
    pub provider: String,
    /// Content statistics.
    pub content: ContentStats,
    /// Template provenance keyed by slot id.
    pub templates: BTreeMap<String, TemplateSource>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

impl GenerationOutcome {
    /// Topics that completed.
    pub fn completed(&self) -> impl Iterator<Item = &TopicResult> {
        self.topics.iter().filter(|t| t.is_completed())
    }

    /// Topics that failed.
    pub fn failed(&self) -> impl Iterator<Item = &TopicResult> {
        self.topics.iter().filter(|t| !t.is_completed())
    }

    /// Returns `true` when no topic completed.
    #[must_use]
    pub fn all_failed(&self) -> bool {
        self.completed().next().is_none()
    }

    /// Roots of the completed topics.
    #[must_use]
    pub fn generated_paths(&self) -> Vec<PathBuf> {
        self.completed().map(|t| t.path.clone()).collect()
    }

    /// Topic roots this run claimed, completed or not.
    #[must_use]
    pub fn created_roots(&self) -> Vec<PathBuf> {
        self.topics
            .iter()
            .filter(|t| t.root_created)
            .map(|t| t.path.clone())
            .collect()
    }

    /// One line per failed topic, for error messages.
    #[must_use]
    pub fn failure_summary(&self) -> String {
        self.failed()
            .map(|t| {
                format!(
                    "{}: {}",
                    t.name,
                    t.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Run duration in seconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FailureRecord<'a> {
    topic: &'a str,
    slug: &'a str,
    error: &'a str,
    modules_completed: usize,
    failed_at: DateTime<Utc>,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Drives template resolution, content generation and quality scoring.
#[derive(Clone)]
pub struct Orchestrator {
    config: Config,
    rate_budget: Arc<Semaphore>,
    text_service: Option<Arc<dyn TextService>>,
    provider: Option<Arc<dyn ContentProvider>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("workers", &self.config.workers)
            .field("rate_budget", &self.rate_budget.available_permits())
            .finish_non_exhaustive()
    }
}

/// Per-run state shared by concurrently processed topics.
struct RunContext<'a> {
    resolver: &'a TemplateResolver,
    provider: &'a dyn ContentProvider,
    hooks: &'a RunHooks,
    modules_done: AtomicUsize,
    modules_total: usize,
}

impl RunContext<'_> {
    async fn module_finished(&self, topic: &Topic, module: &Module) {
        let done = self.modules_done.fetch_add(1, Ordering::SeqCst) + 1;
        let percent = 5 + (85 * done / self.modules_total.max(1)).min(85);
        self.hooks
            .progress
            .report(
                &format!("Generated {} ({})", module.name, topic.name),
                u8::try_from(percent).unwrap_or(90),
            )
            .await;
    }
}

impl Orchestrator {
    /// Creates an orchestrator with its own rate budget.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let permits = config.ai.max_concurrent_requests.max(1) as usize;
        Self {
            config,
            rate_budget: Arc::new(Semaphore::new(permits)),
            text_service: None,
            provider: None,
        }
    }

    /// Shares a rate budget with other orchestrators.
    #[must_use]
    pub fn with_rate_budget(mut self, rate_budget: Arc<Semaphore>) -> Self {
        self.rate_budget = rate_budget;
        self
    }

    /// Uses `service` instead of the HTTP text service.
    #[must_use]
    pub fn with_text_service(mut self, service: Arc<dyn TextService>) -> Self {
        self.text_service = Some(service);
        self
    }

    /// Uses `provider` for every slot, bypassing provider selection.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn ContentProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Rejects a strict AI request when no API key is set.
    ///
    /// An injected text service or provider stands in for the key.
    pub fn check_ready(&self, request: &GenerationRequest) -> Result<()> {
        if self.text_service.is_some() || self.provider.is_some() {
            return Ok(());
        }
        check_ai_available(request, &self.config.ai)
    }

    /// Output root for a request: the request's directory or `fallback`.
    #[must_use]
    pub fn output_root_for(request: &GenerationRequest, fallback: &Path) -> PathBuf {
        request
            .output_dir
            .clone()
            .unwrap_or_else(|| fallback.to_path_buf())
    }

    /// Generates every topic of `request` below `output_root`.
    ///
    /// Returns an outcome even when topics failed; only job-level problems
    /// (an invalid request, an output root that cannot be created) are
    /// errors. Use [`GenerationOutcome::all_failed`] to decide whether the
    /// batch failed.
    pub async fn run(
        &self,
        request: &GenerationRequest,
        output_root: &Path,
        hooks: &RunHooks,
    ) -> Result<GenerationOutcome> {
        let started_at = Utc::now();
        request.validate()?;
        self.check_ready(request)?;
        let topics = request.plan_topics()?;

        tokio::fs::create_dir_all(output_root)
            .await
            .map_err(|e| LessonError::write(output_root, e.to_string()))?;

        let resolver = prepare_templates(request).await;
        let provider = match &self.provider {
            Some(provider) => Arc::clone(provider),
            None => select_provider(
                request,
                &self.config.ai,
                self.text_service.clone(),
                Arc::clone(&self.rate_budget),
            )?,
        };

        info!(
            topics = topics.len(),
            modules = request.modules,
            difficulty = %request.difficulty,
            provider = provider.name(),
            output = %output_root.display(),
            "Starting lesson generation"
        );
        hooks.progress.report("Templates prepared", 5).await;

        let context = RunContext {
            resolver: &resolver,
            provider: provider.as_ref(),
            hooks,
            modules_done: AtomicUsize::new(0),
            modules_total: topics.iter().map(|t| t.modules.len()).sum(),
        };
        let workers = self.config.workers.max(1) as usize;

        let context = &context;
        let pending: Vec<_> = topics
            .iter()
            .enumerate()
            .map(|(position, topic)| async move {
                (position, self.run_topic(topic, output_root, context).await)
            })
            .collect();
        let mut results: Vec<(usize, TopicResult)> = stream::iter(pending)
            .buffer_unordered(workers)
            .collect()
            .await;
        results.sort_by_key(|(position, _)| *position);

        hooks.progress.report("Collecting results", 95).await;

        let outcome = GenerationOutcome {
            output_root: output_root.to_path_buf(),
            topics: results.into_iter().map(|(_, result)| result).collect(),
            provider: provider.name().to_string(),
            content: provider.stats(),
            templates: resolver
                .provenance()
                .into_iter()
                .map(|(slot, source)| (slot.id().to_string(), source))
                .collect(),
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            completed = outcome.completed().count(),
            failed = outcome.failed().count(),
            ai_calls = outcome.content.ai_calls,
            cache_hits = outcome.content.cache_hits,
            fallbacks = outcome.content.fallbacks,
            "Lesson generation finished"
        );
        Ok(outcome)
    }

    async fn run_topic(&self, topic: &Topic, output_root: &Path, context: &RunContext<'_>) -> TopicResult {
        let root = output_root.join(&topic.slug);
        let mut result = TopicResult::new(topic, root.clone());

        if context.hooks.cancel.is_cancelled() {
            result.fail(LessonError::Cancelled.to_string());
            return result;
        }

        if let Err(e) = ensure_empty_root(&root).await {
            warn!(topic = %topic.name, error = %e, "Topic root unusable");
            result.fail(e.to_string());
            return result;
        }
        if let Err(e) = tokio::fs::create_dir_all(&root).await {
            result.fail(LessonError::write(&root, e.to_string()).to_string());
            return result;
        }
        result.root_created = true;

        info!(topic = %topic.name, modules = topic.modules.len(), "Generating topic");
        let mut writer = ArtifactWriter::new(&root);
        let generated = self
            .generate_topic(topic, &mut writer, &mut result.modules, context)
            .await;
        result.files_written = writer.count();

        if let Err(e) = generated {
            warn!(topic = %topic.name, error = %e, "Topic generation failed");
            result.fail(e.to_string());
            write_failure_record(&result).await;
            return result;
        }

        let expected = topic.modules.len();
        let scoring_root = root.clone();
        let report = tokio::task::spawn_blocking(move || score_lesson(&scoring_root, Some(expected)))
            .await
            .map_err(|e| LessonError::lesson_unreadable(&root, e.to_string()))
            .and_then(|report| report);

        match report {
            Ok(report) => {
                let minimum = self.config.min_quality_score;
                if report.passes(minimum) {
                    info!(
                        topic = %topic.name,
                        score = report.score,
                        files = result.files_written,
                        "Topic completed"
                    );
                } else {
                    warn!(
                        topic = %topic.name,
                        score = report.score,
                        minimum,
                        "Quality below threshold"
                    );
                    result.fail(format!(
                        "quality score {:.2} is below the minimum of {minimum:.2}",
                        report.score
                    ));
                }
                result.quality = Some(report);
            }
            Err(e) => result.fail(e.to_string()),
        }

        if !result.is_completed() {
            write_failure_record(&result).await;
        }
        result
    }

    async fn generate_topic(
        &self,
        topic: &Topic,
        writer: &mut ArtifactWriter,
        modules: &mut Vec<ModuleResult>,
        context: &RunContext<'_>,
    ) -> Result<()> {
        for module in &topic.modules {
            if context.hooks.cancel.is_cancelled() {
                return Err(LessonError::Cancelled);
            }

            let dir_name = module.dir_name();
            let mut rendered: HashMap<Slot, String> = HashMap::new();
            let mut files = Vec::with_capacity(Slot::MODULE_SLOTS.len());

            for slot in Slot::MODULE_SLOTS {
                let mut request = ContentRequest::for_module(slot, topic, module);
                if let Some(code) = slot.subject().and_then(|s| rendered.get(&s)) {
                    request = request.with_subject_code(code);
                }
                let content = context.provider.generate(&request).await?;
                debug!(
                    topic = %topic.slug,
                    module = module.index,
                    slot = slot.id(),
                    source = ?content.source,
                    "Slot content ready"
                );

                let body = context
                    .resolver
                    .resolve(slot)
                    .render(&TemplateContext::for_module(topic, module, &content.text));
                writer
                    .write(&GeneratedArtifact::new(
                        Path::new(&dir_name).join(slot.file_name()),
                        body.clone(),
                        slot.kind(),
                    ))
                    .await?;
                files.push(slot.file_name().to_string());
                rendered.insert(slot, body);
            }

            modules.push(ModuleResult {
                index: module.index,
                name: module.name.clone(),
                dir_name,
                files,
            });
            context.module_finished(topic, module).await;
        }

        for slot in Slot::TOPIC_SLOTS {
            let content = context
                .provider
                .generate(&ContentRequest::for_topic(slot, topic))
                .await?;
            let body = context
                .resolver
                .resolve(slot)
                .render(&TemplateContext::for_topic(topic, &content.text));
            writer
                .write(&GeneratedArtifact::new(slot.file_name(), body, slot.kind()))
                .await?;
        }
        Ok(())
    }
}

async fn prepare_templates(request: &GenerationRequest) -> TemplateResolver {
    let custom = request.templates_dir.clone();
    let reference = request.reference_dir.clone();
    match tokio::task::spawn_blocking(move || {
        TemplateResolver::prepare(custom.as_deref(), reference.as_deref())
    })
    .await
    {
        Ok(resolver) => resolver,
        Err(e) => {
            warn!(error = %e, "Template preparation aborted, using built-in templates");
            TemplateResolver::builtin()
        }
    }
}

/// Fails unless `root` is absent or an empty directory.
async fn ensure_empty_root(root: &Path) -> Result<()> {
    match tokio::fs::read_dir(root).await {
        Ok(mut entries) => match entries.next_entry().await {
            Ok(None) => Ok(()),
            Ok(Some(_)) => Err(LessonError::output_exists(root)),
            Err(e) => Err(LessonError::write(root, e.to_string())),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LessonError::write(root, e.to_string())),
    }
}

async fn write_failure_record(result: &TopicResult) {
    if !tokio::fs::metadata(&result.path)
        .await
        .is_ok_and(|m| m.is_dir())
    {
        return;
    }

    let record = FailureRecord {
        topic: &result.name,
        slug: &result.slug,
        error: result.error.as_deref().unwrap_or("unknown error"),
        modules_completed: result.modules.len(),
        failed_at: Utc::now(),
    };
    let path = result.path.join(FAILURE_RECORD_FILE);
    let written = match serde_json::to_vec_pretty(&record) {
        Ok(bytes) => tokio::fs::write(&path, bytes).await.map_err(LessonError::from),
        Err(e) => Err(e.into()),
    };
    if let Err(e) = written {
        warn!(path = %path.display(), error = %e, "Failed to write failure record");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::content::{FallbackProvider, GeneratedContent};
    use crate::request::Difficulty;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn offline_config() -> Config {
        Config {
            workers: 2,
            ..Config::default()
        }
    }

    fn request(topics: &[&str], modules: u32) -> GenerationRequest {
        GenerationRequest::new(topics.iter().copied())
            .with_modules(modules)
            .with_ai(false)
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<u8>>);

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn report(&self, _step: &str, percent: u8) {
            self.0.lock().unwrap().push(percent);
        }
    }

    /// Cancels the run after a fixed number of slots.
    struct CancellingProvider {
        flag: CancelFlag,
        after: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ContentProvider for CancellingProvider {
        fn name(&self) -> &'static str {
            "cancelling"
        }

        async fn generate(&self, request: &ContentRequest<'_>) -> Result<GeneratedContent> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
                self.flag.cancel();
            }
            Ok(GeneratedContent::deterministic(FallbackProvider::content_for(
                request,
            )))
        }
    }

    #[tokio::test]
    async fn test_single_module_layout() {
        let dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(offline_config());
        let outcome = orchestrator
            .run(&request(&["python_fundamentals"], 1), dir.path(), &RunHooks::new())
            .await
            .unwrap();

        assert_eq!(outcome.topics.len(), 1);
        let topic = &outcome.topics[0];
        assert!(topic.is_completed(), "{:?}", topic.error);
        assert_eq!(topic.files_written, 14);
        assert_eq!(outcome.provider, "fallback");

        let module_dir = dir
            .path()
            .join("python_fundamentals")
            .join("module_01_python_fundamentals_overview");
        for slot in Slot::MODULE_SLOTS {
            assert!(module_dir.join(slot.file_name()).is_file(), "{slot}");
        }
        for slot in Slot::TOPIC_SLOTS {
            assert!(dir.path().join("python_fundamentals").join(slot.file_name()).is_file());
        }
        assert!(topic.quality.as_ref().unwrap().score >= 0.6);
    }

    #[tokio::test]
    async fn test_deterministic_without_ai() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(offline_config());
        let req = request(&["Data Pipelines"], 2);

        orchestrator.run(&req, first.path(), &RunHooks::new()).await.unwrap();
        orchestrator.run(&req, second.path(), &RunHooks::new()).await.unwrap();

        let relative = Path::new("data_pipelines/module_02_data_pipelines_implementation_1/assignment_b.py");
        assert_eq!(
            std::fs::read(first.path().join(relative)).unwrap(),
            std::fs::read(second.path().join(relative)).unwrap()
        );
    }

    #[tokio::test]
    async fn test_module_count_matches_request() {
        let dir = TempDir::new().unwrap();
        let outcome = Orchestrator::new(offline_config())
            .run(&request(&["Web APIs"], 6), dir.path(), &RunHooks::new())
            .await
            .unwrap();

        let modules = &outcome.topics[0].modules;
        assert_eq!(modules.len(), 6);
        assert!(modules.iter().all(|m| m.files.len() == 8));
        assert_eq!(modules[4].name, "Web APIs Review and Assessment");
        assert_eq!(modules[5].name, "Web APIs Project");
    }

    #[tokio::test]
    async fn test_custom_template_wins() {
        let dir = TempDir::new().unwrap();
        let templates = TempDir::new().unwrap();
        std::fs::write(
            templates.path().join("extra_exercises.tmpl"),
            "# Practice for {{ module.name | upper }}\n\n{{ content }}",
        )
        .unwrap();

        let req = request(&["Testing"], 1).with_templates_dir(templates.path());
        let outcome = Orchestrator::new(offline_config())
            .run(&req, dir.path(), &RunHooks::new())
            .await
            .unwrap();

        assert_eq!(outcome.templates["extra_exercises"], TemplateSource::Custom);
        let text = std::fs::read_to_string(
            dir.path()
                .join("testing/module_01_testing_overview/extra_exercises.md"),
        )
        .unwrap();
        assert!(text.starts_with("# Practice for TESTING OVERVIEW"));
    }

    #[tokio::test]
    async fn test_existing_topic_root_fails_only_that_topic() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("taken")).unwrap();
        std::fs::write(dir.path().join("taken/notes.txt"), "keep me").unwrap();

        let outcome = Orchestrator::new(offline_config())
            .run(&request(&["Taken", "Fresh"], 1), dir.path(), &RunHooks::new())
            .await
            .unwrap();

        assert!(!outcome.topics[0].is_completed());
        assert!(outcome.topics[0].error.as_ref().unwrap().contains("already exists"));
        assert!(outcome.topics[1].is_completed());
        assert!(!outcome.all_failed());
        assert_eq!(outcome.generated_paths(), vec![dir.path().join("fresh")]);
        assert!(!dir.path().join("taken").join(FAILURE_RECORD_FILE).exists());
        assert!(!outcome.topics[0].root_created);
        assert_eq!(outcome.created_roots(), vec![dir.path().join("fresh")]);
    }

    #[tokio::test]
    async fn test_run_inside_spawned_task() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let orchestrator = Orchestrator::new(offline_config());

        let handle = tokio::spawn(async move {
            let hooks = RunHooks::new();
            orchestrator
                .run(&request(&["Alpha", "Beta", "Gamma"], 1), &root, &hooks)
                .await
        });
        let outcome = handle.await.unwrap().unwrap();

        let names: Vec<_> = outcome.topics.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["Alpha", "Beta", "Gamma"]);
        assert!(outcome.topics.iter().all(TopicResult::is_completed));
        assert_eq!(outcome.created_roots().len(), 3);
    }

    #[tokio::test]
    async fn test_progress_is_reported_in_range() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let hooks = RunHooks::new().with_progress(sink.clone());

        Orchestrator::new(Config {
            workers: 1,
            ..Config::default()
        })
        .run(&request(&["One", "Two"], 2), dir.path(), &hooks)
        .await
        .unwrap();

        let seen = sink.0.lock().unwrap().clone();
        assert_eq!(seen.first(), Some(&5));
        assert_eq!(seen.last(), Some(&95));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert!(seen.contains(&90));
    }

    #[tokio::test]
    async fn test_cancellation_between_modules() {
        let dir = TempDir::new().unwrap();
        let flag = CancelFlag::new();
        let provider = Arc::new(CancellingProvider {
            flag: flag.clone(),
            after: 8,
            calls: AtomicUsize::new(0),
        });

        let outcome = Orchestrator::new(Config {
            workers: 1,
            ..Config::default()
        })
        .with_provider(provider)
        .run(
            &request(&["Alpha", "Beta"], 3),
            dir.path(),
            &RunHooks::new().with_cancel(flag),
        )
        .await
        .unwrap();

        assert!(outcome.all_failed());
        let alpha = &outcome.topics[0];
        assert_eq!(alpha.modules.len(), 1);
        assert!(alpha.error.as_ref().unwrap().contains("cancelled"));
        assert!(dir.path().join("alpha").join(FAILURE_RECORD_FILE).is_file());
        assert!(!dir.path().join("beta").exists());
    }

    #[tokio::test]
    async fn test_quality_threshold_fails_topic() {
        let dir = TempDir::new().unwrap();
        let outcome = Orchestrator::new(Config {
            min_quality_score: 1.01,
            ..Config::default()
        })
        .run(&request(&["Strict Graders"], 1), dir.path(), &RunHooks::new())
        .await
        .unwrap();

        let topic = &outcome.topics[0];
        assert!(!topic.is_completed());
        assert!(topic.quality.is_some());
        assert!(topic.error.as_ref().unwrap().contains("below the minimum"));
        assert!(dir.path().join("strict_graders").join(FAILURE_RECORD_FILE).is_file());
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected() {
        let dir = TempDir::new().unwrap();
        let err = Orchestrator::new(offline_config())
            .run(
                &request(&["x"], 11).with_difficulty(Difficulty::Advanced),
                dir.path(),
                &RunHooks::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
