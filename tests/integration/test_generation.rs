//! End-to-end generation scenarios.
//!
//! These tests drive the orchestrator and task manager against a temporary
//! output directory, with deterministic content or stubbed text services.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lesson_orchestrator::{
    score_lesson, CompletionRequest, Config, ContentProvider, ContentRequest, Difficulty,
    FallbackProvider, GeneratedContent, GenerationRequest, JobStatus, LessonError, Orchestrator,
    ProviderErrorKind, Result, RunHooks, Slot, TaskManager, TextService, TextServiceError,
    FAILURE_RECORD_FILE,
};
use lesson_report::{
    json::JsonGenerator, ContentSummary, MarkdownGenerator, QualitySummary, ReportGenerator,
    ReportInput, ReportStatus, TopicReport, TopicStatus,
};
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(60);

/// Config with fast retries so failing services do not slow the suite.
fn test_config() -> Config {
    let mut config = Config::default();
    config.ai.retry_base_delay_ms = 1;
    config.ai.max_retries = 1;
    config
}

/// A text service that always rejects the credentials.
struct RejectingService {
    calls: AtomicUsize,
}

impl RejectingService {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TextService for RejectingService {
    async fn complete(
        &self,
        _request: &CompletionRequest,
    ) -> std::result::Result<String, TextServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TextServiceError::new(
            ProviderErrorKind::Authentication,
            "invalid api key",
        ))
    }
}

/// Deterministic content, except that it turns one topic's second module
/// directory into a plain file just before the module is written.
struct BlockingProvider {
    output_root: PathBuf,
    topic_slug: &'static str,
}

#[async_trait]
impl ContentProvider for BlockingProvider {
    fn name(&self) -> &'static str {
        "blocking"
    }

    async fn generate(&self, request: &ContentRequest<'_>) -> Result<GeneratedContent> {
        if let Some(module) = request.module {
            if request.topic.slug == self.topic_slug
                && module.index == 2
                && request.slot == Slot::LearningPath
            {
                let blocker = self
                    .output_root
                    .join(&request.topic.slug)
                    .join(module.dir_name());
                std::fs::write(blocker, "not a directory").map_err(LessonError::from)?;
            }
        }
        Ok(GeneratedContent::deterministic(FallbackProvider::content_for(
            request,
        )))
    }
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .expect("readable directory")
        .map(|entry| entry.expect("directory entry").path())
        .map(|path| if path.is_dir() { count_files(&path) } else { 1 })
        .sum()
}

#[tokio::test]
async fn test_python_fundamentals_offline() {
    let dir = TempDir::new().expect("temp dir");
    let request = GenerationRequest::new(["python_fundamentals"])
        .with_difficulty(Difficulty::Beginner)
        .with_modules(1)
        .with_ai(false);

    let outcome = Orchestrator::new(test_config())
        .run(&request, dir.path(), &RunHooks::new())
        .await
        .expect("generation runs");

    assert_eq!(outcome.topics.len(), 1);
    let topic = &outcome.topics[0];
    assert!(topic.is_completed(), "{:?}", topic.error);

    let topic_root = dir.path().join("python_fundamentals");
    let module_dirs: Vec<_> = std::fs::read_dir(&topic_root)
        .expect("topic root exists")
        .map(|entry| entry.expect("entry").path())
        .filter(|path| path.is_dir())
        .collect();
    assert_eq!(module_dirs.len(), 1);
    for slot in Slot::MODULE_SLOTS {
        assert!(module_dirs[0].join(slot.file_name()).is_file(), "{slot}");
    }
    for slot in Slot::TOPIC_SLOTS {
        assert!(topic_root.join(slot.file_name()).is_file(), "{slot}");
    }

    let quality = topic.quality.as_ref().expect("quality attached");
    assert!(quality.score >= 0.6, "score {}", quality.score);

    let rescored = score_lesson(&topic_root, Some(1)).expect("lesson is readable");
    assert!((rescored.score - quality.score).abs() < 1e-9);
}

#[tokio::test]
async fn test_three_module_lesson_is_complete() {
    let dir = TempDir::new().expect("temp dir");
    let request = GenerationRequest::new(["Python Fundamentals"]).with_ai(false);

    let outcome = Orchestrator::new(test_config())
        .run(&request, dir.path(), &RunHooks::new())
        .await
        .expect("generation runs");

    let topic_root = dir.path().join("python_fundamentals");
    assert_eq!(count_files(&topic_root), 3 * 8 + 6);
    assert!(topic_root
        .join("module_01_python_fundamentals_fundamentals")
        .is_dir());
    assert!(topic_root
        .join("module_03_python_fundamentals_implementation_2")
        .join("test_assignment_b.py")
        .is_file());

    let quality = outcome.topics[0].quality.as_ref().expect("quality attached");
    assert!((quality.factors["completeness"] - 1.0).abs() < 1e-9);
    assert!((quality.factors["syntax"] - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_too_many_modules_is_rejected_before_a_job_exists() {
    let dir = TempDir::new().expect("temp dir");
    let manager = TaskManager::new(test_config()).with_output_dir(dir.path());
    let request = GenerationRequest::new(["Python Fundamentals"])
        .with_modules(11)
        .with_ai(false);

    let err = manager.submit(request).await.expect_err("must be rejected");
    assert!(err.is_validation(), "{err}");
    assert!(manager.list(None, None).await.is_empty());
    assert_eq!(count_files(dir.path()), 0);
}

#[tokio::test]
async fn test_strict_mode_permanent_failure_fails_the_job() {
    let dir = TempDir::new().expect("temp dir");
    let service = Arc::new(RejectingService::new());
    let manager = TaskManager::new(test_config())
        .with_output_dir(dir.path())
        .with_text_service(Arc::clone(&service) as Arc<dyn TextService>);

    let request = GenerationRequest::new(["Decorators"])
        .with_modules(1)
        .with_strict(true);
    let job = manager.submit(request).await.expect("submitted");
    let job = manager.wait(&job.id, WAIT).await.expect("job exists");

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.expect("failed job carries an error");
    assert!(!error.is_empty());
    assert!(error.contains("Decorators"), "{error}");
    assert!(job.result.is_none());
    assert!(service.calls.load(Ordering::SeqCst) >= 1);

    let topic_root = job.output_root.join("decorators");
    assert!(topic_root.join(FAILURE_RECORD_FILE).is_file());
    assert!(!topic_root.join("README.md").exists());
}

#[tokio::test]
async fn test_lenient_mode_falls_back_and_completes() {
    let dir = TempDir::new().expect("temp dir");
    let request = GenerationRequest::new(["Decorators"])
        .with_modules(1)
        .with_strict(false);

    let outcome = Orchestrator::new(test_config())
        .with_text_service(Arc::new(RejectingService::new()))
        .run(&request, dir.path(), &RunHooks::new())
        .await
        .expect("generation runs");

    assert!(outcome.topics[0].is_completed(), "{:?}", outcome.topics[0].error);
    assert!(outcome.content.fallbacks > 0);
    assert!(outcome.topics[0].quality.as_ref().expect("scored").score >= 0.6);
}

#[tokio::test]
async fn test_filesystem_error_fails_only_one_topic() {
    let dir = TempDir::new().expect("temp dir");
    let provider = BlockingProvider {
        output_root: dir.path().to_path_buf(),
        topic_slug: "broken_topic",
    };
    let mut config = test_config();
    config.workers = 2;
    let request = GenerationRequest::new(["Broken Topic", "Healthy Topic"])
        .with_modules(2)
        .with_ai(false);

    let outcome = Orchestrator::new(config)
        .with_provider(Arc::new(provider))
        .run(&request, dir.path(), &RunHooks::new())
        .await
        .expect("batch runs");

    assert!(!outcome.all_failed());
    let broken = &outcome.topics[0];
    let healthy = &outcome.topics[1];

    assert!(!broken.is_completed());
    assert_eq!(broken.modules.len(), 1);
    assert!(broken.error.as_deref().is_some_and(|e| !e.is_empty()));
    assert!(dir
        .path()
        .join("broken_topic")
        .join(FAILURE_RECORD_FILE)
        .is_file());

    assert!(healthy.is_completed(), "{:?}", healthy.error);
    assert_eq!(healthy.files_written, 2 * 8 + 6);
    assert_eq!(count_files(&dir.path().join("healthy_topic")), 2 * 8 + 6);
    assert_eq!(outcome.generated_paths(), vec![dir.path().join("healthy_topic")]);
}

#[tokio::test]
async fn test_batch_report_renders_outcome() {
    let dir = TempDir::new().expect("temp dir");
    std::fs::create_dir_all(dir.path().join("taken")).expect("create dir");
    std::fs::write(dir.path().join("taken/notes.txt"), "keep").expect("write file");

    let request = GenerationRequest::new(["Taken", "Fresh"])
        .with_modules(1)
        .with_ai(false);
    let outcome = Orchestrator::new(test_config())
        .run(&request, dir.path(), &RunHooks::new())
        .await
        .expect("batch runs");

    let input = ReportInput {
        title: request.topics.join(", "),
        output_root: outcome.output_root.display().to_string(),
        provider: outcome.provider.clone(),
        modules_per_topic: request.modules,
        duration_seconds: 0,
        min_quality_score: 0.5,
        topics: outcome
            .topics
            .iter()
            .map(|t| TopicReport {
                name: t.name.clone(),
                slug: t.slug.clone(),
                path: t.path.display().to_string(),
                status: if t.is_completed() {
                    TopicStatus::Completed
                } else {
                    TopicStatus::Failed
                },
                modules: t.modules.len(),
                files_written: t.files_written,
                quality: t.quality.as_ref().map(|q| QualitySummary {
                    score: q.score,
                    factors: q.factors.clone(),
                    issues: q.issues.clone(),
                }),
                error: t.error.clone(),
            })
            .collect(),
        content: ContentSummary {
            ai_calls: outcome.content.ai_calls,
            cache_hits: outcome.content.cache_hits,
            fallbacks: outcome.content.fallbacks,
        },
        templates: outcome
            .templates
            .iter()
            .map(|(slot, source)| (slot.clone(), source.to_string()))
            .collect(),
    };

    let report = ReportGenerator::new(input).generate().expect("report builds");
    assert_eq!(report.summary.status, ReportStatus::Partial);
    assert_eq!(report.recommendations[0].category, "failure");

    let markdown = MarkdownGenerator::new(&report).generate();
    assert!(markdown.contains("| Topics | 2 (1 completed, 1 failed) |"));
    assert!(markdown.contains("| Fresh | fresh | completed | 1 | 14 |"));

    let json_path = dir.path().join("generation_report.json");
    JsonGenerator::new(&report)
        .write_to_file(&json_path, true)
        .expect("report written");
    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).expect("read back"))
            .expect("valid json");
    assert_eq!(value["summary"]["status"], "partial");
    assert_eq!(value["templates"]["readme"], "built_in");
}
