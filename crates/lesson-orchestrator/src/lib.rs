//! Lesson generation engine.
//!
//! Turns a topic, difficulty and module count into a multi-file Python
//! lesson: template resolution, AI or deterministic content, quality scoring,
//! and a background job manager exposed over a polling HTTP API.

pub mod api;
pub mod artifact;
pub mod config;
pub mod content;
pub mod error;
pub mod extraction;
pub mod job;
pub mod orchestrator;
pub mod preview;
pub mod python;
pub mod quality;
pub mod request;
pub mod task_manager;
pub mod template;

pub use api::{
    create_router, AppState, CreateLessonResponse, DeleteLessonResponse, ErrorResponse,
    HealthResponse, LessonListResponse, LessonStatusResponse, LessonSummary, ListQuery,
};
pub use artifact::{ArtifactKind, ArtifactWriter, GeneratedArtifact};
pub use config::{AiConfig, Config, CONFIG_FILE_NAME, MAX_WORKERS};
pub use content::{
    backoff_delay, check_ai_available, max_tokens_for, select_provider, AiProvider, CacheKey,
    CompletionRequest, ContentCache, ContentProvider, ContentRequest, ContentSource, ContentStats,
    FallbackProvider, GeneratedContent, HttpTextService, Prompt, TextService, TextServiceError,
};
pub use error::{LessonError, ProviderErrorKind, Result};
pub use job::{new_job_id, Job, JobProgress, JobResult, JobStatus, JOB_ID_PREFIX};
pub use orchestrator::{
    CancelFlag, GenerationOutcome, ModuleResult, NoProgress, Orchestrator, ProgressSink, RunHooks,
    TopicResult, TopicStatus, FAILURE_RECORD_FILE,
};
pub use preview::{
    build_archive, build_preview, GenerationSummary, LessonPreview, ModuleManifest, PreviewFile,
    README_PREVIEW_CHARS, SUMMARY_FILE,
};
pub use quality::{score_lesson, QualityReport};
pub use request::{
    class_name_for, slugify, validate_topic_name, CodeComplexity, Difficulty, GenerationRequest,
    Module, ModuleType, Topic, MAX_MODULES, MAX_TOPIC_NAME_LEN, MIN_MODULES,
};
pub use task_manager::{TaskManager, DEFAULT_LIST_LIMIT};
pub use template::{
    Filter, Template, TemplateBody, TemplateContext, TemplateResolver, TemplateSource, Slot,
};
