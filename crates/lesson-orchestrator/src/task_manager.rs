//! Background job management.
//!
//! The [`TaskManager`] owns the job registry, spawns one tokio task per job
//! and answers status queries without waiting for jobs to finish.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::content::{ContentProvider, TextService};
use crate::error::{LessonError, Result};
use crate::job::{new_job_id, Job, JobResult, JobStatus};
use crate::orchestrator::{CancelFlag, Orchestrator, ProgressSink, RunHooks};
use crate::preview::{build_archive, build_preview, LessonPreview};
use crate::request::GenerationRequest;

/// Jobs returned by [`TaskManager::list`] when no limit is given.
pub const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Debug)]
struct JobEntry {
    job: Job,
    cancel: CancelFlag,
}

type Registry = Arc<RwLock<HashMap<String, JobEntry>>>;

/// Forwards orchestrator progress into the registry.
struct RegistryProgress {
    jobs: Registry,
    id: String,
}

#[async_trait]
impl ProgressSink for RegistryProgress {
    async fn report(&self, step: &str, percent: u8) {
        if let Some(entry) = self.jobs.write().await.get_mut(&self.id) {
            entry.job.advance(step, percent);
        }
    }
}

/// Runs generation jobs in the background and tracks their state.
///
/// Cloning is cheap; clones share the registry and both semaphores.
#[derive(Debug, Clone)]
pub struct TaskManager {
    orchestrator: Orchestrator,
    output_dir: PathBuf,
    jobs: Registry,
    job_slots: Arc<Semaphore>,
}

impl TaskManager {
    /// Creates a manager writing below `config.output_dir`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let output_dir = PathBuf::from(&config.output_dir);
        let job_slots = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1) as usize));
        Self {
            orchestrator: Orchestrator::new(config),
            output_dir,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            job_slots,
        }
    }

    /// Overrides the base output directory.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Uses `service` for AI content instead of the HTTP text service.
    #[must_use]
    pub fn with_text_service(mut self, service: Arc<dyn TextService>) -> Self {
        self.orchestrator = self.orchestrator.with_text_service(service);
        self
    }

    /// Uses `provider` for every job.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn ContentProvider>) -> Self {
        self.orchestrator = self.orchestrator.with_provider(provider);
        self
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &Config {
        self.orchestrator.config()
    }

    /// Base output directory.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Validates `request`, registers a pending job and starts it.
    ///
    /// Validation errors are returned before any job exists.
    pub async fn submit(&self, request: GenerationRequest) -> Result<Job> {
        request.validate()?;
        self.orchestrator.check_ready(&request)?;

        let snapshot = self.register(Job::new(request, PathBuf::new())).await;
        let id = snapshot.id.clone();
        info!(job_id = %id, topics = ?snapshot.topics, "Lesson generation job submitted");

        self.spawn(id);
        Ok(snapshot)
    }

    /// Inserts `job` under an id no other job holds, drawing a new id while
    /// the current one is taken. Sets the output root from the final id.
    async fn register(&self, mut job: Job) -> Job {
        let mut jobs = self.jobs.write().await;
        loop {
            if let Entry::Vacant(slot) = jobs.entry(job.id.clone()) {
                job.output_root =
                    Orchestrator::output_root_for(&job.request, &self.output_dir.join(&job.id));
                let snapshot = job.clone();
                slot.insert(JobEntry {
                    job,
                    cancel: CancelFlag::new(),
                });
                return snapshot;
            }
            debug!(job_id = %job.id, "Job id already in use, drawing another");
            job.id = new_job_id();
        }
    }

    async fn claim_roots(&self, id: &str, roots: Vec<PathBuf>) {
        if let Some(entry) = self.jobs.write().await.get_mut(id) {
            entry.job.owned_roots = roots;
        }
    }

    fn spawn(&self, id: String) {
        let worker = self.clone();
        let worker_id = id.clone();
        let handle = tokio::spawn(async move { worker.execute(&worker_id).await });

        let supervisor = self.clone();
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                error!(job_id = %id, error = %e, "Lesson generation task aborted");
                supervisor
                    .finish(&id, Err(format!("Generation task aborted: {e}")))
                    .await;
            }
        });
    }

    async fn execute(&self, id: &str) {
        let Ok(_permit) = Arc::clone(&self.job_slots).acquire_owned().await else {
            self.finish(id, Err("Job pool is closed".to_string())).await;
            return;
        };

        let started = {
            let mut jobs = self.jobs.write().await;
            let Some(entry) = jobs.get_mut(id) else {
                return;
            };
            match entry.job.start() {
                Ok(()) => Some((
                    entry.job.request.clone(),
                    entry.job.output_root.clone(),
                    entry.cancel.clone(),
                )),
                Err(e) => {
                    warn!(job_id = %id, error = %e, "Job could not start");
                    None
                }
            }
        };
        let Some((request, output_root, cancel)) = started else {
            return;
        };

        if cancel.is_cancelled() {
            info!(job_id = %id, "Job cancelled before it started");
            self.finish(id, Err(LessonError::Cancelled.to_string())).await;
            return;
        }

        info!(job_id = %id, output = %output_root.display(), "Lesson generation job started");
        let hooks = RunHooks::new()
            .with_progress(Arc::new(RegistryProgress {
                jobs: Arc::clone(&self.jobs),
                id: id.to_string(),
            }))
            .with_cancel(cancel);

        let finished = match self.orchestrator.run(&request, &output_root, &hooks).await {
            Ok(outcome) => {
                self.claim_roots(id, outcome.created_roots()).await;
                if outcome.all_failed() {
                    Err(format!("All topics failed: {}", outcome.failure_summary()))
                } else {
                    Ok(JobResult {
                        generated_paths: outcome.generated_paths(),
                        outcome,
                    })
                }
            }
            Err(e) => Err(e.to_string()),
        };
        self.finish(id, finished).await;
    }

    /// Records the terminal state of a job. A job already terminal is left
    /// alone; a pending job passes through `processing` first.
    async fn finish(&self, id: &str, outcome: std::result::Result<JobResult, String>) {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.get_mut(id) else {
            return;
        };
        if entry.job.is_terminal() {
            return;
        }
        if entry.job.status == JobStatus::Pending {
            let _ = entry.job.start();
        }

        let recorded = match outcome {
            Ok(result) => {
                let paths = result.generated_paths.len();
                entry.job.advance("Collecting results", 95);
                entry.job.complete(result).map(|()| {
                    info!(job_id = %id, topics = paths, "Lesson generation job completed");
                })
            }
            Err(message) => entry.job.fail(message.clone()).map(|()| {
                warn!(job_id = %id, error = %message, "Lesson generation job failed");
            }),
        };
        if let Err(e) = recorded {
            error!(job_id = %id, error = %e, "Failed to record job result");
            let _ = entry.job.fail(e.to_string());
        }
    }

    /// Current state of a job.
    pub async fn status(&self, id: &str) -> Result<Job> {
        self.jobs
            .read()
            .await
            .get(id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| LessonError::job_not_found(id))
    }

    /// Jobs, newest first, optionally filtered by status.
    pub async fn list(&self, status: Option<JobStatus>, limit: Option<usize>) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|entry| status.map_or(true, |s| entry.job.status == s))
            .map(|entry| entry.job.clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs.truncate(limit.unwrap_or(DEFAULT_LIST_LIMIT));
        jobs
    }

    /// Requests cancellation of a pending or processing job.
    pub async fn cancel(&self, id: &str) -> Result<Job> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| LessonError::job_not_found(id))?;
        if entry.job.is_terminal() {
            return Err(LessonError::job_already_finished(id, entry.job.status));
        }
        entry.cancel.cancel();
        entry.job.cancel_requested = true;
        entry.job.touch();
        info!(job_id = %id, status = %entry.job.status, "Cancellation requested");
        Ok(entry.job.clone())
    }

    /// Forgets a terminal job and removes the paths it owns.
    ///
    /// Returns the paths that were removed.
    pub async fn delete(&self, id: &str) -> Result<Vec<PathBuf>> {
        let job = {
            let mut jobs = self.jobs.write().await;
            let entry = jobs.get(id).ok_or_else(|| LessonError::job_not_found(id))?;
            if !entry.job.is_terminal() {
                return Err(LessonError::job_not_terminal(id, entry.job.status));
            }
            jobs.remove(id).map(|entry| entry.job)
        };
        let Some(job) = job else {
            return Err(LessonError::job_not_found(id));
        };

        let mut removed = Vec::new();
        for path in job.owned_paths() {
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => removed.push(path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(job_id = %id, path = %path.display(), error = %e, "Failed to remove output");
                }
            }
        }
        info!(job_id = %id, removed = removed.len(), "Lesson generation job deleted");
        Ok(removed)
    }

    /// File listing and README of a completed job.
    pub async fn preview(&self, id: &str) -> Result<LessonPreview> {
        let job = self.status(id).await?;
        tokio::task::spawn_blocking(move || build_preview(&job))
            .await
            .map_err(|e| LessonError::archive(e.to_string()))?
    }

    /// Zip archive of a completed job.
    pub async fn archive(&self, id: &str) -> Result<Vec<u8>> {
        let job = self.status(id).await?;
        tokio::task::spawn_blocking(move || build_archive(&job))
            .await
            .map_err(|e| LessonError::archive(e.to_string()))?
    }

    /// Polls until the job is terminal or `timeout` elapses.
    ///
    /// Returns the last observed state either way.
    pub async fn wait(&self, id: &str, timeout: Duration) -> Result<Job> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self.status(id).await?;
            if job.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(job);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::content::{ContentRequest, FallbackProvider, GeneratedContent};
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(30);

    fn manager(dir: &TempDir) -> TaskManager {
        TaskManager::new(Config::default()).with_output_dir(dir.path())
    }

    fn offline(topics: &[&str]) -> GenerationRequest {
        GenerationRequest::new(topics.iter().copied())
            .with_modules(1)
            .with_ai(false)
    }

    /// Blocks every slot until released.
    struct GatedProvider(Arc<Semaphore>);

    #[async_trait]
    impl ContentProvider for GatedProvider {
        fn name(&self) -> &'static str {
            "gated"
        }

        async fn generate(&self, request: &ContentRequest<'_>) -> Result<GeneratedContent> {
            let _permit = self.0.acquire().await;
            Ok(GeneratedContent::deterministic(FallbackProvider::content_for(
                request,
            )))
        }
    }

    struct PanickingProvider;

    #[async_trait]
    #[allow(clippy::panic)]
    impl ContentProvider for PanickingProvider {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn generate(&self, _request: &ContentRequest<'_>) -> Result<GeneratedContent> {
            panic!("provider exploded");
        }
    }

    #[tokio::test]
    async fn test_job_completes() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let job = manager.submit(offline(&["python_fundamentals"])).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let job = manager.wait(&job.id, WAIT).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
        assert_eq!(job.progress.percent, 100);
        let result = job.result.unwrap();
        assert_eq!(
            result.generated_paths,
            vec![dir.path().join(&job.id).join("python_fundamentals")]
        );
        assert!(result.generated_paths[0].join("README.md").is_file());
    }

    #[tokio::test]
    async fn test_validation_rejects_before_job_exists() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let err = manager
            .submit(offline(&["x"]).with_modules(11))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(manager.list(None, None).await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        assert!(matches!(
            manager.status("lesson_deadbeef").await,
            Err(LessonError::JobNotFound { .. })
        ));
        assert!(manager.cancel("lesson_deadbeef").await.is_err());
        assert!(manager.delete("lesson_deadbeef").await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_processing_job() {
        let dir = TempDir::new().unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let manager = manager(&dir).with_provider(Arc::new(GatedProvider(Arc::clone(&gate))));

        let job = manager
            .submit(offline(&["Slow Topic"]).with_modules(2))
            .await
            .unwrap();
        manager.cancel(&job.id).await.unwrap();
        gate.add_permits(1000);

        let job = manager.wait(&job.id, WAIT).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.cancel_requested);
        assert!(job.error.unwrap().contains("cancelled"));
        assert!(manager.cancel(&job.id).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_requires_terminal_and_removes_output() {
        let dir = TempDir::new().unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let manager = manager(&dir).with_provider(Arc::new(GatedProvider(Arc::clone(&gate))));

        let job = manager.submit(offline(&["Deletable"])).await.unwrap();
        assert!(matches!(
            manager.delete(&job.id).await,
            Err(LessonError::JobNotTerminal { .. })
        ));

        gate.add_permits(1000);
        let job = manager.wait(&job.id, WAIT).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
        assert!(job.output_root.exists());

        let removed = manager.delete(&job.id).await.unwrap();
        assert_eq!(removed, vec![job.output_root.clone()]);
        assert!(!job.output_root.exists());
        assert!(manager.status(&job.id).await.is_err());
        assert!(manager.preview(&job.id).await.is_err());
    }

    #[tokio::test]
    async fn test_panic_is_recorded_as_failure() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).with_provider(Arc::new(PanickingProvider));

        let job = manager.submit(offline(&["Boom"])).await.unwrap();
        let job = manager.wait(&job.id, WAIT).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("aborted"));
    }

    #[tokio::test]
    async fn test_list_filters_and_limits() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let mut ids = Vec::new();
        for name in ["One", "Two", "Three"] {
            ids.push(manager.submit(offline(&[name])).await.unwrap().id);
        }
        for id in &ids {
            manager.wait(id, WAIT).await.unwrap();
        }

        assert_eq!(manager.list(None, None).await.len(), 3);
        assert_eq!(manager.list(None, Some(2)).await.len(), 2);
        assert_eq!(
            manager.list(Some(JobStatus::Completed), None).await.len(),
            3
        );
        assert!(manager.list(Some(JobStatus::Pending), None).await.is_empty());

        let listed = manager.list(None, None).await;
        assert!(listed
            .windows(2)
            .all(|w| w[0].created_at >= w[1].created_at));
    }

    #[tokio::test]
    async fn test_preview_requires_completion() {
        let dir = TempDir::new().unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let manager = manager(&dir).with_provider(Arc::new(GatedProvider(Arc::clone(&gate))));

        let job = manager.submit(offline(&["Pending Preview"])).await.unwrap();
        assert!(matches!(
            manager.preview(&job.id).await,
            Err(LessonError::JobNotCompleted { .. })
        ));
        gate.add_permits(1000);
        manager.wait(&job.id, WAIT).await.unwrap();
        assert!(manager.preview(&job.id).await.is_ok());
        assert!(!manager.archive(&job.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_keeps_existing_directory_in_shared_output() {
        let dir = TempDir::new().unwrap();
        let notes = dir.path().join("notes");
        std::fs::create_dir_all(&notes).unwrap();
        std::fs::write(notes.join("thesis.txt"), "years of work").unwrap();

        let manager = manager(&dir);
        let job = manager
            .submit(offline(&["Notes"]).with_output_dir(dir.path()))
            .await
            .unwrap();
        let job = manager.wait(&job.id, WAIT).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("already exists"));
        assert!(job.owned_roots.is_empty());

        let removed = manager.delete(&job.id).await.unwrap();
        assert!(removed.is_empty());
        assert!(notes.join("thesis.txt").is_file());
    }

    #[tokio::test]
    async fn test_delete_removes_only_claimed_roots() {
        let dir = TempDir::new().unwrap();
        let notes = dir.path().join("notes");
        std::fs::create_dir_all(&notes).unwrap();
        std::fs::write(notes.join("thesis.txt"), "years of work").unwrap();

        let manager = manager(&dir);
        let job = manager
            .submit(offline(&["Notes", "Fresh"]).with_output_dir(dir.path()))
            .await
            .unwrap();
        let job = manager.wait(&job.id, WAIT).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
        assert_eq!(job.owned_roots, vec![dir.path().join("fresh")]);

        let removed = manager.delete(&job.id).await.unwrap();
        assert_eq!(removed, vec![dir.path().join("fresh")]);
        assert!(!dir.path().join("fresh").exists());
        assert!(notes.join("thesis.txt").is_file());
    }

    #[tokio::test]
    async fn test_register_never_replaces_a_live_job() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        let first = manager
            .register(Job::new(offline(&["First"]), PathBuf::new()))
            .await;
        let mut clash = Job::new(offline(&["Second"]), PathBuf::new());
        clash.id = first.id.clone();
        let second = manager.register(clash).await;

        assert_ne!(second.id, first.id);
        assert_eq!(second.output_root, dir.path().join(&second.id));
        let kept = manager.status(&first.id).await.unwrap();
        assert_eq!(kept.topics, vec!["First".to_string()]);
        assert_eq!(kept.output_root, dir.path().join(&first.id));
        assert_eq!(manager.list(None, None).await.len(), 2);
    }
}
