//! Job state for background lesson generation.
//!
//! A job moves `pending -> processing -> completed | failed`. Terminal states
//! are absorbing and every other transition is rejected with
//! `InvalidStateTransition`.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LessonError, Result};
use crate::orchestrator::GenerationOutcome;
use crate::request::GenerationRequest;

/// Prefix of every job identifier.
pub const JOB_ID_PREFIX: &str = "lesson_";

// ============================================================================
// JobStatus
// ============================================================================

/// Lifecycle status of a generation job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a job-pool permit.
    #[default]
    Pending,
    /// Generation is running.
    Processing,
    /// At least one topic was generated.
    Completed,
    /// Every topic failed, or the job could not run.
    Failed,
}

impl JobStatus {
    /// Returns `true` for `Completed` and `Failed`.
    ///
    /// # Examples
    ///
    /// ```
    /// use lesson_orchestrator::JobStatus;
    ///
    /// assert!(JobStatus::Completed.is_terminal());
    /// assert!(JobStatus::Failed.is_terminal());
    /// assert!(!JobStatus::Processing.is_terminal());
    /// ```
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns `true` if the state machine allows `self -> next`.
    ///
    /// # Examples
    ///
    /// ```
    /// use lesson_orchestrator::JobStatus;
    ///
    /// assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
    /// assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
    /// assert!(!JobStatus::Failed.can_transition_to(JobStatus::Processing));
    /// ```
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed | Self::Failed)
        )
    }

    /// Parses a status name as used in query strings.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Name as serialized.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// JobProgress
// ============================================================================

/// Step label and percentage. The percentage never decreases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    /// What the job is doing.
    pub step: String,
    /// Completion in `0..=100`.
    pub percent: u8,
}

impl Default for JobProgress {
    fn default() -> Self {
        Self {
            step: "Queued".to_string(),
            percent: 0,
        }
    }
}

impl JobProgress {
    /// Applies an update, keeping the larger percentage.
    ///
    /// Returns `true` if anything changed.
    pub fn advance(&mut self, step: impl Into<String>, percent: u8) -> bool {
        let percent = percent.min(100);
        if percent < self.percent {
            return false;
        }
        let step = step.into();
        let changed = percent != self.percent || step != self.step;
        self.percent = percent;
        self.step = step;
        changed
    }
}

// ============================================================================
// Job
// ============================================================================

/// Result recorded on a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    /// Roots of the topics that were generated.
    pub generated_paths: Vec<PathBuf>,
    /// Full run outcome.
    pub outcome: GenerationOutcome,
}

/// A tracked generation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Identifier, `lesson_` followed by 8 hex digits.
    pub id: String,
    /// Current status.
    pub status: JobStatus,
    /// Current progress.
    pub progress: JobProgress,
    /// Requested topic names.
    pub topics: Vec<String>,
    /// The request being served.
    pub request: GenerationRequest,
    /// Directory that receives the job's topics.
    pub output_root: PathBuf,
    /// Result, once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    /// Error message, once failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Topic roots the run claimed, recorded whether or not the job
    /// completed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owned_roots: Vec<PathBuf>,
    /// Whether cancellation was requested.
    pub cancel_requested: bool,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job last changed.
    pub updated_at: DateTime<Utc>,
    /// When processing started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Generates a fresh job identifier.
///
/// # Examples
///
/// ```
/// let id = lesson_orchestrator::new_job_id();
/// assert!(id.starts_with("lesson_"));
/// assert_eq!(id.len(), "lesson_".len() + 8);
/// ```
#[must_use]
pub fn new_job_id() -> String {
    let simple = uuid::Uuid::new_v4().simple().to_string();
    format!("{JOB_ID_PREFIX}{}", &simple[..8])
}

impl Job {
    /// Creates a pending job.
    #[must_use]
    pub fn new(request: GenerationRequest, output_root: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id: new_job_id(),
            status: JobStatus::Pending,
            progress: JobProgress::default(),
            topics: request.topics.clone(),
            request,
            output_root,
            result: None,
            error: None,
            owned_roots: Vec::new(),
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(LessonError::invalid_transition(self.status, next));
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Updates `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// `pending -> processing`.
    pub fn start(&mut self) -> Result<()> {
        self.transition(JobStatus::Processing)?;
        self.started_at = Some(self.updated_at);
        self.progress.advance("Starting generation", 2);
        Ok(())
    }

    /// `processing -> completed`. The result must name at least one path.
    pub fn complete(&mut self, result: JobResult) -> Result<()> {
        if result.generated_paths.is_empty() {
            return Err(LessonError::invalid_transition(
                self.status,
                "completed without generated topics",
            ));
        }
        self.transition(JobStatus::Completed)?;
        self.finished_at = Some(self.updated_at);
        self.progress.advance("Completed", 100);
        self.result = Some(result);
        Ok(())
    }

    /// `processing -> failed`. The message must not be empty.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        if error.trim().is_empty() {
            return Err(LessonError::invalid_transition(
                self.status,
                "failed without an error message",
            ));
        }
        self.transition(JobStatus::Failed)?;
        self.finished_at = Some(self.updated_at);
        self.progress.advance("Failed", self.progress.percent);
        self.error = Some(error);
        Ok(())
    }

    /// Applies a progress update while processing.
    pub fn advance(&mut self, step: impl Into<String>, percent: u8) {
        if self.status == JobStatus::Processing && self.progress.advance(step, percent) {
            self.touch();
        }
    }

    /// Returns `true` if the job is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Paths the job owns on disk.
    ///
    /// A job writing to its own directory owns all of it; a job writing into
    /// a caller-chosen directory owns only the topic roots its run claimed.
    #[must_use]
    pub fn owned_paths(&self) -> Vec<PathBuf> {
        if self.request.output_dir.is_none() {
            return vec![self.output_root.clone()];
        }
        self.owned_roots.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::content::ContentStats;
    use std::collections::BTreeMap;

    fn job() -> Job {
        Job::new(
            GenerationRequest::new(["Rust Basics", "Tokio"]),
            PathBuf::from("/tmp/out/lesson_x"),
        )
    }

    fn result() -> JobResult {
        let now = Utc::now();
        JobResult {
            generated_paths: vec![PathBuf::from("/tmp/out/lesson_x/rust_basics")],
            outcome: GenerationOutcome {
                output_root: PathBuf::from("/tmp/out/lesson_x"),
                topics: Vec::new(),
                provider: "fallback".to_string(),
                content: ContentStats::default(),
                templates: BTreeMap::new(),
                started_at: now,
                finished_at: now,
            },
        }
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Processing).unwrap(),
            r#""processing""#
        );
        let status: JobStatus = serde_json::from_str(r#""failed""#).unwrap();
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(JobStatus::parse(" Completed "), Some(JobStatus::Completed));
        assert_eq!(JobStatus::parse("done"), None);
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress.percent, 0);
        assert_eq!(job.topics, vec!["Rust Basics", "Tokio"]);
        assert!(job.id.starts_with(JOB_ID_PREFIX));
        assert!(job.id[JOB_ID_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_happy_path() {
        let mut job = job();
        job.start().unwrap();
        assert_eq!(job.progress.percent, 2);
        assert!(job.started_at.is_some());

        job.advance("Templates prepared", 5);
        job.complete(result()).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress.percent, 100);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_transitions_cannot_skip() {
        let mut job = job();
        assert!(matches!(
            job.complete(result()),
            Err(LessonError::InvalidStateTransition { .. })
        ));
        assert!(job.fail("boom").is_err());
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn test_terminal_is_absorbing() {
        let mut job = job();
        tokio_test::assert_ok!(job.start());
        tokio_test::assert_ok!(job.fail("every topic failed"));

        tokio_test::assert_err!(job.start());
        tokio_test::assert_err!(job.complete(result()));
        tokio_test::assert_err!(job.fail("again"));
        assert_eq!(job.error.as_deref(), Some("every topic failed"));
    }

    #[test]
    fn test_completion_and_failure_need_payloads() {
        let mut job = job();
        job.start().unwrap();

        let mut empty = result();
        empty.generated_paths.clear();
        assert!(job.complete(empty).is_err());
        assert!(job.fail("  ").is_err());
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut job = job();
        job.start().unwrap();
        job.advance("Module 3", 60);
        job.advance("Module 2", 40);
        assert_eq!(job.progress.percent, 60);
        assert_eq!(job.progress.step, "Module 3");

        job.advance("Overflow", 250);
        assert_eq!(job.progress.percent, 100);
    }

    #[test]
    fn test_owned_paths() {
        let job = job();
        assert_eq!(job.owned_paths(), vec![PathBuf::from("/tmp/out/lesson_x")]);

        let mut job = Job::new(
            GenerationRequest::new(["Rust Basics", "Tokio"]).with_output_dir("/tmp/shared"),
            PathBuf::from("/tmp/shared"),
        );
        assert!(job.owned_paths().is_empty());

        job.owned_roots = vec![PathBuf::from("/tmp/shared/tokio")];
        assert_eq!(job.owned_paths(), vec![PathBuf::from("/tmp/shared/tokio")]);
    }
}
