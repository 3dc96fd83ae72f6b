//! Generation report rendering.
//!
//! Turns the outcome of a lesson generation batch into a [`Report`] that can be
//! serialized to JSON for tooling or rendered to Markdown for people.
//!
//! # Types
//!
//! - [`Report`] - The complete report for one batch
//! - [`ReportSummary`] - Batch-level status and totals
//! - [`TopicReport`] - Outcome of a single topic, with its quality breakdown
//! - [`ContentSummary`] - AI calls, cache hits and fallbacks
//! - [`Recommendation`] - A prioritized follow-up
//!
//! # Generators
//!
//! - [`ReportGenerator`] - Derives a [`Report`] from a [`ReportInput`]
//! - [`json::JsonGenerator`] - Compact or pretty JSON
//! - [`MarkdownGenerator`] - Human-readable Markdown
//!
//! # Example
//!
//! ```rust
//! use lesson_report::{
//!     ContentSummary, MarkdownGenerator, QualitySummary, ReportGenerator, ReportInput,
//!     TopicReport, TopicStatus,
//! };
//!
//! let input = ReportInput {
//!     title: "Python Fundamentals".to_string(),
//!     output_root: "generated_lessons".to_string(),
//!     provider: "fallback".to_string(),
//!     modules_per_topic: 3,
//!     duration_seconds: 2,
//!     min_quality_score: 0.5,
//!     topics: vec![TopicReport {
//!         name: "Python Fundamentals".to_string(),
//!         slug: "python_fundamentals".to_string(),
//!         path: "generated_lessons/python_fundamentals".to_string(),
//!         status: TopicStatus::Completed,
//!         modules: 3,
//!         files_written: 30,
//!         quality: Some(QualitySummary::new(0.96)),
//!         error: None,
//!     }],
//!     content: ContentSummary::default(),
//!     templates: Default::default(),
//! };
//!
//! let report = ReportGenerator::new(input).generate().unwrap();
//! assert!(report.summary.status.is_success());
//! assert!(MarkdownGenerator::new(&report).generate().contains("python\\_fundamentals"));
//! ```

pub mod json;
mod markdown;

pub use markdown::MarkdownGenerator;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Failed to serialize the report to JSON.
    #[error("failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read or write report files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid report data.
    #[error("invalid report data: {0}")]
    InvalidData(String),
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

// ============================================================================
// Statuses (local copies to avoid a dependency on the engine crate)
// ============================================================================

/// Overall status of a generation batch.
///
/// # Examples
///
/// ```
/// use lesson_report::ReportStatus;
///
/// assert_eq!(ReportStatus::from_counts(2, 0), ReportStatus::Completed);
/// assert_eq!(ReportStatus::from_counts(1, 1), ReportStatus::Partial);
/// assert_eq!(ReportStatus::from_counts(0, 2), ReportStatus::Failed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Every topic was generated.
    #[default]
    Completed,
    /// At least one topic was generated and at least one failed.
    Partial,
    /// No topic was generated.
    Failed,
}

impl ReportStatus {
    /// Derives the batch status from topic counts.
    #[must_use]
    pub const fn from_counts(completed: usize, failed: usize) -> Self {
        match (completed, failed) {
            (0, _) => Self::Failed,
            (_, 0) => Self::Completed,
            _ => Self::Partial,
        }
    }

    /// Returns `true` if every topic was generated.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns `true` if nothing was generated.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Returns a human-readable description.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Completed => "All topics generated",
            Self::Partial => "Some topics failed",
            Self::Failed => "All topics failed",
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Status of one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicStatus {
    /// Lesson written and scored.
    #[default]
    Completed,
    /// Generation stopped with an error.
    Failed,
}

impl TopicStatus {
    /// Short label for tables.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TopicStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Report
// ============================================================================

/// Complete report for one generation batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Report {
    /// Report title, usually the requested topics.
    pub title: String,

    /// Batch-level status and totals.
    pub summary: ReportSummary,

    /// Per-topic outcomes in request order.
    pub topics: Vec<TopicReport>,

    /// Content statistics for the batch.
    pub content: ContentSummary,

    /// Template provenance keyed by slot id.
    pub templates: BTreeMap<String, String>,

    /// Follow-ups, most important first.
    pub recommendations: Vec<Recommendation>,
}

impl Report {
    /// Creates a new report builder.
    #[must_use]
    pub fn builder() -> ReportBuilder {
        ReportBuilder::default()
    }

    /// Serializes the report to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(ReportError::from)
    }

    /// Topic counts by status.
    #[must_use]
    pub fn topic_counts(&self) -> TopicCounts {
        let completed = self
            .topics
            .iter()
            .filter(|t| t.status == TopicStatus::Completed)
            .count();
        TopicCounts {
            completed,
            failed: self.topics.len() - completed,
        }
    }

    /// Mean quality score over scored topics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_quality(&self) -> Option<f64> {
        let scores: Vec<f64> = self
            .topics
            .iter()
            .filter_map(|t| t.quality.as_ref().map(|q| q.score))
            .collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }
}

/// Topic counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopicCounts {
    /// Topics generated.
    pub completed: usize,
    /// Topics that failed.
    pub failed: usize,
}

impl TopicCounts {
    /// Total number of topics.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.completed + self.failed
    }
}

// ============================================================================
// ReportBuilder
// ============================================================================

/// Builder for constructing [`Report`] instances.
#[derive(Debug, Clone, Default)]
pub struct ReportBuilder {
    title: Option<String>,
    summary: Option<ReportSummary>,
    topics: Vec<TopicReport>,
    content: ContentSummary,
    templates: BTreeMap<String, String>,
    recommendations: Vec<Recommendation>,
}

impl ReportBuilder {
    /// Sets the title.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the summary.
    #[must_use]
    pub fn summary(mut self, summary: ReportSummary) -> Self {
        self.summary = Some(summary);
        self
    }

    /// Adds one topic.
    #[must_use]
    pub fn topic(mut self, topic: TopicReport) -> Self {
        self.topics.push(topic);
        self
    }

    /// Replaces the topics.
    #[must_use]
    pub fn topics(mut self, topics: Vec<TopicReport>) -> Self {
        self.topics = topics;
        self
    }

    /// Sets the content statistics.
    #[must_use]
    pub const fn content(mut self, content: ContentSummary) -> Self {
        self.content = content;
        self
    }

    /// Records where one slot's template came from.
    #[must_use]
    pub fn template(mut self, slot: impl Into<String>, source: impl Into<String>) -> Self {
        self.templates.insert(slot.into(), source.into());
        self
    }

    /// Adds one recommendation.
    #[must_use]
    pub fn recommendation(mut self, rec: Recommendation) -> Self {
        self.recommendations.push(rec);
        self
    }

    /// Builds the report.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::InvalidData` if the title or summary is missing.
    pub fn build(self) -> Result<Report> {
        let title = self
            .title
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ReportError::InvalidData("title is required".to_string()))?;

        let summary = self
            .summary
            .ok_or_else(|| ReportError::InvalidData("summary is required".to_string()))?;

        let mut recommendations = self.recommendations;
        recommendations.sort_by_key(|r| r.priority);

        Ok(Report {
            title,
            summary,
            topics: self.topics,
            content: self.content,
            templates: self.templates,
            recommendations,
        })
    }
}

// ============================================================================
// ReportSummary
// ============================================================================

/// Batch-level status and totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Overall status.
    pub status: ReportStatus,

    /// Modules requested per topic.
    pub modules_per_topic: u32,

    /// Files written across all topics.
    pub files_written: usize,

    /// Wall time of the batch.
    pub duration_seconds: u64,

    /// Directory holding the topic roots.
    pub output_root: String,

    /// Content provider used.
    pub provider: String,
}

// ============================================================================
// TopicReport
// ============================================================================

/// Outcome of a single topic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopicReport {
    /// Topic name as requested.
    pub name: String,

    /// Directory name.
    pub slug: String,

    /// Topic root.
    pub path: String,

    /// Final status.
    pub status: TopicStatus,

    /// Modules fully written.
    pub modules: usize,

    /// Files written for this topic.
    pub files_written: usize,

    /// Quality breakdown, when scoring ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualitySummary>,

    /// Failure message for failed topics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Quality score of one lesson with its sub-factors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    /// Overall score in `[0.0, 1.0]`.
    pub score: f64,

    /// Sub-scores keyed by factor name.
    pub factors: BTreeMap<String, f64>,

    /// Problems found.
    pub issues: Vec<String>,
}

impl QualitySummary {
    /// A score with no factors or issues.
    #[must_use]
    pub const fn new(score: f64) -> Self {
        Self {
            score,
            factors: BTreeMap::new(),
            issues: Vec::new(),
        }
    }

    /// Adds a sub-score.
    #[must_use]
    pub fn with_factor(mut self, name: impl Into<String>, value: f64) -> Self {
        self.factors.insert(name.into(), value);
        self
    }

    /// Adds an issue.
    #[must_use]
    pub fn with_issue(mut self, issue: impl Into<String>) -> Self {
        self.issues.push(issue.into());
        self
    }
}

// ============================================================================
// ContentSummary
// ============================================================================

/// Content statistics for a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSummary {
    /// Calls made to the text service.
    pub ai_calls: u64,

    /// Results served from the cache.
    pub cache_hits: u64,

    /// Slots that fell back to deterministic content.
    pub fallbacks: u64,
}

impl ContentSummary {
    /// Share of AI-eligible requests answered from the cache.
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

// ============================================================================
// Recommendation
// ============================================================================

/// A prioritized follow-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Priority, 1 is most urgent.
    pub priority: u32,

    /// Category such as `failure` or `content`.
    pub category: String,

    /// What to do.
    pub description: String,
}

impl Recommendation {
    /// Creates a recommendation.
    #[must_use]
    pub fn new(priority: u32, category: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            priority,
            category: category.into(),
            description: description.into(),
        }
    }
}

// ============================================================================
// ReportGenerator
// ============================================================================

/// Raw batch data handed over by the caller.
#[derive(Debug, Clone, Default)]
pub struct ReportInput {
    /// Report title.
    pub title: String,
    /// Directory holding the topic roots.
    pub output_root: String,
    /// Content provider used.
    pub provider: String,
    /// Modules requested per topic.
    pub modules_per_topic: u32,
    /// Wall time of the batch.
    pub duration_seconds: u64,
    /// Quality threshold the batch ran with.
    pub min_quality_score: f64,
    /// Per-topic outcomes.
    pub topics: Vec<TopicReport>,
    /// Content statistics.
    pub content: ContentSummary,
    /// Template provenance keyed by slot id.
    pub templates: BTreeMap<String, String>,
}

/// Derives a [`Report`], including status and recommendations, from raw input.
#[derive(Debug, Clone)]
pub struct ReportGenerator {
    input: ReportInput,
}

impl ReportGenerator {
    /// Wraps the input.
    #[must_use]
    pub const fn new(input: ReportInput) -> Self {
        Self { input }
    }

    /// Builds the report.
    pub fn generate(self) -> Result<Report> {
        let input = self.input;
        let recommendations = recommendations_for(&input);

        let completed = input
            .topics
            .iter()
            .filter(|t| t.status == TopicStatus::Completed)
            .count();
        let summary = ReportSummary {
            status: ReportStatus::from_counts(completed, input.topics.len() - completed),
            modules_per_topic: input.modules_per_topic,
            files_written: input.topics.iter().map(|t| t.files_written).sum(),
            duration_seconds: input.duration_seconds,
            output_root: input.output_root,
            provider: input.provider,
        };

        let mut builder = Report::builder()
            .title(input.title)
            .summary(summary)
            .topics(input.topics)
            .content(input.content);
        for (slot, source) in input.templates {
            builder = builder.template(slot, source);
        }
        for rec in recommendations {
            builder = builder.recommendation(rec);
        }
        builder.build()
    }
}

fn recommendations_for(input: &ReportInput) -> Vec<Recommendation> {
    let mut recs = Vec::new();

    for topic in &input.topics {
        if topic.status == TopicStatus::Failed {
            recs.push(Recommendation::new(
                1,
                "failure",
                format!(
                    "Topic '{}' failed ({}). Fix the cause and generate it again.",
                    topic.name,
                    topic.error.as_deref().unwrap_or("unknown error")
                ),
            ));
        }
    }

    if input.content.fallbacks > 0 {
        recs.push(Recommendation::new(
            2,
            "content",
            format!(
                "{} slot(s) used fallback content. Check the text service key and rate limits, \
                 or use strict mode to fail instead.",
                input.content.fallbacks
            ),
        ));
    }

    for topic in &input.topics {
        let Some(quality) = &topic.quality else {
            continue;
        };
        if quality.factors.get("syntax").is_some_and(|s| *s < 1.0) {
            recs.push(Recommendation::new(
                2,
                "syntax",
                format!(
                    "Some Python files in '{}' fail the syntax check. Review the generated code.",
                    topic.slug
                ),
            ));
        }
        if quality.factors.get("completeness").is_some_and(|c| *c < 1.0) {
            recs.push(Recommendation::new(
                3,
                "completeness",
                format!("'{}' is missing expected files.", topic.slug),
            ));
        }
        if quality.score < input.min_quality_score {
            recs.push(Recommendation::new(
                3,
                "quality",
                format!(
                    "'{}' scored {:.2}, below the {:.2} threshold.",
                    topic.slug, quality.score, input.min_quality_score
                ),
            ));
        }
    }

    recs
}

// ============================================================================
// Tests
// ============================================================================
