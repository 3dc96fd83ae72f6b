//! Markdown report generation.
//!
//! [`MarkdownGenerator`] renders a [`Report`] as a document with:
//!
//! - A summary table with batch totals
//! - A topic table plus quality factors and issues per topic
//! - Content statistics and template provenance
//! - Prioritized recommendations
//!
//! # Example
//!
//! ```rust
//! use lesson_report::{MarkdownGenerator, Report};
//!
//! let report = Report {
//!     title: "Python Fundamentals".to_string(),
//!     ..Report::default()
//! };
//!
//! let markdown = MarkdownGenerator::new(&report).generate();
//! assert!(markdown.contains("# Lesson Generation Report: Python Fundamentals"));
//! ```

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::{Recommendation, Report, TopicReport};

/// Issues listed per topic before the rest are summarized.
const MAX_ISSUES_PER_TOPIC: usize = 10;

/// Renders a [`Report`] as Markdown.
pub struct MarkdownGenerator<'a> {
    report: &'a Report,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a new Markdown generator for the given report.
    #[must_use]
    pub const fn new(report: &'a Report) -> Self {
        Self { report }
    }

    /// Generates the complete Markdown report, ending with a timestamped footer.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();

        self.write_title(&mut output);
        self.write_summary(&mut output);
        self.write_topics(&mut output);
        self.write_topic_details(&mut output);
        self.write_content(&mut output);
        self.write_templates(&mut output);
        self.write_recommendations(&mut output);
        Self::write_footer(&mut output);

        output
    }

    fn write_title(&self, output: &mut String) {
        let _ = writeln!(
            output,
            "# Lesson Generation Report: {}\n",
            escape_markdown(&self.report.title)
        );
    }

    fn write_summary(&self, output: &mut String) {
        let summary = &self.report.summary;
        let counts = self.report.topic_counts();

        let _ = writeln!(output, "## Summary\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| Status | {} |", summary.status.description());
        let _ = writeln!(
            output,
            "| Topics | {} ({} completed, {} failed) |",
            counts.total(),
            counts.completed,
            counts.failed
        );
        let _ = writeln!(output, "| Modules per Topic | {} |", summary.modules_per_topic);
        let _ = writeln!(output, "| Files Written | {} |", summary.files_written);
        let _ = writeln!(
            output,
            "| Average Quality | {} |",
            format_score(self.report.average_quality())
        );
        let _ = writeln!(
            output,
            "| Duration | {} |",
            format_duration(summary.duration_seconds)
        );
        let _ = writeln!(output, "| Provider | {} |", escape_markdown(&summary.provider));
        let _ = writeln!(output, "| Output | {} |", escape_markdown(&summary.output_root));
        let _ = writeln!(output);
    }

    fn write_topics(&self, output: &mut String) {
        let _ = writeln!(output, "## Topics\n");

        if self.report.topics.is_empty() {
            let _ = writeln!(output, "No topics were requested.\n");
            return;
        }

        let _ = writeln!(
            output,
            "| Topic | Directory | Status | Modules | Files | Quality |"
        );
        let _ = writeln!(
            output,
            "|-------|-----------|--------|---------|-------|---------|"
        );
        for topic in &self.report.topics {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} | {} |",
                escape_markdown(&topic.name),
                escape_markdown(&topic.slug),
                topic.status,
                topic.modules,
                topic.files_written,
                format_score(topic.quality.as_ref().map(|q| q.score)),
            );
        }
        let _ = writeln!(output);
    }

    fn write_topic_details(&self, output: &mut String) {
        for topic in &self.report.topics {
            Self::write_topic_detail(output, topic);
        }
    }

    fn write_topic_detail(output: &mut String, topic: &TopicReport) {
        let has_factors = topic.quality.as_ref().is_some_and(|q| !q.factors.is_empty());
        let has_issues = topic.quality.as_ref().is_some_and(|q| !q.issues.is_empty());
        if topic.error.is_none() && !has_factors && !has_issues {
            return;
        }

        let _ = writeln!(output, "### {}\n", escape_markdown(&topic.name));

        if let Some(error) = &topic.error {
            let _ = writeln!(output, "**Error**: {}\n", escape_markdown(error));
        }

        let Some(quality) = &topic.quality else {
            return;
        };

        if has_factors {
            let _ = writeln!(output, "| Factor | Score |");
            let _ = writeln!(output, "|--------|-------|");
            for (name, value) in &quality.factors {
                let _ = writeln!(output, "| {} | {value:.2} |", escape_markdown(name));
            }
            let _ = writeln!(output);
        }

        if has_issues {
            let _ = writeln!(output, "**Issues**:\n");
            for issue in quality.issues.iter().take(MAX_ISSUES_PER_TOPIC) {
                let _ = writeln!(output, "- {}", escape_markdown(issue));
            }
            let hidden = quality.issues.len().saturating_sub(MAX_ISSUES_PER_TOPIC);
            if hidden > 0 {
                let _ = writeln!(output, "- ...and {hidden} more");
            }
            let _ = writeln!(output);
        }
    }

    fn write_content(&self, output: &mut String) {
        let content = &self.report.content;

        let _ = writeln!(output, "## Content\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| AI Calls | {} |", content.ai_calls);
        let _ = writeln!(output, "| Cache Hits | {} |", content.cache_hits);
        let _ = writeln!(output, "| Fallbacks | {} |", content.fallbacks);
        let _ = writeln!(
            output,
            "| Cache Efficiency | {:.1}% |",
            content.cache_efficiency() * 100.0
        );
        let _ = writeln!(output);
    }

    fn write_templates(&self, output: &mut String) {
        if self.report.templates.is_empty() {
            return;
        }

        let _ = writeln!(output, "## Templates\n");
        let _ = writeln!(output, "| Slot | Source |");
        let _ = writeln!(output, "|------|--------|");
        for (slot, source) in &self.report.templates {
            let _ = writeln!(
                output,
                "| {} | {} |",
                escape_markdown(slot),
                escape_markdown(source)
            );
        }
        let _ = writeln!(output);
    }

    fn write_recommendations(&self, output: &mut String) {
        let _ = writeln!(output, "## Recommendations\n");

        if self.report.recommendations.is_empty() {
            let _ = writeln!(output, "No recommendations.\n");
            return;
        }

        for (i, rec) in self.report.recommendations.iter().enumerate() {
            write_recommendation(output, i + 1, rec);
        }
        let _ = writeln!(output);
    }

    fn write_footer(output: &mut String) {
        let _ = writeln!(output, "---");
        let timestamp = format_timestamp(&Utc::now());
        let _ = writeln!(output, "*Generated by lessongen at {timestamp}*");
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn write_recommendation(output: &mut String, number: usize, rec: &Recommendation) {
    let _ = writeln!(
        output,
        "{number}. **[{}]** {}",
        escape_markdown(&rec.category),
        escape_markdown(&rec.description)
    );
}

/// Formats a duration in seconds, e.g. 65 -> "1m 5s", 3661 -> "1h 1m 1s".
fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::new();

    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if secs > 0 || parts.is_empty() {
        parts.push(format!("{secs}s"));
    }

    parts.join(" ")
}

/// Format: "YYYY-MM-DD HH:MM:SS UTC"
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn format_score(score: Option<f64>) -> String {
    score.map_or_else(|| "n/a".to_string(), |s| format!("{s:.2}"))
}

/// Escapes Markdown control characters so user text renders literally.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '(' | ')' | '!' | '\\' | '<' | '>' | '|' => {
                result.push('\\');
                result.push(ch);
            }
            // Table cells cannot hold raw newlines
            '\n' => result.push_str("<br>"),
            _ => result.push(ch),
        }
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
