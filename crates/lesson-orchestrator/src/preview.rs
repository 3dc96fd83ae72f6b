//! Previews and download archives of completed jobs.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::content::ContentStats;
use crate::error::{LessonError, Result};
use crate::job::{Job, JobStatus};
use crate::request::Difficulty;

/// README text beyond this many characters is cut from previews.
pub const README_PREVIEW_CHARS: usize = 2000;

/// Name of the summary entry added to archives.
pub const SUMMARY_FILE: &str = "generation_summary.json";

/// One file in a preview listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewFile {
    /// Path relative to the job's output root, `/`-separated.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Extension without the dot, empty when there is none.
    pub extension: String,
}

/// Files of one module directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleManifest {
    /// Topic slug.
    pub topic: String,
    /// Module directory name.
    pub module: String,
    /// File names, sorted.
    pub files: Vec<String>,
}

/// Read-only view of a completed job's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonPreview {
    /// Job identifier.
    pub lesson_id: String,
    /// Every generated file.
    pub files: Vec<PreviewFile>,
    /// README of the first generated topic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
    /// Whether `readme` was shortened.
    pub readme_truncated: bool,
    /// Module directories and their files.
    pub modules: Vec<ModuleManifest>,
}

/// Metadata stored alongside the lesson files in an archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSummary {
    /// Job identifier.
    pub lesson_id: String,
    /// Requested topics.
    pub topics: Vec<String>,
    /// Requested difficulty.
    pub difficulty: Difficulty,
    /// Modules per topic.
    pub modules: u32,
    /// Whether AI content was requested.
    pub ai: bool,
    /// Final job status.
    pub status: JobStatus,
    /// Topic directories in the archive.
    pub generated_topics: Vec<String>,
    /// Content statistics.
    pub content: ContentStats,
    /// Quality score per generated topic slug.
    pub quality: Vec<(String, f64)>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

fn require_completed(job: &Job) -> Result<()> {
    if job.status == JobStatus::Completed {
        Ok(())
    } else {
        Err(LessonError::job_not_completed(&job.id, job.status))
    }
}

fn generated_paths(job: &Job) -> &[PathBuf] {
    job.result
        .as_ref()
        .map_or(&[], |result| result.generated_paths.as_slice())
}

/// Regular files below `dir`, depth first, sorted by name. Symlinks are
/// not followed.
fn walk(dir: &Path) -> std::result::Result<Vec<PathBuf>, walkdir::Error> {
    WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) if entry.file_type().is_file() => Some(Ok(entry.into_path())),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })
        .collect()
}

fn relative_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn truncate_chars(text: &str, max: usize) -> (String, bool) {
    match text.char_indices().nth(max) {
        Some((cut, _)) => (text[..cut].to_string(), true),
        None => (text.to_string(), false),
    }
}

/// Builds the preview of a completed job.
pub fn build_preview(job: &Job) -> Result<LessonPreview> {
    require_completed(job)?;

    let mut files = Vec::new();
    let mut modules = Vec::new();
    let mut readme = None;
    let mut readme_truncated = false;

    for topic_root in generated_paths(job) {
        let found = walk(topic_root)
            .map_err(|e| LessonError::lesson_unreadable(topic_root, e.to_string()))?;

        for path in &found {
            let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            files.push(PreviewFile {
                path: relative_name(&job.output_root, path),
                size,
                extension: path
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            });
        }

        let topic = topic_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut module_dirs: Vec<_> = std::fs::read_dir(topic_root)
            .map_err(|e| LessonError::lesson_unreadable(topic_root, e.to_string()))?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_dir()
                    && path
                        .file_name()
                        .is_some_and(|n| n.to_string_lossy().starts_with("module_"))
            })
            .collect();
        module_dirs.sort();

        for dir in module_dirs {
            let mut names: Vec<String> = found
                .iter()
                .filter(|path| path.parent() == Some(dir.as_path()))
                .filter_map(|path| path.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect();
            names.sort();
            modules.push(ModuleManifest {
                topic: topic.clone(),
                module: relative_name(topic_root, &dir),
                files: names,
            });
        }

        if readme.is_none() {
            if let Ok(text) = std::fs::read_to_string(topic_root.join("README.md")) {
                let (text, truncated) = truncate_chars(&text, README_PREVIEW_CHARS);
                readme = Some(text);
                readme_truncated = truncated;
            }
        }
    }

    Ok(LessonPreview {
        lesson_id: job.id.clone(),
        files,
        readme,
        readme_truncated,
        modules,
    })
}

/// Summary written into archives.
#[must_use]
pub fn summarize(job: &Job) -> GenerationSummary {
    let outcome = job.result.as_ref().map(|result| &result.outcome);
    GenerationSummary {
        lesson_id: job.id.clone(),
        topics: job.topics.clone(),
        difficulty: job.request.difficulty,
        modules: job.request.modules,
        ai: job.request.ai,
        status: job.status,
        generated_topics: generated_paths(job)
            .iter()
            .map(|path| relative_name(&job.output_root, path))
            .collect(),
        content: outcome.map(|o| o.content).unwrap_or_default(),
        quality: outcome
            .map(|o| {
                o.completed()
                    .filter_map(|t| t.quality.as_ref().map(|q| (t.slug.clone(), q.score)))
                    .collect()
            })
            .unwrap_or_default(),
        created_at: job.created_at,
        finished_at: job.finished_at,
    }
}

/// Zips a completed job's generated topics plus `generation_summary.json`.
pub fn build_archive(job: &Job) -> Result<Vec<u8>> {
    require_completed(job)?;

    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for topic_root in generated_paths(job) {
        let files = walk(topic_root)
            .map_err(|e| LessonError::lesson_unreadable(topic_root, e.to_string()))?;
        for path in files {
            let bytes = std::fs::read(&path)?;
            zip.start_file(relative_name(&job.output_root, &path), options)
                .map_err(|e| LessonError::archive(e.to_string()))?;
            zip.write_all(&bytes)?;
        }
    }

    let summary = serde_json::to_vec_pretty(&summarize(job))?;
    zip.start_file(SUMMARY_FILE, options)
        .map_err(|e| LessonError::archive(e.to_string()))?;
    zip.write_all(&summary)?;

    let cursor = zip
        .finish()
        .map_err(|e| LessonError::archive(e.to_string()))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::job::JobResult;
    use crate::orchestrator::{Orchestrator, RunHooks};
    use crate::request::GenerationRequest;
    use std::io::Read as _;
    use tempfile::TempDir;

    async fn completed_job(dir: &TempDir) -> Job {
        let request = GenerationRequest::new(["Preview Topic"])
            .with_modules(2)
            .with_ai(false);
        let mut job = Job::new(request, dir.path().join("job"));
        let outcome = Orchestrator::new(Config::default())
            .run(&job.request, &job.output_root, &RunHooks::new())
            .await
            .unwrap();
        job.start().unwrap();
        job.complete(JobResult {
            generated_paths: outcome.generated_paths(),
            outcome,
        })
        .unwrap();
        job
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let (text, truncated) = truncate_chars("héllo", 2);
        assert_eq!(text, "hé");
        assert!(truncated);
        let (text, truncated) = truncate_chars("hi", 2);
        assert_eq!(text, "hi");
        assert!(!truncated);
    }

    #[tokio::test]
    async fn test_preview_lists_files_and_modules() {
        let dir = TempDir::new().unwrap();
        let job = completed_job(&dir).await;
        let preview = build_preview(&job).unwrap();

        assert_eq!(preview.files.len(), 2 * 8 + 6);
        assert!(preview
            .files
            .iter()
            .any(|f| f.path == "preview_topic/README.md" && f.extension == "md" && f.size > 0));
        assert_eq!(preview.modules.len(), 2);
        assert_eq!(preview.modules[0].topic, "preview_topic");
        assert_eq!(preview.modules[0].module, "module_01_preview_topic_fundamentals");
        assert_eq!(preview.modules[0].files.len(), 8);
        assert!(preview.readme.unwrap().starts_with("# Preview Topic"));
    }

    #[tokio::test]
    async fn test_archive_contains_summary() {
        let dir = TempDir::new().unwrap();
        let job = completed_job(&dir).await;
        let bytes = build_archive(&job).unwrap();

        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2 * 8 + 6 + 1);
        assert!(archive.by_name("preview_topic/pytest.ini").is_ok());

        let mut summary = String::new();
        archive
            .by_name(SUMMARY_FILE)
            .unwrap()
            .read_to_string(&mut summary)
            .unwrap();
        let summary: serde_json::Value = serde_json::from_str(&summary).unwrap();
        assert_eq!(summary["lessonId"], job.id.as_str());
        assert_eq!(summary["generatedTopics"][0], "preview_topic");
        assert_eq!(summary["status"], "completed");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_files_stay_out_of_archive() {
        let dir = TempDir::new().unwrap();
        let job = completed_job(&dir).await;
        let secret = dir.path().join("secret.txt");
        std::fs::write(&secret, "private").unwrap();
        let topic_root = job.output_root.join("preview_topic");
        std::os::unix::fs::symlink(&secret, topic_root.join("secret.txt")).unwrap();
        std::os::unix::fs::symlink(&topic_root, topic_root.join("again")).unwrap();

        let preview = build_preview(&job).unwrap();
        assert_eq!(preview.files.len(), 2 * 8 + 6);

        let bytes = build_archive(&job).unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2 * 8 + 6 + 1);
        assert!(archive.by_name("preview_topic/secret.txt").is_err());
    }

    #[test]
    fn test_requires_completed_job() {
        let job = Job::new(GenerationRequest::new(["x"]), PathBuf::from("/nowhere"));
        assert!(matches!(
            build_preview(&job),
            Err(LessonError::JobNotCompleted { .. })
        ));
        assert!(build_archive(&job).is_err());
    }
}
