//! Write-once output files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::{LessonError, Result};

/// What a generated file is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Markdown prose.
    Markdown,
    /// Python source.
    Source,
    /// Project configuration.
    Config,
    /// Python tests.
    Test,
}

/// A file produced by generation, not yet written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifact {
    /// Path relative to the writer's root.
    pub relative_path: PathBuf,
    /// File content.
    pub content: String,
    /// Kind of file.
    pub kind: ArtifactKind,
}

impl GeneratedArtifact {
    /// Creates an artifact.
    #[must_use]
    pub fn new(relative_path: impl Into<PathBuf>, content: impl Into<String>, kind: ArtifactKind) -> Self {
        Self {
            relative_path: relative_path.into(),
            content: content.into(),
            kind,
        }
    }
}

/// Writes artifacts below a root directory, each path at most once.
///
/// Files are opened with create-new semantics, so an existing file on disk
/// is reported as a collision rather than replaced.
#[derive(Debug)]
pub struct ArtifactWriter {
    root: PathBuf,
    written: HashSet<PathBuf>,
    bytes_written: u64,
}

impl ArtifactWriter {
    /// Creates a writer rooted at `root`. Nothing is touched on disk yet.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            written: HashSet::new(),
            bytes_written: 0,
        }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of files written.
    #[must_use]
    pub fn count(&self) -> usize {
        self.written.len()
    }

    /// Total bytes written.
    #[must_use]
    pub const fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Writes one artifact and returns its absolute path.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactCollision` if the path was already written in this
    /// run or exists on disk, and `WriteError` for any other I/O failure.
    pub async fn write(&mut self, artifact: &GeneratedArtifact) -> Result<PathBuf> {
        let path = self.root.join(&artifact.relative_path);
        if self.written.contains(&artifact.relative_path) {
            return Err(LessonError::artifact_collision(path));
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LessonError::write(parent, e.to_string()))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    LessonError::artifact_collision(&path)
                } else {
                    LessonError::write(&path, e.to_string())
                }
            })?;

        file.write_all(artifact.content.as_bytes())
            .await
            .map_err(|e| LessonError::write(&path, e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| LessonError::write(&path, e.to_string()))?;

        self.written.insert(artifact.relative_path.clone());
        self.bytes_written += artifact.content.len() as u64;
        Ok(path)
    }
}
