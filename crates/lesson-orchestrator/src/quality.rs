//! Quality scoring of a generated lesson tree.
//!
//! The score is a weighted mean of three factors:
//!
//! | Factor         | Weight | Meaning                                            |
//! |----------------|--------|----------------------------------------------------|
//! | `syntax`       | 0.4    | fraction of `.py` files passing the syntax check   |
//! | `structure`    | 0.3    | README, requirements, pytest.ini, tests per module |
//! | `completeness` | 0.3    | fraction of the expected file matrix present       |

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{LessonError, Result};
use crate::python;
use crate::template::Slot;

const SYNTAX_WEIGHT: f64 = 0.4;
const STRUCTURE_WEIGHT: f64 = 0.3;
const COMPLETENESS_WEIGHT: f64 = 0.3;

/// Result of scoring a lesson. Immutable once computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Overall score in `[0.0, 1.0]`.
    pub score: f64,
    /// Sub-scores keyed by factor name.
    pub factors: BTreeMap<String, f64>,
    /// Problems found, one per line.
    pub issues: Vec<String>,
    /// File and line counts.
    pub metrics: BTreeMap<String, u64>,
}

impl QualityReport {
    /// Returns `true` if the score reaches `threshold`.
    #[must_use]
    pub fn passes(&self, threshold: f64) -> bool {
        self.score >= threshold
    }

    /// Looks up one factor, zero when absent.
    #[must_use]
    pub fn factor(&self, name: &str) -> f64 {
        self.factors.get(name).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Default)]
struct Inventory {
    /// Paths relative to the lesson root.
    files: Vec<PathBuf>,
    module_dirs: Vec<PathBuf>,
    /// Entries below the root that could not be read.
    unreadable: Vec<String>,
}

/// Walks the lesson tree without following symlinks.
///
/// Only a failure on the root itself is an error; unreadable entries deeper
/// down are recorded in the inventory.
fn collect(root: &Path) -> std::result::Result<Inventory, walkdir::Error> {
    let mut inventory = Inventory::default();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(e),
            Err(e) => {
                let path = e.path().unwrap_or(root);
                let relative = path.strip_prefix(root).unwrap_or(path);
                inventory
                    .unreadable
                    .push(format!("{}: unreadable ({e})", relative.display()));
                continue;
            }
        };

        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();
        let file_type = entry.file_type();
        if file_type.is_dir() {
            if entry.depth() == 1
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|n| n.starts_with("module_"))
            {
                inventory.module_dirs.push(relative);
            }
        } else if file_type.is_file() {
            inventory.files.push(relative);
        }
    }
    Ok(inventory)
}

fn is_python(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "py")
}

fn is_test_file(path: &Path) -> bool {
    is_python(path)
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("test_"))
}

/// Scores the lesson rooted at `root`.
///
/// `expected_modules` sizes the completeness matrix; it defaults to the
/// number of `module_*` directories found.
///
/// # Errors
///
/// Only an unreadable root is an error. Missing or broken files lower the
/// score instead.
pub fn score_lesson(root: &Path, expected_modules: Option<usize>) -> Result<QualityReport> {
    if !root.is_dir() {
        return Err(LessonError::lesson_unreadable(root, "not a directory"));
    }

    let mut inventory =
        collect(root).map_err(|e| LessonError::lesson_unreadable(root, e.to_string()))?;

    let mut issues = std::mem::take(&mut inventory.unreadable);
    let mut metrics = BTreeMap::new();

    // Syntax
    let mut python_files = 0_u64;
    let mut valid_python = 0_u64;
    let mut total_lines = 0_u64;
    for relative in &inventory.files {
        let Ok(content) = std::fs::read_to_string(root.join(relative)) else {
            issues.push(format!("{}: unreadable", relative.display()));
            continue;
        };
        total_lines += content.lines().count() as u64;

        if is_python(relative) {
            python_files += 1;
            match python::check_syntax(&content) {
                Ok(()) => valid_python += 1,
                Err(issue) => issues.push(format!("{}: {issue}", relative.display())),
            }
        }
    }
    let syntax = if python_files == 0 {
        issues.push("no Python files found".to_string());
        0.0
    } else {
        ratio(valid_python, python_files)
    };

    // Structure
    let mut checklist = Vec::with_capacity(4);
    for file in ["README.md", "requirements.txt", "pytest.ini"] {
        let present = root.join(file).is_file();
        if !present {
            issues.push(format!("missing {file}"));
        }
        checklist.push(present);
    }
    let modules_tested = !inventory.module_dirs.is_empty()
        && inventory.module_dirs.iter().all(|module| {
            let has_tests = inventory
                .files
                .iter()
                .any(|f| f.parent() == Some(module.as_path()) && is_test_file(f));
            if !has_tests {
                issues.push(format!("{} has no test file", module.display()));
            }
            has_tests
        });
    if inventory.module_dirs.is_empty() {
        issues.push("no module directories found".to_string());
    }
    checklist.push(modules_tested);
    let structure = ratio(
        checklist.iter().filter(|ok| **ok).count() as u64,
        checklist.len() as u64,
    );

    // Completeness
    let expected_modules = expected_modules.unwrap_or(inventory.module_dirs.len());
    let expected_files = Slot::MODULE_SLOTS.len() * expected_modules + Slot::TOPIC_SLOTS.len();
    let topic_present = Slot::TOPIC_SLOTS
        .iter()
        .filter(|slot| root.join(slot.file_name()).is_file())
        .count();
    let module_present: usize = inventory
        .module_dirs
        .iter()
        .take(expected_modules)
        .map(|module| {
            Slot::MODULE_SLOTS
                .iter()
                .filter(|slot| root.join(module).join(slot.file_name()).is_file())
                .count()
        })
        .sum();
    let present = topic_present + module_present;
    if present < expected_files {
        issues.push(format!(
            "{} of {expected_files} expected files missing",
            expected_files - present
        ));
    }
    let completeness = ratio(present as u64, expected_files as u64);

    let score = COMPLETENESS_WEIGHT
        .mul_add(
            completeness,
            SYNTAX_WEIGHT.mul_add(syntax, STRUCTURE_WEIGHT * structure),
        )
        .clamp(0.0, 1.0);

    let test_files = inventory.files.iter().filter(|f| is_test_file(f)).count() as u64;
    let markdown_files = inventory
        .files
        .iter()
        .filter(|f| f.extension().is_some_and(|ext| ext == "md"))
        .count() as u64;
    metrics.insert("total_files".to_string(), inventory.files.len() as u64);
    metrics.insert("python_files".to_string(), python_files);
    metrics.insert("test_files".to_string(), test_files);
    metrics.insert("markdown_files".to_string(), markdown_files);
    metrics.insert("total_lines".to_string(), total_lines);
    metrics.insert(
        "module_count".to_string(),
        inventory.module_dirs.len() as u64,
    );

    let factors = BTreeMap::from([
        ("syntax".to_string(), syntax),
        ("structure".to_string(), structure),
        ("completeness".to_string(), completeness),
    ]);

    Ok(QualityReport {
        score,
        factors,
        issues,
        metrics,
    })
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn write_complete_lesson(root: &Path, modules: usize) {
        for slot in Slot::TOPIC_SLOTS {
            std::fs::write(root.join(slot.file_name()), "content\n").unwrap();
        }
        for i in 1..=modules {
            let dir = root.join(format!("module_{i:02}_m{i}"));
            std::fs::create_dir_all(&dir).unwrap();
            for slot in Slot::MODULE_SLOTS {
                let body = if slot.is_code() {
                    "def f():\n    return 1\n"
                } else {
                    "# Heading\n"
                };
                std::fs::write(dir.join(slot.file_name()), body).unwrap();
            }
        }
    }

    #[test]
    fn test_complete_lesson_scores_one() {
        let dir = tempfile::tempdir().unwrap();
        write_complete_lesson(dir.path(), 2);

        let report = score_lesson(dir.path(), Some(2)).unwrap();
        assert!((report.score - 1.0).abs() < 1e-9, "score was {}", report.score);
        assert!(report.issues.is_empty(), "issues: {:?}", report.issues);
        assert_eq!(report.metrics["module_count"], 2);
        assert_eq!(report.metrics["python_files"], 12);
        assert_eq!(report.metrics["test_files"], 6);
        assert_eq!(report.metrics["markdown_files"], 5);
        assert_eq!(report.metrics["total_files"], 22);
    }

    #[test]
    fn test_empty_directory_scores_zero() {
        let dir = tempfile::tempdir().unwrap();
        let report = score_lesson(dir.path(), None).unwrap();

        assert!(report.score.abs() < 1e-9);
        assert!((0.0..=1.0).contains(&report.score));
        assert!(!report.issues.is_empty());
    }

    #[test]
    fn test_broken_python_lowers_syntax() {
        let dir = tempfile::tempdir().unwrap();
        write_complete_lesson(dir.path(), 1);
        std::fs::write(
            dir.path().join("module_01_m1/assignment_a.py"),
            "def broken(:\n",
        )
        .unwrap();

        let report = score_lesson(dir.path(), None).unwrap();
        let syntax = report.factor("syntax");
        assert!((syntax - 5.0 / 6.0).abs() < 1e-9, "syntax was {syntax}");
        assert!(report.issues.iter().any(|i| i.contains("assignment_a.py")));
        assert!(report.score < 1.0);
    }

    #[test]
    fn test_missing_expected_modules_lowers_completeness() {
        let dir = tempfile::tempdir().unwrap();
        write_complete_lesson(dir.path(), 1);

        let report = score_lesson(dir.path(), Some(3)).unwrap();
        let completeness = report.factor("completeness");
        assert!((completeness - 14.0 / 30.0).abs() < 1e-9);
        assert!((report.factor("structure") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_module_without_tests_fails_structure_item() {
        let dir = tempfile::tempdir().unwrap();
        write_complete_lesson(dir.path(), 1);
        for slot in Slot::MODULE_SLOTS.iter().filter(|s| s.subject().is_some()) {
            std::fs::remove_file(dir.path().join("module_01_m1").join(slot.file_name())).unwrap();
        }

        let report = score_lesson(dir.path(), None).unwrap();
        assert!((report.factor("structure") - 0.75).abs() < 1e-9);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        write_complete_lesson(dir.path(), 1);
        let module = dir.path().join("module_01_m1");
        std::os::unix::fs::symlink(dir.path(), module.join("loop")).unwrap();
        let alias = dir.path().join("alias.py");
        std::os::unix::fs::symlink(module.join("starter_example.py"), alias).unwrap();

        let report = score_lesson(dir.path(), Some(1)).unwrap();
        assert_eq!(report.metrics["total_files"], 14);
        assert_eq!(report.metrics["module_count"], 1);
        assert!((report.score - 1.0).abs() < 1e-9, "score was {}", report.score);
    }

    #[test]
    fn test_missing_root_is_error() {
        let err = score_lesson(Path::new("/no/such/lesson"), None).unwrap_err();
        assert!(matches!(err, LessonError::LessonUnreadable { .. }));
    }
}
