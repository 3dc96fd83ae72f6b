//! Template extraction from an existing lesson.
//!
//! The reference lesson's topic name, module name and first class name are
//! replaced by placeholders so its structure can be reused for other topics.
//! Extraction is best effort: anything unreadable or unstructured simply
//! yields no candidate for that slot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::python::cached_regex;
use crate::template::Slot;

/// Names found in the reference lesson, replaced by placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ReferenceNames {
    topic: Option<String>,
    module: Option<String>,
    class: Option<String>,
}

impl ReferenceNames {
    /// Replaces every known name with its placeholder, longest first so that
    /// a module name containing the topic name is matched whole.
    fn placeholderize(&self, text: &str) -> String {
        let mut replacements: Vec<(&str, &str)> = [
            (self.topic.as_deref(), "{{ topic.name }}"),
            (self.module.as_deref(), "{{ module.name }}"),
            (self.class.as_deref(), "{{ class_name }}"),
        ]
        .into_iter()
        .filter_map(|(name, placeholder)| {
            name.filter(|n| !n.trim().is_empty())
                .map(|n| (n, placeholder))
        })
        .collect();
        replacements.sort_by_key(|(name, _)| std::cmp::Reverse(name.len()));

        // Two passes through unique markers so a placeholder is never
        // rewritten by a later, shorter replacement.
        let mut out = text.to_string();
        for (i, (name, _)) in replacements.iter().enumerate() {
            out = out.replace(name, &format!("\u{0}{i}\u{0}"));
        }
        for (i, (_, placeholder)) in replacements.iter().enumerate() {
            out = out.replace(&format!("\u{0}{i}\u{0}"), placeholder);
        }
        out
    }
}

/// Extracts template candidates from a reference lesson directory.
///
/// Sources are `README.md` and the config files at the root, plus the slot
/// files of the first `module_*` directory in lexicographic order.
pub fn extract_templates(reference_dir: &Path) -> HashMap<Slot, String> {
    let mut templates = HashMap::new();

    if !reference_dir.is_dir() {
        warn!(
            path = %reference_dir.display(),
            "Reference lesson not found, skipping template extraction"
        );
        return templates;
    }

    let module_dir = first_module_dir(reference_dir);
    let names = ReferenceNames {
        topic: read(&reference_dir.join("README.md")).and_then(|s| first_heading(&s)),
        module: module_dir
            .as_ref()
            .and_then(|dir| read(&dir.join(Slot::LearningPath.file_name())))
            .and_then(|s| first_heading(&s))
            .map(|h| module_name_from_heading(&h)),
        class: module_dir.as_ref().and_then(|dir| first_class_name(dir)),
    };
    debug!(?names, "Reference names inferred");

    for slot in Slot::ALL {
        let path = if slot.is_topic_slot() {
            reference_dir.join(slot.file_name())
        } else if let Some(dir) = &module_dir {
            dir.join(slot.file_name())
        } else {
            continue;
        };

        let Some(source) = read(&path) else {
            continue;
        };

        if let Some(template) = template_from_source(slot, &source, &names) {
            templates.insert(slot, template);
        } else {
            debug!(slot = %slot, path = %path.display(), "No usable structure in reference file");
        }
    }

    info!(
        path = %reference_dir.display(),
        templates = templates.len(),
        "Extracted templates from reference lesson"
    );
    templates
}

fn read(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }
    match std::fs::read_to_string(path) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Reference file unreadable");
            None
        }
    }
}

fn first_module_dir(root: &Path) -> Option<PathBuf> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %root.display(), error = %e, "Reference lesson unreadable");
            return None;
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("module_"))
        })
        .collect();
    dirs.sort();
    dirs.into_iter().next()
}

fn first_heading(markdown: &str) -> Option<String> {
    markdown
        .lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}

fn module_prefix_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached_regex(&RE, r"^Module\s+\d+\s*:\s*")
}

fn class_name_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached_regex(&RE, r"(?m)^\s*class\s+([A-Za-z_][A-Za-z0-9_]*)")
}

fn module_number_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached_regex(&RE, r"Module\s+\d+")
}

/// Strips a `Module N:` prefix and anything after ` - `.
fn module_name_from_heading(heading: &str) -> String {
    let without_prefix = module_prefix_re().map_or_else(
        || heading.to_string(),
        |re| re.replace(heading, "").into_owned(),
    );
    without_prefix
        .split(" - ")
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn first_class_name(module_dir: &Path) -> Option<String> {
    let re = class_name_re()?;
    Slot::MODULE_SLOTS
        .into_iter()
        .filter(Slot::is_code)
        .filter_map(|slot| read(&module_dir.join(slot.file_name())))
        .find_map(|source| re.captures(&source).map(|caps| caps[1].to_string()))
}

fn template_from_source(slot: Slot, source: &str, names: &ReferenceNames) -> Option<String> {
    if slot.is_code() {
        let header = leading_header(source)?;
        return Some(format!("{}\n\n{{{{ content }}}}", names.placeholderize(&header)));
    }

    if slot.is_topic_slot() && slot != Slot::Readme {
        if source.trim().is_empty() {
            return None;
        }
        return Some(names.placeholderize(source));
    }

    let heading = source.lines().find(|line| line.starts_with('#'))?;
    let mut heading = names.placeholderize(heading.trim_end());
    if slot == Slot::LearningPath {
        if let Some(re) = module_number_re() {
            heading = re.replace(&heading, "Module {{ module.index }}").into_owned();
        }
    }
    Some(format!("{heading}\n\n{{{{ content }}}}"))
}

/// The module docstring or leading comment block of a Python file.
fn leading_header(source: &str) -> Option<String> {
    let trimmed = source.trim_start();

    for quote in ["\"\"\"", "'''"] {
        if let Some(rest) = trimmed.strip_prefix(quote) {
            let end = rest.find(quote)?;
            return Some(format!("{quote}{}{quote}", &rest[..end]));
        }
    }

    let comments: Vec<&str> = trimmed
        .lines()
        .take_while(|line| line.starts_with('#'))
        .collect();
    if comments.is_empty() {
        None
    } else {
        Some(comments.join("\n"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::template::{TemplateBody, TemplateContext};

    fn write_reference(root: &Path) {
        std::fs::write(
            root.join("README.md"),
            "# Data Science\n\nLearn Data Science.\n",
        )
        .unwrap();
        std::fs::write(root.join("requirements.txt"), "pytest>=7.0\n").unwrap();

        let module = root.join("module_01_data_science_fundamentals");
        std::fs::create_dir_all(&module).unwrap();
        std::fs::create_dir_all(root.join("module_02_later")).unwrap();
        std::fs::write(
            module.join("learning_path.md"),
            "# Module 1: Data Science Fundamentals - Getting Started\n\nBody\n",
        )
        .unwrap();
        std::fs::write(
            module.join("starter_example.py"),
            "\"\"\"Starter for Data Science Fundamentals.\n\nUses DataScienceExample.\n\"\"\"\n\nclass DataScienceExample:\n    pass\n",
        )
        .unwrap();
        std::fs::write(
            module.join("assignment_a.py"),
            "# Assignment for Data Science\n# Fill in the blanks\nimport os\n",
        )
        .unwrap();
        std::fs::write(module.join("assignment_b.py"), "x = 1\n").unwrap();
    }

    #[test]
    fn test_extracts_placeholdered_templates() {
        let root = tempfile::tempdir().unwrap();
        write_reference(root.path());

        let templates = extract_templates(root.path());

        assert_eq!(
            templates.get(&Slot::Readme).unwrap(),
            "# {{ topic.name }}\n\n{{ content }}"
        );
        assert_eq!(
            templates.get(&Slot::LearningPath).unwrap(),
            "# Module {{ module.index }}: {{ module.name }} - Getting Started\n\n{{ content }}"
        );
        assert_eq!(
            templates.get(&Slot::StarterExample).unwrap(),
            "\"\"\"Starter for {{ module.name }}.\n\nUses {{ class_name }}.\n\"\"\"\n\n{{ content }}"
        );
        assert_eq!(
            templates.get(&Slot::AssignmentA).unwrap(),
            "# Assignment for {{ topic.name }}\n# Fill in the blanks\n\n{{ content }}"
        );
        assert_eq!(templates.get(&Slot::Requirements).unwrap(), "pytest>=7.0\n");

        // No header, no candidate.
        assert!(!templates.contains_key(&Slot::AssignmentB));
        assert!(!templates.contains_key(&Slot::ExtraExercises));
    }

    #[test]
    fn test_extracted_templates_render_for_new_topic() {
        let root = tempfile::tempdir().unwrap();
        write_reference(root.path());
        let templates = extract_templates(root.path());

        let body = TemplateBody::parse("readme", &templates[&Slot::Readme]).unwrap();
        let context = TemplateContext::new()
            .with("topic.name", "Rust")
            .with("content", "Hello");
        assert_eq!(body.render(&context), "# Rust\n\nHello");
    }

    #[test]
    fn test_missing_reference_yields_nothing() {
        assert!(extract_templates(Path::new("/definitely/not/here")).is_empty());
    }

    #[test]
    fn test_patterns_compile_once() {
        for re in [module_prefix_re, class_name_re, module_number_re] {
            let first = re().unwrap();
            assert!(std::ptr::eq(first, re().unwrap()));
        }
    }

    #[test]
    fn test_module_name_from_heading() {
        assert_eq!(module_name_from_heading("Module 3: Loops - Basics"), "Loops");
        assert_eq!(module_name_from_heading("Loops"), "Loops");
    }

    #[test]
    fn test_placeholderize_prefers_longest_name() {
        let names = ReferenceNames {
            topic: Some("Python".to_string()),
            module: Some("Python Basics".to_string()),
            class: None,
        };
        assert_eq!(
            names.placeholderize("Python Basics and Python"),
            "{{ module.name }} and {{ topic.name }}"
        );
    }
}
