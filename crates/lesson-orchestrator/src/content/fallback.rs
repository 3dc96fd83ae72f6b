//! Deterministic content.
//!
//! Output depends only on the request, so identical inputs always produce
//! identical bytes. Topic names are only ever embedded in comments,
//! docstrings and double-quoted strings, which topic name validation keeps
//! safe.

use std::fmt::Write as _;

use async_trait::async_trait;
use regex::Regex;

use super::{ContentProvider, ContentRequest, GeneratedContent};
use crate::error::Result;
use crate::request::{Module, ModuleType, Topic};
use crate::template::Slot;

/// Produces built-in content without any external calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackProvider;

#[async_trait]
impl ContentProvider for FallbackProvider {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn generate(&self, request: &ContentRequest<'_>) -> Result<GeneratedContent> {
        Ok(GeneratedContent::deterministic(Self::content_for(request)))
    }
}

impl FallbackProvider {
    /// Deterministic content for a request.
    #[must_use]
    pub fn content_for(request: &ContentRequest<'_>) -> String {
        let topic = request.topic;
        if request.slot.is_topic_slot() {
            return match request.slot {
                Slot::Readme => readme(topic),
                Slot::Requirements => REQUIREMENTS.to_string(),
                Slot::PytestIni => PYTEST_INI.to_string(),
                Slot::Makefile => MAKEFILE.to_string(),
                Slot::SetupCfg => setup_cfg(topic),
                _ => GITIGNORE.to_string(),
            };
        }

        let Some(module) = request.module.or_else(|| topic.modules.first()) else {
            return format!("Content for {} in {}.\n", request.slot.label(), topic.name);
        };

        let class = topic.class_name();
        match request.slot {
            Slot::LearningPath => learning_path(topic, module),
            Slot::StarterExample => starter_example(topic, module, &class),
            Slot::TestStarterExample => {
                test_starter_example(module, &subject_class(request, &format!("{class}Example")))
            }
            Slot::AssignmentA => assignment_a(module, &class),
            Slot::TestAssignmentA => {
                test_assignment_a(module, &subject_class(request, &format!("{class}Assignment")))
            }
            Slot::AssignmentB => assignment_b(module, &class),
            Slot::TestAssignmentB => test_assignment_b(
                module,
                &subject_class(request, &format!("{class}Implementation")),
            ),
            _ => extra_exercises(topic, module),
        }
    }
}

/// First class defined in the code under test, or `default`.
fn subject_class(request: &ContentRequest<'_>, default: &str) -> String {
    let Ok(re) = Regex::new(r"(?m)^class\s+([A-Za-z_][A-Za-z0-9_]*)") else {
        return default.to_string();
    };
    request
        .subject_code
        .and_then(|code| re.captures(code))
        .map_or_else(|| default.to_string(), |caps| caps[1].to_string())
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn readme(topic: &Topic) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}\n", topic.description);

    let _ = writeln!(out, "## Learning Objectives\n");
    let _ = writeln!(out, "{}\n", bullet_list(&topic.learning_objectives));

    let _ = writeln!(out, "## Prerequisites\n");
    if topic.prerequisites.is_empty() {
        let _ = writeln!(out, "None\n");
    } else {
        let _ = writeln!(out, "{}\n", bullet_list(&topic.prerequisites));
    }

    let _ = writeln!(out, "## Modules\n");
    for module in &topic.modules {
        let _ = writeln!(
            out,
            "{}. **{}** (`{}`): {}",
            module.index,
            module.name,
            module.dir_name(),
            module.focus_summary()
        );
    }

    let _ = writeln!(out, "\n## Getting Started\n");
    let _ = writeln!(out, "1. Create a virtual environment: `python -m venv venv`");
    let _ = writeln!(out, "2. Activate it: `source venv/bin/activate`");
    let _ = writeln!(out, "3. Install dependencies: `make install`");
    let _ = writeln!(out, "4. Run the tests: `make test`");
    let _ = writeln!(
        out,
        "5. Open `{}/learning_path.md` and follow the steps",
        topic
            .modules
            .first()
            .map_or_else(|| "module_01".to_string(), Module::dir_name)
    );

    let _ = writeln!(out, "\n## Estimated Time\n");
    let _ = writeln!(
        out,
        "This {} lesson takes approximately {} hours to complete.",
        topic.difficulty, topic.estimated_hours
    );
    out
}

const REQUIREMENTS: &str = "pytest>=7.0.0
pytest-cov>=4.0.0
pylint>=2.17.0
black>=23.0.0
";

const PYTEST_INI: &str = "[pytest]
testpaths = .
python_files = test_*.py
python_classes = Test*
python_functions = test_*
addopts = --tb=short
";

const MAKEFILE: &str = "# Makefile for this lesson

.PHONY: install test coverage lint format clean

install:
\tpip install -r requirements.txt

test:
\tpytest

coverage:
\tpytest --cov=. --cov-report=term-missing

lint:
\tpylint --recursive=y .

format:
\tblack .

clean:
\tfind . -type d -name \"__pycache__\" -prune -exec rm -rf {} +
\tfind . -type f -name \"*.pyc\" -delete
\trm -rf .pytest_cache .coverage htmlcov
";

fn setup_cfg(topic: &Topic) -> String {
    format!(
        "[metadata]
name = {slug}
description = {description}

[pylint]
disable = missing-docstring,too-few-public-methods

[coverage:run]
source = .
omit = test_*

[coverage:report]
exclude_lines =
    pragma: no cover
    raise NotImplementedError
",
        slug = topic.slug,
        description = topic.description,
    )
}

const GITIGNORE: &str = "# Python
__pycache__/
*.py[cod]
*.egg-info/
build/
dist/
venv/
.venv/

# Testing
.pytest_cache/
.coverage
htmlcov/

# Editors
.vscode/
.idea/
*.swp

# OS
.DS_Store
Thumbs.db
";

fn learning_path(topic: &Topic, module: &Module) -> String {
    let mut out = String::new();

    let intro = match module.module_type {
        ModuleType::Fundamentals => "This module introduces the essential ideas",
        ModuleType::Implementation => "This module puts the ideas into practice",
        ModuleType::Assessment => "This module reviews what you have learned",
        ModuleType::Project => "This module brings everything together in a project",
    };
    let _ = writeln!(
        out,
        "{intro} of {}, focusing on {}.\n",
        topic.name.to_lowercase(),
        module.focus_summary()
    );

    let _ = writeln!(out, "## Learning Objectives\n");
    let _ = writeln!(out, "By the end of this module, you will be able to:\n");
    let _ = writeln!(out, "{}\n", bullet_list(&topic.learning_objectives));

    let _ = writeln!(out, "## Key Concepts\n");
    for area in &module.focus_areas {
        let _ = writeln!(
            out,
            "- **{area}**: a core part of {}",
            topic.name.to_lowercase()
        );
    }

    let steps = [
        (
            "Study the Starter Example",
            "starter_example.py",
            "Read the code, then run it with `python starter_example.py`.",
        ),
        (
            "Understand the Tests",
            "test_starter_example.py",
            "Run `python -m pytest test_starter_example.py -v` and read how each behaviour is checked.",
        ),
        (
            "Write Tests for Assignment A",
            "assignment_a.py",
            "Write tests in `test_assignment_a.py` until every branch of `assignment_a.py` is covered.",
        ),
        (
            "Implement Assignment B",
            "test_assignment_b.py",
            "Implement `assignment_b.py` until `python -m pytest test_assignment_b.py -v` passes.",
        ),
        (
            "Extra Practice",
            "extra_exercises.md",
            "Work through the additional exercises.",
        ),
    ];

    let _ = writeln!(out, "\n## Step-by-Step Learning Path\n");
    for (i, (title, file, action)) in steps.iter().enumerate() {
        let _ = writeln!(out, "### Step {}: {title}\n", i + 1);
        let _ = writeln!(out, "**File:** `{file}`\n");
        let _ = writeln!(out, "{action}\n");
    }

    let _ = writeln!(out, "## Success Criteria\n");
    let _ = writeln!(out, "- [ ] Ran and understood `starter_example.py`");
    let _ = writeln!(out, "- [ ] Achieved full test coverage for `assignment_a.py`");
    let _ = writeln!(out, "- [ ] Made all tests pass in `test_assignment_b.py`");
    let _ = writeln!(out, "- [ ] Completed the extra exercises\n");

    let _ = writeln!(
        out,
        "**Estimated Time:** {} minutes",
        topic.difficulty.module_minutes()
    );
    out
}

fn starter_example(topic: &Topic, module: &Module, class: &str) -> String {
    let first_focus = module
        .focus_areas
        .first()
        .map_or("the core concepts", String::as_str);
    format!(
        r#"# Starter example for {module_name}


class {class}Example:
    """Demonstrates {focus} in {topic}."""

    def __init__(self):
        self.data = {{}}

    def example_method(self, param):
        """Return a processed version of param."""
        return f"Processed: {{param}}"

    def store(self, key, value):
        """Remember a value under key and return the number of stored items."""
        self.data[key] = value
        return len(self.data)

    def demonstrate_concept(self):
        """Describe the main concept of this module."""
        return "Demonstrating {first_focus}"


if __name__ == "__main__":
    example = {class}Example()
    print(example.example_method("test"))
    print(example.demonstrate_concept())
"#,
        module_name = module.name,
        focus = module.focus_summary(),
        topic = topic.name.to_lowercase(),
    )
}

fn test_starter_example(module: &Module, class: &str) -> String {
    format!(
        r#"import pytest

from starter_example import {class}


class Test{class}:
    """Tests for the {module_name} starter example."""

    def setup_method(self):
        self.example = {class}()

    def test_example_method_processes_input(self):
        assert self.example.example_method("test") == "Processed: test"

    def test_store_counts_items(self):
        assert self.example.store("a", 1) == 1
        assert self.example.store("b", 2) == 2
        assert self.example.store("a", 3) == 2

    def test_demonstrate_concept_returns_text(self):
        assert isinstance(self.example.demonstrate_concept(), str)


if __name__ == "__main__":
    pytest.main([__file__, "-v"])
"#,
        module_name = module.name,
    )
}

fn assignment_a(module: &Module, class: &str) -> String {
    format!(
        r#"# Assignment A for {module_name}
# Write tests in test_assignment_a.py that cover every branch below.


class {class}Assignment:
    """Code to practise testing against."""

    def process_data(self, data):
        """Return data as upper-case text, or None when empty."""
        if not data:
            return None
        return str(data).upper()

    def calculate_result(self, a, b):
        """Add two numbers."""
        if not isinstance(a, (int, float)) or not isinstance(b, (int, float)):
            raise TypeError("Inputs must be numbers")
        return a + b

    def validate_input(self, value):
        """Return True for non-empty values."""
        return value is not None and len(str(value)) > 0
"#,
        module_name = module.name,
    )
}

fn test_assignment_a(module: &Module, class: &str) -> String {
    format!(
        r#"import pytest

from assignment_a import {class}


class Test{class}:
    """Your tests for {module_name}, assignment A."""

    def setup_method(self):
        self.assignment = {class}()

    def test_process_data_uppercases(self):
        assert self.assignment.process_data("abc") == "ABC"

    # Add tests for the remaining methods and their edge cases below.


if __name__ == "__main__":
    pytest.main([__file__, "-v"])
"#,
        module_name = module.name,
    )
}

fn assignment_b(module: &Module, class: &str) -> String {
    format!(
        r#"# Assignment B for {module_name}
# Implement the methods below until test_assignment_b.py passes.


class {class}Implementation:
    """Implementation to complete."""

    def __init__(self):
        self.items = []

    def required_method(self, param):
        """Return param as a non-empty string."""
        raise NotImplementedError("Implement this method")

    def helper_method(self, data):
        """Return data with surrounding whitespace removed."""
        raise NotImplementedError("Implement this method")
"#,
        module_name = module.name,
    )
}

fn test_assignment_b(module: &Module, class: &str) -> String {
    format!(
        r#"import pytest

from assignment_b import {class}


class Test{class}:
    """Tests your {module_name} implementation must pass."""

    def setup_method(self):
        self.implementation = {class}()

    def test_required_method_returns_text(self):
        result = self.implementation.required_method("test")
        assert isinstance(result, str)
        assert result

    def test_helper_method_strips_whitespace(self):
        assert self.implementation.helper_method("  data  ") == "data"


if __name__ == "__main__":
    pytest.main([__file__, "-v"])
"#,
        module_name = module.name,
    )
}

fn extra_exercises(topic: &Topic, module: &Module) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Practise {} in {}.\n",
        module.focus_summary(),
        topic.name.to_lowercase()
    );

    let exercises = [
        (
            "Basic Practice",
            "Apply the module concepts in a small script and write tests for it.",
        ),
        (
            "Intermediate Challenge",
            "Combine several concepts, handle edge cases and errors, and cover them with tests.",
        ),
        (
            "Advanced Application",
            "Solve a practical problem end to end, with documentation and tests.",
        ),
    ];
    for (i, (title, task)) in exercises.iter().enumerate() {
        let _ = writeln!(out, "## Exercise {}: {title}\n", i + 1);
        let _ = writeln!(out, "{task}\n");
    }

    let _ = writeln!(out, "## Testing Your Solutions\n");
    let _ = writeln!(out, "```bash\npytest -v\n```");
    out
}
