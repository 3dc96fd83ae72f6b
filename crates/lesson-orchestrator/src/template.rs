//! Content slots, the template language and template resolution.
//!
//! Every file the generator writes corresponds to a [`Slot`]. Each slot is
//! rendered through a [`Template`] chosen once per run by the
//! [`TemplateResolver`]: a custom `<slot_id>.tmpl` file wins over a template
//! extracted from a reference lesson, which wins over the built-in.
//!
//! Templates are literal text with `{{ path }}` or `{{ path | filter }}`
//! substitutions. Generated content is injected through `{{ content }}`.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::artifact::ArtifactKind;
use crate::error::{LessonError, Result};
use crate::extraction;
use crate::request::{Module, Topic};

/// File extension of custom template files.
pub const TEMPLATE_EXTENSION: &str = "tmpl";

// ============================================================================
// Slots
// ============================================================================

/// A named content role. One slot produces exactly one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    /// Module walkthrough (`learning_path.md`).
    LearningPath,
    /// Worked example (`starter_example.py`).
    StarterExample,
    /// Tests for the starter example.
    TestStarterExample,
    /// First assignment.
    AssignmentA,
    /// Tests for the first assignment.
    TestAssignmentA,
    /// Second assignment.
    AssignmentB,
    /// Tests for the second assignment.
    TestAssignmentB,
    /// Additional practice (`extra_exercises.md`).
    ExtraExercises,
    /// Topic `README.md`.
    Readme,
    /// Topic `requirements.txt`.
    Requirements,
    /// Topic `pytest.ini`.
    PytestIni,
    /// Topic `Makefile`.
    Makefile,
    /// Topic `setup.cfg`.
    SetupCfg,
    /// Topic `.gitignore`.
    Gitignore,
}

impl Slot {
    /// Module slots in generation order.
    pub const MODULE_SLOTS: [Self; 8] = [
        Self::LearningPath,
        Self::StarterExample,
        Self::TestStarterExample,
        Self::AssignmentA,
        Self::TestAssignmentA,
        Self::AssignmentB,
        Self::TestAssignmentB,
        Self::ExtraExercises,
    ];

    /// Topic-level slots in generation order.
    pub const TOPIC_SLOTS: [Self; 6] = [
        Self::Readme,
        Self::Requirements,
        Self::PytestIni,
        Self::Makefile,
        Self::SetupCfg,
        Self::Gitignore,
    ];

    /// Every slot.
    pub const ALL: [Self; 14] = [
        Self::LearningPath,
        Self::StarterExample,
        Self::TestStarterExample,
        Self::AssignmentA,
        Self::TestAssignmentA,
        Self::AssignmentB,
        Self::TestAssignmentB,
        Self::ExtraExercises,
        Self::Readme,
        Self::Requirements,
        Self::PytestIni,
        Self::Makefile,
        Self::SetupCfg,
        Self::Gitignore,
    ];

    /// Stable identifier, also the custom template file stem.
    ///
    /// # Examples
    ///
    /// ```
    /// use lesson_orchestrator::Slot;
    ///
    /// assert_eq!(Slot::TestAssignmentA.id(), "test_assignment_a");
    /// assert_eq!(Slot::PytestIni.id(), "pytest_ini");
    /// ```
    #[must_use]
    pub const fn id(&self) -> &'static str {
        match self {
            Self::LearningPath => "learning_path",
            Self::StarterExample => "starter_example",
            Self::TestStarterExample => "test_starter_example",
            Self::AssignmentA => "assignment_a",
            Self::TestAssignmentA => "test_assignment_a",
            Self::AssignmentB => "assignment_b",
            Self::TestAssignmentB => "test_assignment_b",
            Self::ExtraExercises => "extra_exercises",
            Self::Readme => "readme",
            Self::Requirements => "requirements",
            Self::PytestIni => "pytest_ini",
            Self::Makefile => "makefile",
            Self::SetupCfg => "setup_cfg",
            Self::Gitignore => "gitignore",
        }
    }

    /// File name written for this slot.
    #[must_use]
    pub const fn file_name(&self) -> &'static str {
        match self {
            Self::LearningPath => "learning_path.md",
            Self::StarterExample => "starter_example.py",
            Self::TestStarterExample => "test_starter_example.py",
            Self::AssignmentA => "assignment_a.py",
            Self::TestAssignmentA => "test_assignment_a.py",
            Self::AssignmentB => "assignment_b.py",
            Self::TestAssignmentB => "test_assignment_b.py",
            Self::ExtraExercises => "extra_exercises.md",
            Self::Readme => "README.md",
            Self::Requirements => "requirements.txt",
            Self::PytestIni => "pytest.ini",
            Self::Makefile => "Makefile",
            Self::SetupCfg => "setup.cfg",
            Self::Gitignore => ".gitignore",
        }
    }

    /// Looks a slot up by its file name.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|slot| slot.file_name() == name)
    }

    /// Kind of artifact this slot produces.
    #[must_use]
    pub const fn kind(&self) -> ArtifactKind {
        match self {
            Self::LearningPath | Self::ExtraExercises | Self::Readme => ArtifactKind::Markdown,
            Self::StarterExample | Self::AssignmentA | Self::AssignmentB => ArtifactKind::Source,
            Self::TestStarterExample | Self::TestAssignmentA | Self::TestAssignmentB => {
                ArtifactKind::Test
            }
            Self::Requirements
            | Self::PytestIni
            | Self::Makefile
            | Self::SetupCfg
            | Self::Gitignore => ArtifactKind::Config,
        }
    }

    /// Returns `true` for slots written inside module directories.
    #[must_use]
    pub const fn is_module_slot(&self) -> bool {
        !self.is_topic_slot()
    }

    /// Returns `true` for slots written at the topic root.
    #[must_use]
    pub const fn is_topic_slot(&self) -> bool {
        matches!(
            self,
            Self::Readme
                | Self::Requirements
                | Self::PytestIni
                | Self::Makefile
                | Self::SetupCfg
                | Self::Gitignore
        )
    }

    /// Returns `true` if the slot holds Python code.
    #[must_use]
    pub const fn is_code(&self) -> bool {
        matches!(self.kind(), ArtifactKind::Source | ArtifactKind::Test)
    }

    /// The slot whose code a test slot exercises.
    #[must_use]
    pub const fn subject(&self) -> Option<Self> {
        match self {
            Self::TestStarterExample => Some(Self::StarterExample),
            Self::TestAssignmentA => Some(Self::AssignmentA),
            Self::TestAssignmentB => Some(Self::AssignmentB),
            _ => None,
        }
    }

    /// Human-readable label used in prompts and logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::LearningPath => "learning path",
            Self::StarterExample => "starter example",
            Self::TestStarterExample => "starter example tests",
            Self::AssignmentA => "assignment A",
            Self::TestAssignmentA => "assignment A tests",
            Self::AssignmentB => "assignment B",
            Self::TestAssignmentB => "assignment B tests",
            Self::ExtraExercises => "extra exercises",
            Self::Readme => "README",
            Self::Requirements => "requirements",
            Self::PytestIni => "pytest configuration",
            Self::Makefile => "Makefile",
            Self::SetupCfg => "setup.cfg",
            Self::Gitignore => ".gitignore",
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

// ============================================================================
// Template language
// ============================================================================

/// A value transformation applied during substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// `snake_case`
    SnakeCase,
    /// `Title Case`
    TitleCase,
    /// `UPPER`
    Upper,
    /// `lower`
    Lower,
}

impl Filter {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "snake_case" => Some(Self::SnakeCase),
            "title_case" => Some(Self::TitleCase),
            "upper" => Some(Self::Upper),
            "lower" => Some(Self::Lower),
            _ => None,
        }
    }

    fn apply(self, value: &str) -> String {
        match self {
            Self::Upper => value.to_uppercase(),
            Self::Lower => value.to_lowercase(),
            Self::SnakeCase => snake_case(value),
            Self::TitleCase => title_case(value),
        }
    }
}

fn snake_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

fn title_case(value: &str) -> String {
    value
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable { path: String, filters: Vec<Filter> },
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateBody {
    segments: Vec<Segment>,
}

impl TemplateBody {
    /// Parses template text.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::TemplateSyntax` for an unclosed `{{`, an empty
    /// expression, an invalid variable path or an unknown filter.
    pub fn parse(name: &str, source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(open) = rest.find("{{") {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after_open = &rest[open + 2..];
            let Some(close) = after_open.find("}}") else {
                return Err(LessonError::template_syntax(
                    name,
                    format!("unclosed '{{{{' at byte {}", offset + open),
                ));
            };

            let expression = after_open[..close].trim();
            segments.push(parse_expression(name, expression)?);

            let consumed = open + 2 + close + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { segments })
    }

    /// A template that renders only the generated content.
    #[must_use]
    pub fn content_only() -> Self {
        Self {
            segments: vec![Segment::Variable {
                path: "content".to_string(),
                filters: Vec::new(),
            }],
        }
    }

    /// Returns `true` if the template references `path`.
    #[must_use]
    pub fn references(&self, path: &str) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Variable { path: p, .. } if p == path))
    }

    /// Renders the template against a context.
    ///
    /// Unknown variables render as the empty string.
    #[must_use]
    pub fn render(&self, context: &TemplateContext) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable { path, filters } => match context.get(path) {
                    Some(value) => {
                        let value = filters
                            .iter()
                            .fold(value.to_string(), |acc, filter| filter.apply(&acc));
                        out.push_str(&value);
                    }
                    None => debug!(variable = %path, "Unknown template variable rendered empty"),
                },
            }
        }
        out
    }
}

fn is_valid_path(path: &str) -> bool {
    !path.is_empty()
        && path.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

fn parse_expression(name: &str, expression: &str) -> Result<Segment> {
    if expression.is_empty() {
        return Err(LessonError::template_syntax(name, "empty expression '{{ }}'"));
    }

    let mut parts = expression.split('|').map(str::trim);
    let path = parts.next().unwrap_or_default();
    if !is_valid_path(path) {
        return Err(LessonError::template_syntax(
            name,
            format!("invalid variable '{path}'"),
        ));
    }

    let filters = parts
        .map(|filter| {
            Filter::parse(filter).ok_or_else(|| {
                LessonError::template_syntax(name, format!("unknown filter '{filter}'"))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Segment::Variable {
        path: path.to_string(),
        filters,
    })
}

/// Variables available to a template, keyed by dotted path.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    values: BTreeMap<String, String>,
}

impl TemplateContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value.
    #[must_use]
    pub fn with(mut self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(path, value);
        self
    }

    /// Inserts or replaces a value.
    pub fn insert(&mut self, path: impl Into<String>, value: impl Into<String>) {
        self.values.insert(path.into(), value.into());
    }

    /// Looks up a value.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&str> {
        self.values.get(path).map(String::as_str)
    }

    /// Context for a topic-level slot.
    #[must_use]
    pub fn for_topic(topic: &Topic, content: &str) -> Self {
        Self::new()
            .with("topic.name", &topic.name)
            .with("topic.slug", &topic.slug)
            .with("topic.description", &topic.description)
            .with("topic.difficulty", topic.difficulty.as_str())
            .with("topic.estimated_hours", topic.estimated_hours.to_string())
            .with("topic.module_count", topic.modules.len().to_string())
            .with("class_name", topic.class_name())
            .with("content", content)
    }

    /// Context for a module slot.
    #[must_use]
    pub fn for_module(topic: &Topic, module: &Module, content: &str) -> Self {
        Self::for_topic(topic, content)
            .with("module.name", &module.name)
            .with("module.slug", &module.slug)
            .with("module.index", module.index.to_string())
            .with("module.type", module.module_type.as_str())
            .with("module.focus", module.focus_summary())
            .with("module.complexity", module.complexity.as_str())
    }
}

// ============================================================================
// Templates and resolution
// ============================================================================

/// Where a resolved template came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateSource {
    /// A `<slot_id>.tmpl` file in the custom template directory.
    Custom,
    /// Inferred from a reference lesson.
    Extracted,
    /// Shipped with the generator.
    BuiltIn,
}

impl std::fmt::Display for TemplateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Custom => "custom",
            Self::Extracted => "extracted",
            Self::BuiltIn => "built_in",
        })
    }
}

/// A resolved template for one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    /// Slot the template renders.
    pub slot: Slot,
    /// Parsed body.
    pub body: TemplateBody,
    /// Provenance.
    pub source: TemplateSource,
}

impl Template {
    /// The built-in template for a slot.
    #[must_use]
    pub fn builtin(slot: Slot) -> Self {
        let body = TemplateBody::parse(slot.id(), builtin_source(slot)).unwrap_or_else(|e| {
            warn!(slot = %slot, error = %e, "Built-in template failed to parse");
            TemplateBody::content_only()
        });
        Self {
            slot,
            body,
            source: TemplateSource::BuiltIn,
        }
    }

    /// Renders against a context.
    #[must_use]
    pub fn render(&self, context: &TemplateContext) -> String {
        self.body.render(context)
    }
}

/// Built-in template text for a slot.
#[must_use]
pub const fn builtin_source(slot: Slot) -> &'static str {
    match slot {
        Slot::LearningPath => {
            "# Module {{ module.index }}: {{ module.name }}\n\n\
             **Topic:** {{ topic.name }} | **Difficulty:** {{ topic.difficulty | title_case }} | \
             **Focus:** {{ module.focus }}\n\n{{ content }}"
        }
        Slot::ExtraExercises => "# Extra Exercises: {{ module.name }}\n\n{{ content }}",
        Slot::StarterExample | Slot::AssignmentA | Slot::AssignmentB => {
            "\"\"\"{{ module.name }}: {{ module.type | title_case }} module.\n\n\
             Part of the {{ topic.name }} lesson ({{ topic.difficulty }}).\n\"\"\"\n\n{{ content }}"
        }
        Slot::TestStarterExample | Slot::TestAssignmentA | Slot::TestAssignmentB => {
            "\"\"\"Tests for {{ module.name }}.\"\"\"\n\n{{ content }}"
        }
        Slot::Readme => "# {{ topic.name }}\n\n{{ content }}",
        Slot::Requirements
        | Slot::PytestIni
        | Slot::Makefile
        | Slot::SetupCfg
        | Slot::Gitignore => "{{ content }}",
    }
}

/// Resolves and holds one template per slot for a run.
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    templates: HashMap<Slot, Arc<Template>>,
}

impl Default for TemplateResolver {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateResolver {
    /// A resolver using only built-in templates.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            templates: Slot::ALL
                .into_iter()
                .map(|slot| (slot, Arc::new(Template::builtin(slot))))
                .collect(),
        }
    }

    /// Resolves every slot once, in priority order custom, extracted, built-in.
    ///
    /// Never fails: unreadable or malformed candidates are logged and skipped.
    pub fn prepare(custom_dir: Option<&Path>, reference_dir: Option<&Path>) -> Self {
        let extracted = reference_dir.map(extraction::extract_templates).unwrap_or_default();

        let mut templates = HashMap::with_capacity(Slot::ALL.len());
        for slot in Slot::ALL {
            let template = custom_dir
                .and_then(|dir| load_custom(dir, slot))
                .or_else(|| {
                    extracted
                        .get(&slot)
                        .and_then(|source| parse_candidate(slot, source, TemplateSource::Extracted))
                })
                .unwrap_or_else(|| Template::builtin(slot));
            templates.insert(slot, Arc::new(template));
        }

        let resolver = Self { templates };
        info!(
            custom = resolver.count(TemplateSource::Custom),
            extracted = resolver.count(TemplateSource::Extracted),
            built_in = resolver.count(TemplateSource::BuiltIn),
            "Templates prepared"
        );
        resolver
    }

    /// Returns the template for a slot.
    #[must_use]
    pub fn resolve(&self, slot: Slot) -> Arc<Template> {
        self.templates
            .get(&slot)
            .cloned()
            .unwrap_or_else(|| Arc::new(Template::builtin(slot)))
    }

    /// Number of slots resolved from `source`.
    #[must_use]
    pub fn count(&self, source: TemplateSource) -> usize {
        self.templates.values().filter(|t| t.source == source).count()
    }

    /// Provenance of every slot, in slot order.
    #[must_use]
    pub fn provenance(&self) -> Vec<(Slot, TemplateSource)> {
        Slot::ALL
            .into_iter()
            .map(|slot| (slot, self.resolve(slot).source))
            .collect()
    }
}

fn load_custom(dir: &Path, slot: Slot) -> Option<Template> {
    let path = dir.join(format!("{}.{TEMPLATE_EXTENSION}", slot.id()));
    if !path.is_file() {
        return None;
    }
    match std::fs::read_to_string(&path) {
        Ok(source) => parse_candidate(slot, &source, TemplateSource::Custom),
        Err(e) => {
            warn!(
                slot = %slot,
                path = %path.display(),
                error = %e,
                "Custom template unreadable, falling back"
            );
            None
        }
    }
}

fn parse_candidate(slot: Slot, source: &str, provenance: TemplateSource) -> Option<Template> {
    match TemplateBody::parse(slot.id(), source) {
        Ok(body) => Some(Template {
            slot,
            body,
            source: provenance,
        }),
        Err(e) => {
            warn!(
                slot = %slot,
                source = %provenance,
                error = %e,
                "Malformed template, falling back"
            );
            None
        }
    }
}
