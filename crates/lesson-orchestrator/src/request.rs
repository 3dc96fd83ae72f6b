//! Generation requests and the topic/module plan derived from them.
//!
//! A [`GenerationRequest`] is validated synchronously before any job exists.
//! Each requested topic name is then expanded into an immutable [`Topic`]
//! carrying its slug, learning objectives and ordered [`Module`] plan.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{LessonError, Result};

/// Smallest allowed module count.
pub const MIN_MODULES: u32 = 1;

/// Largest allowed module count.
pub const MAX_MODULES: u32 = 10;

/// Longest accepted topic name, in characters.
pub const MAX_TOPIC_NAME_LEN: usize = 100;

/// Characters that cannot appear in a topic name.
const FORBIDDEN_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const fn default_modules() -> u32 {
    3
}

const fn default_true() -> bool {
    true
}

// ============================================================================
// Difficulty
// ============================================================================

/// Target audience level of a lesson.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Difficulty {
    /// New to the subject.
    #[default]
    Beginner,
    /// Comfortable with the basics.
    Intermediate,
    /// Experienced practitioners.
    Advanced,
}

impl Difficulty {
    /// Parses a string into a `Difficulty`, case-insensitively.
    ///
    /// # Examples
    ///
    /// ```
    /// use lesson_orchestrator::Difficulty;
    ///
    /// assert_eq!(Difficulty::parse("Advanced"), Some(Difficulty::Advanced));
    /// assert_eq!(Difficulty::parse("expert"), None);
    /// ```
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "beginner" => Some(Self::Beginner),
            "intermediate" => Some(Self::Intermediate),
            "advanced" => Some(Self::Advanced),
            _ => None,
        }
    }

    /// Returns the lowercase name used in files and prompts.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }

    /// Estimated study time for a whole topic, in hours.
    #[must_use]
    pub const fn estimated_hours(&self) -> f64 {
        match self {
            Self::Beginner => 4.0,
            Self::Intermediate => 6.0,
            Self::Advanced => 8.0,
        }
    }

    /// Estimated time to work through one module's learning path, in minutes.
    #[must_use]
    pub const fn module_minutes(&self) -> u32 {
        match self {
            Self::Beginner => 60,
            Self::Intermediate => 90,
            Self::Advanced => 120,
        }
    }

    /// Default code complexity for implementation modules at this level.
    #[must_use]
    pub const fn default_complexity(&self) -> CodeComplexity {
        match self {
            Self::Beginner => CodeComplexity::Simple,
            Self::Intermediate => CodeComplexity::Moderate,
            Self::Advanced => CodeComplexity::Complex,
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Difficulty {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid difficulty '{s}': expected one of 'beginner', 'intermediate', 'advanced'"
            ))
        })
    }
}

impl Serialize for Difficulty {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

// ============================================================================
// Module archetypes
// ============================================================================

/// Closed set of module archetypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    /// Introduces the core ideas.
    Fundamentals,
    /// Hands-on practice of one aspect.
    Implementation,
    /// Integrates everything into a larger piece of work.
    Project,
    /// Reviews and checks understanding.
    Assessment,
}

impl ModuleType {
    /// Returns the snake_case name used in prompts and templates.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fundamentals => "fundamentals",
            Self::Implementation => "implementation",
            Self::Project => "project",
            Self::Assessment => "assessment",
        }
    }
}

impl std::fmt::Display for ModuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How involved the generated code for a module should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeComplexity {
    /// Short, linear examples.
    Simple,
    /// Several cooperating functions or a small class.
    Moderate,
    /// Multiple classes and error handling.
    Complex,
}

impl CodeComplexity {
    /// Returns the snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
        }
    }
}

// ============================================================================
// GenerationRequest
// ============================================================================

/// A request to generate one lesson per topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// Topic names, in output order.
    pub topics: Vec<String>,

    /// Target difficulty for every topic.
    #[serde(default)]
    pub difficulty: Difficulty,

    /// Modules per topic.
    #[serde(default = "default_modules")]
    pub modules: u32,

    /// Use the external text service for content.
    #[serde(default = "default_true")]
    pub ai: bool,

    /// Overrides the configured strict/lenient policy when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,

    /// Prefer cheaper models and smaller token budgets.
    #[serde(default)]
    pub cost_efficient: bool,

    /// Directory with `<slot>.tmpl` overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates_dir: Option<PathBuf>,

    /// Existing lesson to extract templates from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_dir: Option<PathBuf>,

    /// Where topic directories are created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl GenerationRequest {
    /// Creates a request for the given topics with default settings.
    #[must_use]
    pub fn new<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
            difficulty: Difficulty::default(),
            modules: default_modules(),
            ai: true,
            strict: None,
            cost_efficient: false,
            templates_dir: None,
            reference_dir: None,
            output_dir: None,
        }
    }

    /// Sets the difficulty.
    #[must_use]
    pub const fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    /// Sets the module count.
    #[must_use]
    pub const fn with_modules(mut self, modules: u32) -> Self {
        self.modules = modules;
        self
    }

    /// Enables or disables AI content.
    #[must_use]
    pub const fn with_ai(mut self, ai: bool) -> Self {
        self.ai = ai;
        self
    }

    /// Forces strict or lenient handling of AI failures.
    #[must_use]
    pub const fn with_strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }

    /// Sets the custom template directory.
    #[must_use]
    pub fn with_templates_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.templates_dir = Some(dir.into());
        self
    }

    /// Sets the reference lesson directory.
    #[must_use]
    pub fn with_reference_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reference_dir = Some(dir.into());
        self
    }

    /// Sets the output directory.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Validates the request.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::InvalidRequest` for an empty topic list, an
    /// invalid or duplicate topic, or a module count outside 1–10.
    pub fn validate(&self) -> Result<()> {
        if self.topics.is_empty() {
            return Err(LessonError::invalid_request(
                "topics",
                "at least one topic is required",
                "Pass one or more topic names, e.g. \"python_fundamentals\"",
            ));
        }

        if !(MIN_MODULES..=MAX_MODULES).contains(&self.modules) {
            return Err(LessonError::invalid_request(
                "modules",
                format!(
                    "module count must be between {MIN_MODULES} and {MAX_MODULES} (got {})",
                    self.modules
                ),
                "Request between 1 and 10 modules per topic",
            ));
        }

        let mut slugs = HashSet::new();
        for name in &self.topics {
            let normalized = validate_topic_name(name)?;
            let slug = slugify(&normalized)?;
            if !slugs.insert(slug.clone()) {
                return Err(LessonError::invalid_request(
                    "topics",
                    format!("topic '{normalized}' duplicates another topic (slug '{slug}')"),
                    "Give every topic a distinct name",
                ));
            }
        }

        Ok(())
    }

    /// Expands every topic name into its full plan.
    ///
    /// Call [`validate`](Self::validate) first; invalid names are reported
    /// here as well.
    pub fn plan_topics(&self) -> Result<Vec<Topic>> {
        self.topics
            .iter()
            .map(|name| Topic::plan(name, self.difficulty, self.modules))
            .collect()
    }

    /// Resolves the strict/lenient policy against the configured default.
    #[must_use]
    pub fn strict_or(&self, configured: bool) -> bool {
        self.strict.unwrap_or(configured)
    }
}

// ============================================================================
// Names and slugs
// ============================================================================

/// Validates and normalizes a topic name.
///
/// Surrounding whitespace is trimmed; names must be non-empty, at most 100
/// characters and free of path or shell metacharacters.
pub fn validate_topic_name(name: &str) -> Result<String> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(LessonError::invalid_request(
            "topics",
            "topic name must not be empty",
            "Provide a descriptive topic name",
        ));
    }

    if trimmed.chars().count() > MAX_TOPIC_NAME_LEN {
        return Err(LessonError::invalid_request(
            "topics",
            format!("topic name is longer than {MAX_TOPIC_NAME_LEN} characters"),
            "Shorten the topic name",
        ));
    }

    if let Some(bad) = trimmed
        .chars()
        .find(|c| FORBIDDEN_NAME_CHARS.contains(c) || c.is_control())
    {
        return Err(LessonError::invalid_request(
            "topics",
            format!("topic name '{trimmed}' contains invalid character {bad:?}"),
            "Remove characters such as < > : \" / \\ | ? * from the topic name",
        ));
    }

    Ok(trimmed.to_string())
}

/// Derives a filesystem-safe slug from a name.
///
/// # Examples
///
/// ```
/// use lesson_orchestrator::slugify;
///
/// assert_eq!(slugify("Python Fundamentals").unwrap(), "python_fundamentals");
/// assert_eq!(slugify("  web-dev 2.0! ").unwrap(), "web_dev_2_0");
/// assert!(slugify("!!!").is_err());
/// ```
pub fn slugify(name: &str) -> Result<String> {
    let mut slug = String::with_capacity(name.len());
    let mut pending_separator = false;

    for c in name.to_lowercase().chars() {
        if c.is_whitespace() || c == '-' || c == '.' || c == '_' {
            pending_separator = true;
        } else if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.push(c);
        }
    }

    if slug.is_empty() {
        return Err(LessonError::invalid_request(
            "topics",
            format!("cannot derive a directory name from '{name}'"),
            "Include letters or digits in the topic name",
        ));
    }

    Ok(slug)
}

/// Turns a name into a Python class name prefix.
///
/// Alphanumeric words are title-cased and joined; names starting with a
/// digit get a `Lesson` prefix and names without usable characters fall back
/// to `Topic`.
///
/// # Examples
///
/// ```
/// use lesson_orchestrator::class_name_for;
///
/// assert_eq!(class_name_for("python fundamentals"), "PythonFundamentals");
/// assert_eq!(class_name_for("3d graphics"), "Lesson3dGraphics");
/// assert_eq!(class_name_for("???"), "Topic");
/// ```
#[must_use]
pub fn class_name_for(name: &str) -> String {
    let mut out = String::new();
    for word in name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.extend(chars.map(|c| c.to_ascii_lowercase()));
        }
    }

    if out.is_empty() {
        return "Topic".to_string();
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert_str(0, "Lesson");
    }
    out
}

// ============================================================================
// Topic and Module
// ============================================================================

/// One module of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Position within the topic, starting at 1.
    pub index: u32,
    /// Display name.
    pub name: String,
    /// Filesystem-safe name.
    pub slug: String,
    /// Archetype.
    pub module_type: ModuleType,
    /// Areas the module concentrates on (1–5 entries).
    pub focus_areas: Vec<String>,
    /// Expected code complexity.
    pub complexity: CodeComplexity,
}

impl Module {
    fn new(
        index: u32,
        name: String,
        module_type: ModuleType,
        focus_areas: &[&str],
        complexity: CodeComplexity,
    ) -> Result<Self> {
        let slug = slugify(&name)?;
        Ok(Self {
            index,
            name,
            slug,
            module_type,
            focus_areas: focus_areas.iter().map(|s| (*s).to_string()).collect(),
            complexity,
        })
    }

    /// Directory name of this module inside the topic root.
    ///
    /// # Examples
    ///
    /// ```
    /// use lesson_orchestrator::{Difficulty, Topic};
    ///
    /// let topic = Topic::plan("Rust Basics", Difficulty::Beginner, 2).unwrap();
    /// assert_eq!(topic.modules[0].dir_name(), "module_01_rust_basics_fundamentals");
    /// ```
    #[must_use]
    pub fn dir_name(&self) -> String {
        format!("module_{:02}_{}", self.index, self.slug)
    }

    /// Focus areas joined for prose.
    #[must_use]
    pub fn focus_summary(&self) -> String {
        self.focus_areas.join(", ")
    }
}

/// A fully planned topic. Immutable once generation starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    /// Display name.
    pub name: String,
    /// Directory name.
    pub slug: String,
    /// Audience level.
    pub difficulty: Difficulty,
    /// One-sentence summary.
    pub description: String,
    /// Key concepts covered.
    pub concepts: Vec<String>,
    /// What a learner can do afterwards.
    pub learning_objectives: Vec<String>,
    /// Assumed prior knowledge.
    pub prerequisites: Vec<String>,
    /// Estimated study time in hours.
    pub estimated_hours: f64,
    /// Ordered module plan.
    pub modules: Vec<Module>,
}

impl Topic {
    /// Plans a topic from a bare name.
    ///
    /// The module plan always starts with a fundamentals module. From four
    /// modules on the last one is a project, and from six modules on the one
    /// before it is an assessment.
    pub fn plan(name: &str, difficulty: Difficulty, module_count: u32) -> Result<Self> {
        let name = validate_topic_name(name)?;
        let slug = slugify(&name)?;
        let lower = name.to_lowercase();
        let modules = plan_modules(&name, difficulty, module_count.max(MIN_MODULES))?;

        let prerequisites = match difficulty {
            Difficulty::Beginner => vec!["Basic computer literacy".to_string()],
            Difficulty::Intermediate => vec![
                "Comfort writing small Python programs".to_string(),
                "Familiarity with functions and classes".to_string(),
            ],
            Difficulty::Advanced => vec![
                "Solid Python experience".to_string(),
                format!("Working knowledge of {lower} fundamentals"),
            ],
        };

        Ok(Self {
            description: format!(
                "A comprehensive lesson on {lower} concepts and practical applications."
            ),
            concepts: vec![
                format!("{lower} fundamentals"),
                "practical applications".to_string(),
                "best practices".to_string(),
                "real-world examples".to_string(),
            ],
            learning_objectives: vec![
                format!("Understand core concepts of {lower}"),
                format!("Apply {lower} techniques effectively"),
                format!("Implement {lower} solutions to real problems"),
                format!("Follow best practices in {lower}"),
            ],
            prerequisites,
            estimated_hours: difficulty.estimated_hours(),
            modules,
            difficulty,
            slug,
            name,
        })
    }

    /// Python class name prefix for this topic.
    #[must_use]
    pub fn class_name(&self) -> String {
        class_name_for(&self.name)
    }
}

fn plan_modules(name: &str, difficulty: Difficulty, count: u32) -> Result<Vec<Module>> {
    if count == 1 {
        return Ok(vec![Module::new(
            1,
            format!("{name} Overview"),
            ModuleType::Fundamentals,
            &["core concepts", "overview", "practical examples"],
            CodeComplexity::Simple,
        )?]);
    }

    let has_project = count >= 4;
    let has_assessment = count >= 6;
    let implementation_count = count - 1 - u32::from(has_project) - u32::from(has_assessment);

    let mut modules = Vec::with_capacity(count as usize);
    modules.push(Module::new(
        1,
        format!("{name} Fundamentals"),
        ModuleType::Fundamentals,
        &["basic concepts", "introduction", "setup"],
        CodeComplexity::Simple,
    )?);

    for i in 1..=implementation_count {
        let focus = format!("implementation {i}");
        modules.push(Module::new(
            i + 1,
            format!("{name} Implementation {i}"),
            ModuleType::Implementation,
            &[focus.as_str(), "practical exercises"],
            difficulty.default_complexity(),
        )?);
    }

    if has_assessment {
        modules.push(Module::new(
            implementation_count + 2,
            format!("{name} Review and Assessment"),
            ModuleType::Assessment,
            &["review", "self assessment", "common pitfalls"],
            difficulty.default_complexity(),
        )?);
    }

    if has_project {
        modules.push(Module::new(
            count,
            format!("{name} Project"),
            ModuleType::Project,
            &["project implementation", "integration", "real-world application"],
            CodeComplexity::Complex,
        )?);
    }

    Ok(modules)
}
