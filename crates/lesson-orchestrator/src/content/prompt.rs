//! Prompt composition for the text service.

use std::fmt::Write as _;

use super::ContentRequest;
use crate::config::AiConfig;
use crate::template::Slot;

const CODE_SYSTEM_PROMPT: &str = "You are an expert Python programming instructor.

Requirements:
1. Output only valid, executable Python code with no syntax errors.
2. Terminate every string and balance every bracket.
3. Indent consistently with 4 spaces.
4. No markdown, prose or explanations outside the code.
5. Include docstrings and meaningful, educational implementations.";

const TEST_SYSTEM_PROMPT: &str = "You are an expert Python programming instructor specialising in pytest.

Requirements:
1. Output only valid, executable Python test code with no syntax errors.
2. Terminate every string and balance every bracket.
3. Indent consistently with 4 spaces.
4. No markdown, prose or explanations outside the code.
5. Import from the module under test by its file name and only use names it defines.";

const PROSE_SYSTEM_PROMPT: &str = "You are an expert educational content creator. \
Write practical, engaging Markdown about programming with clear explanations and real-world examples.";

/// Default temperature.
const TEMPERATURE: f32 = 0.7;

/// Temperature in cost-efficient mode.
const COST_EFFICIENT_TEMPERATURE: f32 = 0.3;

/// Token cap when cost-efficiency is off, or for slots without a tighter cap.
const DEFAULT_MAX_TOKENS: u32 = 2000;

/// A fully composed request to the text service.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    /// Model to use.
    pub model: String,
    /// System message.
    pub system: String,
    /// User message.
    pub user: String,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

/// Completion token cap for a slot.
///
/// # Examples
///
/// ```
/// use lesson_orchestrator::{max_tokens_for, Slot};
///
/// assert_eq!(max_tokens_for(Slot::StarterExample, true), 800);
/// assert_eq!(max_tokens_for(Slot::StarterExample, false), 2000);
/// assert_eq!(max_tokens_for(Slot::Readme, true), 2000);
/// ```
#[must_use]
pub const fn max_tokens_for(slot: Slot, cost_efficient: bool) -> u32 {
    if !cost_efficient {
        return DEFAULT_MAX_TOKENS;
    }
    match slot {
        Slot::StarterExample | Slot::ExtraExercises => 800,
        Slot::AssignmentA | Slot::AssignmentB => 600,
        Slot::TestStarterExample | Slot::TestAssignmentA | Slot::TestAssignmentB => 400,
        Slot::LearningPath => 1200,
        _ => DEFAULT_MAX_TOKENS,
    }
}

const fn concise_prefix(slot: Slot) -> &'static str {
    match slot {
        Slot::StarterExample => {
            "Generate a concise code example with minimal comments. Focus on core functionality only."
        }
        Slot::AssignmentA => {
            "Create a brief assignment with clear objectives. Keep instructions concise."
        }
        Slot::AssignmentB => "Generate a short, focused assignment. Avoid lengthy descriptions.",
        Slot::TestStarterExample => "Write minimal test cases covering key functionality only.",
        Slot::TestAssignmentA => {
            "Create essential test cases. Keep test names descriptive but brief."
        }
        Slot::TestAssignmentB => {
            "Generate focused test cases. Prioritise coverage over quantity."
        }
        Slot::ExtraExercises => {
            "List 3-5 concise exercises. Keep descriptions short and actionable."
        }
        Slot::LearningPath => {
            "Create a structured learning guide. Be comprehensive but concise."
        }
        _ => "Generate concise, focused content.",
    }
}

fn slot_instructions(request: &ContentRequest<'_>) -> String {
    let topic = &request.topic.name;
    let class = request.topic.class_name();
    match request.slot {
        Slot::LearningPath => format!(
            "Write the learning path for this module as Markdown, without a top-level heading. \
             Include: learning objectives, a short introduction to {topic}, 3-4 key concepts with examples, \
             a step-by-step path through starter_example.py, test_starter_example.py, assignment_a.py \
             (students write tests), assignment_b.py (students implement to make tests pass) and \
             extra_exercises.md, and a success criteria checklist."
        ),
        Slot::StarterExample => format!(
            "Write starter_example.py: a complete, runnable example demonstrating the focus areas, \
             with a class named {class}Example and an `if __name__ == \"__main__\":` demo."
        ),
        Slot::AssignmentA => format!(
            "Write assignment_a.py: fully implemented code with a class named {class}Assignment \
             that students will write tests for. Include several branches and error handling worth testing."
        ),
        Slot::AssignmentB => format!(
            "Write assignment_b.py: a class named {class}Implementation whose methods have \
             docstrings describing the required behaviour and bodies that raise NotImplementedError."
        ),
        Slot::TestStarterExample => {
            "Write test_starter_example.py: pytest tests that exercise the starter example below."
                .to_string()
        }
        Slot::TestAssignmentA => {
            "Write test_assignment_a.py: a pytest skeleton for students, with one worked test and \
             comments pointing at what else needs covering in the code below."
                .to_string()
        }
        Slot::TestAssignmentB => {
            "Write test_assignment_b.py: pytest tests that define the required behaviour of the \
             unimplemented code below. They must pass once the methods are implemented as documented."
                .to_string()
        }
        Slot::ExtraExercises => {
            "Write extra exercises as Markdown, without a top-level heading: 3-5 exercises of \
             increasing difficulty, each with a task list."
                .to_string()
        }
        Slot::Readme => format!(
            "Write the README body for a lesson on {topic} as Markdown, without a top-level heading. \
             Include the description, learning objectives, prerequisites, the module list, \
             getting started instructions (pip install -r requirements.txt, pytest) and the estimated time."
        ),
        other => format!("Write the {} file.", other.label()),
    }
}

impl Prompt {
    /// Composes the prompt for a request.
    ///
    /// Cost-efficient mode switches every slot except the learning path to
    /// the cost model, caps tokens per slot and lowers the temperature.
    #[must_use]
    pub fn build(request: &ContentRequest<'_>, config: &AiConfig, cost_efficient: bool) -> Self {
        let topic = request.topic;
        let mut user = String::new();

        if cost_efficient {
            let _ = writeln!(user, "{}\n", concise_prefix(request.slot));
        }
        let _ = writeln!(user, "{}\n", slot_instructions(request));

        let _ = writeln!(user, "Topic: {}", topic.name);
        let _ = writeln!(user, "Difficulty: {}", topic.difficulty);
        if let Some(module) = request.module {
            let _ = writeln!(user, "Module: {}", module.name);
            let _ = writeln!(user, "Module Type: {}", module.module_type);
            let _ = writeln!(user, "Focus Areas: {}", module.focus_summary());
        }
        let _ = writeln!(
            user,
            "Learning Objectives: {}",
            topic.learning_objectives.join(", ")
        );

        if let (Some(subject), Some(code)) = (request.slot.subject(), request.subject_code) {
            let module_name = subject.file_name().trim_end_matches(".py");
            let _ = writeln!(
                user,
                "\nCode under test (import it with `from {module_name} import ...`):\n```python\n{}\n```",
                code.trim_end()
            );
        }

        let system = if request.slot.subject().is_some() {
            TEST_SYSTEM_PROMPT
        } else if request.slot.is_code() {
            CODE_SYSTEM_PROMPT
        } else {
            PROSE_SYSTEM_PROMPT
        };

        let model = if cost_efficient && request.slot != Slot::LearningPath {
            config.cost_model.clone()
        } else {
            config.model.clone()
        };

        Self {
            model,
            system: system.to_string(),
            user,
            max_tokens: max_tokens_for(request.slot, cost_efficient),
            temperature: if cost_efficient {
                COST_EFFICIENT_TEMPERATURE
            } else {
                TEMPERATURE
            },
        }
    }
}
