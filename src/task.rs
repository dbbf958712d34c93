//! Survey tasks and their results.

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, RunConfig};
use crate::invoker::Invocation;
use crate::parser::{AnswerStatus, ParsedAnswer};
use crate::prompts::PersonaCatalog;
use crate::registry::FamilyLookup;
use crate::scale::ScaleRange;

/// One survey item with a validated response range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDef {
    pub scale_name: String,
    pub id: String,
    pub text: String,
    pub scale_range: ScaleRange,
    #[serde(default)]
    pub reverse_score: bool,
}

/// One unit of work: ask one provider one question under one persona.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub provider_id: String,
    pub scale_name: String,
    pub question_id: String,
    pub question_text: String,
    pub persona_style: String,
    /// 1-based repetition number.
    pub run_index: u32,
    pub scale_range: ScaleRange,
    pub reverse_flag: bool,
}

/// A task merged with its answer. Exactly one per dispatched task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(flatten)]
    pub task: Task,
    /// Always within `task.scale_range`.
    pub numeric_score: f64,
    /// `None` when the call itself failed.
    pub label: Option<String>,
    pub justification: String,
    pub raw_response: String,
    /// Seconds; `None` when the call itself failed.
    pub duration: Option<f64>,
    pub status: AnswerStatus,
    /// Filled in by the reverse scorer.
    #[serde(default)]
    pub scored_value: Option<f64>,
}

impl TaskResult {
    pub fn from_invocation(task: Task, invocation: Invocation) -> Self {
        let Invocation {
            answer,
            raw_response,
            duration,
            ..
        } = invocation;
        Self {
            task,
            numeric_score: answer.numeric_score,
            label: Some(answer.label),
            justification: answer.justification,
            raw_response,
            duration: Some(duration.as_secs_f64()),
            status: answer.status,
            scored_value: None,
        }
    }

    /// Midpoint placeholder for a task whose call never produced an answer.
    pub fn failed(task: Task, message: &str) -> Self {
        let answer = ParsedAnswer::synthesized(task.scale_range, AnswerStatus::TaskError, message);
        Self {
            task,
            numeric_score: answer.numeric_score,
            label: None,
            justification: answer.justification,
            raw_response: message.to_string(),
            duration: None,
            status: answer.status,
            scored_value: None,
        }
    }

    pub fn is_synthesized(&self) -> bool {
        self.status.is_synthesized()
    }
}

/// Cross product of the run configuration, in nesting order question →
/// provider → persona → repetition.
///
/// Questions whose scale is not in `scales_to_run` are skipped. Provider and
/// persona ids are checked here so config defects surface before any call.
pub fn build_tasks(
    questions: &[QuestionDef],
    run: &RunConfig,
    providers: &(impl FamilyLookup + ?Sized),
    personas: &PersonaCatalog,
) -> Result<Vec<Task>, ConfigError> {
    for provider_id in &run.models_to_run {
        providers.family_of(provider_id)?;
    }
    for persona in &run.prompt_styles_to_run {
        if !personas.contains(persona) {
            return Err(ConfigError::UnknownPersona(persona.clone()));
        }
    }

    let mut tasks = Vec::new();
    for q in questions
        .iter()
        .filter(|q| run.scales_to_run.iter().any(|s| s == &q.scale_name))
    {
        for provider_id in &run.models_to_run {
            for persona in &run.prompt_styles_to_run {
                for run_index in 1..=run.num_repetitions {
                    tasks.push(Task {
                        provider_id: provider_id.clone(),
                        scale_name: q.scale_name.clone(),
                        question_id: q.id.clone(),
                        question_text: q.text.clone(),
                        persona_style: persona.clone(),
                        run_index,
                        scale_range: q.scale_range,
                        reverse_flag: q.reverse_score,
                    });
                }
            }
        }
    }
    Ok(tasks)
}
