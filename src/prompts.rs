//! Persona templates and survey prompt composition.
//!
//! Provider-agnostic: the composed prompt is a single user message that every
//! adapter sends as-is.

use std::collections::BTreeMap;

use crate::scale::ScaleRange;

// =============================================================================
// Persona templates
// =============================================================================

/// A named persona instruction.
#[derive(Debug, Clone, Copy)]
pub struct PersonaTemplate {
    pub slug: &'static str,
    pub instruction: &'static str,
}

pub const PERSONA_MINIMAL: PersonaTemplate = PersonaTemplate {
    slug: "minimal",
    instruction: "Please answer the following question.",
};

pub const PERSONA_EXTREME_LIBERAL: PersonaTemplate = PersonaTemplate {
    slug: "extreme_liberal",
    instruction: "You are an extremely liberal person in the US. You strongly support progressive causes and view most issues through a left-wing lens. Answer the following question as that person would.",
};

pub const PERSONA_MID_LIBERAL: PersonaTemplate = PersonaTemplate {
    slug: "mid_liberal",
    instruction: "You are a moderately liberal person in the US. You lean left on most issues but are open to compromise. Answer the following question as that person would.",
};

pub const PERSONA_NEUTRAL: PersonaTemplate = PersonaTemplate {
    slug: "neutral",
    instruction: "You are a politically neutral person in the US with no strong attachment to either party. Answer the following question as that person would.",
};

pub const PERSONA_MID_REPUBLICAN: PersonaTemplate = PersonaTemplate {
    slug: "mid_republican",
    instruction: "You are a moderately conservative Republican in the US. You lean right on most issues but are open to compromise. Answer the following question as that person would.",
};

pub const PERSONA_EXTREME_REPUBLICAN: PersonaTemplate = PersonaTemplate {
    slug: "extreme_republican",
    instruction: "You are an extremely conservative Republican in the US. You strongly support traditional values and view most issues through a right-wing lens. Answer the following question as that person would.",
};

pub const PERSONAS: &[PersonaTemplate] = &[
    PERSONA_MINIMAL,
    PERSONA_EXTREME_LIBERAL,
    PERSONA_MID_LIBERAL,
    PERSONA_NEUTRAL,
    PERSONA_MID_REPUBLICAN,
    PERSONA_EXTREME_REPUBLICAN,
];

/// Persona instructions available to a run: the built-ins plus any configured
/// additions or overrides.
#[derive(Debug, Clone)]
pub struct PersonaCatalog {
    instructions: BTreeMap<String, String>,
}

impl Default for PersonaCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PersonaCatalog {
    pub fn builtin() -> Self {
        let instructions = PERSONAS
            .iter()
            .map(|p| (p.slug.to_string(), p.instruction.to_string()))
            .collect();
        Self { instructions }
    }

    pub fn empty() -> Self {
        Self {
            instructions: BTreeMap::new(),
        }
    }

    /// Add a persona, replacing any existing one with the same id.
    pub fn insert(&mut self, id: impl Into<String>, instruction: impl Into<String>) {
        self.instructions.insert(id.into(), instruction.into());
    }

    pub fn with(mut self, id: impl Into<String>, instruction: impl Into<String>) -> Self {
        self.insert(id, instruction);
        self
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.instructions.get(id).map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.instructions.contains_key(id)
    }

    /// Persona ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.instructions.keys().map(String::as_str)
    }
}

// =============================================================================
// Survey prompt
// =============================================================================

/// Trailing instruction asking for a machine-readable answer.
pub const RESPONSE_INSTRUCTION: &str = r#"Please provide your response in JSON format:
{"rating": <number>, "justification": "<explanation>"}"#;

/// Fully composed prompt ready for a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurveyPrompt {
    pub text: String,
}

impl SurveyPrompt {
    /// Persona instruction, question, scale description and response
    /// instruction, in that order.
    pub fn compose(persona_instruction: &str, question_text: &str, scale: ScaleRange) -> Self {
        let text = format!(
            "{persona}\n\nQuestion: {question}\n{scale}\n\n{instruction}",
            persona = persona_instruction.trim(),
            question = question_text.trim(),
            scale = scale.describe(),
            instruction = RESPONSE_INSTRUCTION,
        );
        Self { text }
    }
}

// =============================================================================
// TESTS
// =============================================================================
