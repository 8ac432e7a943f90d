//! The generation collaborator: the only Tier 1 dependency of the pipeline.
//!
//! Requests carry compact briefs of the entities already extracted; responses
//! are drafts that the pipeline validates against its own state before
//! accepting them. Nothing here touches `AgentState` directly.

mod llm;

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::model::{Formula, Topic};

pub use llm::{LlmGenerator, LlmSettings};

/// What the generator sees of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicBrief {
    pub order: usize,
    pub title: String,
    pub description: String,
    pub key_terms: Vec<String>,
}

impl From<&Topic> for TopicBrief {
    fn from(topic: &Topic) -> Self {
        Self {
            order: topic.order,
            title: topic.title.clone(),
            description: topic.description.clone(),
            key_terms: topic.key_terms.iter().cloned().collect(),
        }
    }
}

/// What the generator sees of a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaBrief {
    pub id: String,
    pub topic_order: usize,
    pub text: String,
    pub context: String,
}

impl From<&Formula> for FormulaBrief {
    fn from(formula: &Formula) -> Self {
        Self {
            id: formula.id.clone(),
            topic_order: formula.topic_order,
            text: formula.latex_or_text.clone(),
            context: formula.source_context.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum GenerationRequest {
    /// One consolidated call for the whole document.
    Notes {
        title_hint: String,
        topics: Vec<TopicBrief>,
        formulas: Vec<FormulaBrief>,
    },
    /// One batched call; one exercise per formula expected back.
    FormulaExercises { formulas: Vec<FormulaBrief> },
    /// One call per formula combination.
    Comprehensive {
        topics: Vec<TopicBrief>,
        formulas: Vec<FormulaBrief>,
    },
}

impl GenerationRequest {
    pub fn task(&self) -> &'static str {
        match self {
            GenerationRequest::Notes { .. } => "notes",
            GenerationRequest::FormulaExercises { .. } => "formula_exercises",
            GenerationRequest::Comprehensive { .. } => "comprehensive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SectionDraft {
    pub topic_order: usize,
    pub overview: String,
    #[serde(default)]
    pub key_terms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FormulaDraft {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub explanation: String,
    #[serde(default)]
    pub applications: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NotesDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub sections: Vec<SectionDraft>,
    #[serde(default)]
    pub formulas: Vec<FormulaDraft>,
}

fn default_difficulty() -> i64 {
    2
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExerciseDraft {
    pub formula_id: String,
    pub question: String,
    #[serde(default)]
    pub solution: Option<String>,
    #[serde(default = "default_difficulty")]
    pub difficulty: i64,
    #[serde(default)]
    pub hints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ComprehensiveDraft {
    pub question: String,
    #[serde(default)]
    pub solution: Option<String>,
    #[serde(default = "default_difficulty")]
    pub difficulty: i64,
    #[serde(default)]
    pub hints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationResponse {
    Notes(NotesDraft),
    FormulaExercises(Vec<ExerciseDraft>),
    Comprehensive(ComprehensiveDraft),
}

/// Turns a structured request into a structured draft.
pub trait Generator: Send + Sync {
    fn generate(
        &self,
        request: &GenerationRequest,
    ) -> impl Future<Output = Result<GenerationResponse, GenerationError>> + Send;
}
