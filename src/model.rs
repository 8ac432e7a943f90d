//! Domain values threaded through the pipeline and delivered to callers.
//!
//! Every type here is a plain, self-contained value: a finished
//! [`GeneratedNotes`] carries copies of its topics, formulas and exercises
//! and never points back into run-scoped state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw document handed to a job.
#[derive(Debug, Clone)]
pub struct RawInput {
    /// Original file name, used for titles and metadata.
    pub name: String,
    pub bytes: Vec<u8>,
}

impl RawInput {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Convenience constructor for in-memory text documents.
    pub fn text(name: impl Into<String>, text: &str) -> Self {
        Self::new(name, text.as_bytes().to_vec())
    }
}

/// A heading-delimited unit of the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub title: String,
    pub description: String,
    pub key_terms: BTreeSet<String>,
    /// Position among topics, stable once assigned.
    pub order: usize,
    /// 1 = chapter, 2 = section, 3 = subsection.
    pub level: u8,
    pub page: u32,
    /// `order` of the nearest preceding topic with a lower level.
    pub parent: Option<usize>,
    /// Byte offset of the heading in the raw text.
    pub offset: usize,
}

/// Which heuristic produced a formula candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaKind {
    DisplayMath,
    InlineMath,
    EquationEnv,
    AlignEnv,
    NumberedEquation,
    Assignment,
    Definition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formula {
    /// Unique within a run.
    pub id: String,
    pub name: String,
    pub latex_or_text: String,
    pub kind: FormulaKind,
    pub explanation: Option<String>,
    pub applications: Vec<String>,
    /// Surrounding text, kept for traceability.
    pub source_context: String,
    /// `order` of the owning topic.
    pub topic_order: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseKind {
    Application,
    Conceptual,
    Derivation,
}

/// Back-reference from an exercise to what it practices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "ref", rename_all = "snake_case")]
pub enum ExerciseOwner {
    Formula(String),
    Topic(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exercise {
    pub question: String,
    pub solution: Option<String>,
    /// 1..=5
    pub difficulty: u8,
    pub kind: ExerciseKind,
    pub hints: Vec<String>,
    pub owner: ExerciseOwner,
}

/// An exercise spanning at least two topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComprehensiveExercise {
    pub question: String,
    pub solution: Option<String>,
    pub difficulty: u8,
    pub hints: Vec<String>,
    pub formula_ids: Vec<String>,
    pub topic_orders: Vec<usize>,
}

/// One topic with its formulas and exercises. `content` is rendered from the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub topic: Topic,
    pub formulas: Vec<Formula>,
    pub exercises: Vec<Exercise>,
    pub content: String,
}

impl Section {
    pub fn title(&self) -> &str {
        &self.topic.title
    }
}

/// Fallback level inside the degradation controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// The only implementation of a deterministic stage.
    Primary,
    /// AI-backed generation.
    Enhanced,
    /// Rule-based synthesis from already extracted entities.
    Template,
    /// Minimal reorganisation of the raw text.
    Emergency,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Primary => write!(f, "primary"),
            Tier::Enhanced => write!(f, "enhanced"),
            Tier::Template => write!(f, "template"),
            Tier::Emergency => write!(f, "emergency"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Extraction,
    Generation,
    Validation,
    Timeout,
    Pipeline,
    Cancelled,
    Internal,
}

/// Observable record of a failure inside a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub stage: String,
    pub kind: ErrorKind,
    pub message: String,
    /// Tier whose attempt failed, if the failure came from a tier.
    pub tier: Option<Tier>,
    /// Tier that eventually produced the stage result.
    pub resolved_by: Option<Tier>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotesMetadata {
    pub source_name: String,
    pub pages: usize,
    pub images: usize,
    pub tables: usize,
    pub total_topics: usize,
    pub total_formulas: usize,
    pub total_exercises: usize,
    pub total_comprehensive_exercises: usize,
    /// How `generate_notes` was satisfied.
    pub generation: Option<Tier>,
    pub stage_tiers: BTreeMap<String, Tier>,
    pub stage_errors: BTreeMap<String, String>,
}

/// The finished artifact of a completed job. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedNotes {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub sections: Vec<Section>,
    pub comprehensive_exercises: Vec<ComprehensiveExercise>,
    pub metadata: NotesMetadata,
    pub created_at: DateTime<Utc>,
}

/// Clamps any difficulty estimate into the 1..=5 scale.
pub fn clamp_difficulty(raw: i64) -> u8 {
    raw.clamp(1, 5) as u8
}
