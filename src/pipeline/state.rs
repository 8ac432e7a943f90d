use std::collections::{BTreeMap, BTreeSet};

use crate::error::ValidationError;
use crate::model::{
    ComprehensiveExercise, ErrorInfo, ExerciseOwner, Formula, GeneratedNotes, Section, Tier, Topic,
};

/// Working memory of one run. Owned by exactly one orchestrator call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentState {
    pub source_name: String,
    pub raw_text: String,
    pub pages: usize,
    pub images: Vec<String>,
    pub tables: Vec<String>,
    pub topics: Vec<Topic>,
    pub formulas: Vec<Formula>,
    pub sections: Vec<Section>,
    pub comprehensive_exercises: Vec<ComprehensiveExercise>,
    pub stage_errors: BTreeMap<String, ErrorInfo>,
    pub stage_tiers: BTreeMap<String, Tier>,
    /// Set by Tier 1 note generation.
    pub title_hint: Option<String>,
    pub summary_hint: Option<String>,
    /// Set by finalize.
    pub notes: Option<GeneratedNotes>,
}

impl AgentState {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            ..Default::default()
        }
    }
}

/// Structural check applied to every tier result before it replaces `prior`.
///
/// Entities already in `prior` must still be present, in the same order and
/// with the same identity; they may only be annotated. New output must be
/// internally consistent.
pub fn validate_successor(prior: &AgentState, next: &AgentState) -> Result<(), ValidationError> {
    if !prior.raw_text.is_empty() && prior.raw_text != next.raw_text {
        return Err(ValidationError::new("raw text was modified"));
    }

    if next.topics.len() < prior.topics.len() {
        return Err(ValidationError::new("topics were removed"));
    }
    for (before, after) in prior.topics.iter().zip(&next.topics) {
        if before.order != after.order || before.title != after.title {
            return Err(ValidationError::new(format!(
                "topic {} changed identity",
                before.order
            )));
        }
    }

    if next.formulas.len() < prior.formulas.len() {
        return Err(ValidationError::new("formulas were removed"));
    }
    for (before, after) in prior.formulas.iter().zip(&next.formulas) {
        if before.id != after.id || before.latex_or_text != after.latex_or_text {
            return Err(ValidationError::new(format!(
                "formula {} changed identity",
                before.id
            )));
        }
    }
    let mut formula_ids = BTreeSet::new();
    for formula in &next.formulas {
        if !formula_ids.insert(formula.id.as_str()) {
            return Err(ValidationError::new(format!(
                "duplicate formula id {}",
                formula.id
            )));
        }
    }

    validate_sections(&next.sections, &formula_ids)?;

    let section_orders: BTreeSet<usize> = next.sections.iter().map(|s| s.topic.order).collect();
    for exercise in &next.comprehensive_exercises {
        if exercise.question.trim().is_empty() {
            return Err(ValidationError::new("comprehensive exercise without question"));
        }
        if !(1..=5).contains(&exercise.difficulty) {
            return Err(ValidationError::new("comprehensive difficulty out of range"));
        }
        if let Some(id) = exercise
            .formula_ids
            .iter()
            .find(|id| !formula_ids.contains(id.as_str()))
        {
            return Err(ValidationError::new(format!(
                "comprehensive exercise references unknown formula {id}"
            )));
        }
        if exercise.topic_orders.len() < 2
            || exercise.topic_orders.iter().any(|o| !section_orders.contains(o))
        {
            return Err(ValidationError::new(
                "comprehensive exercise must span at least two known topics",
            ));
        }
    }

    if let Some(notes) = &next.notes {
        if notes.sections.is_empty() {
            return Err(ValidationError::new("notes have no sections"));
        }
        validate_sections(&notes.sections, &formula_ids)?;
    }
    Ok(())
}

fn validate_sections(sections: &[Section], formula_ids: &BTreeSet<&str>) -> Result<(), ValidationError> {
    let mut orders = BTreeSet::new();
    for section in sections {
        if section.title().trim().is_empty() {
            return Err(ValidationError::new("section with empty title"));
        }
        if !orders.insert(section.topic.order) {
            return Err(ValidationError::new(format!(
                "two sections for topic {}",
                section.topic.order
            )));
        }
        if let Some(f) = section
            .formulas
            .iter()
            .find(|f| !formula_ids.contains(f.id.as_str()))
        {
            return Err(ValidationError::new(format!(
                "section {} references unknown formula {}",
                section.title(),
                f.id
            )));
        }
        for exercise in &section.exercises {
            if exercise.question.trim().is_empty() {
                return Err(ValidationError::new("exercise without question"));
            }
            if !(1..=5).contains(&exercise.difficulty) {
                return Err(ValidationError::new("exercise difficulty out of range"));
            }
            let owned = match &exercise.owner {
                ExerciseOwner::Formula(id) => section.formulas.iter().any(|f| &f.id == id),
                ExerciseOwner::Topic(order) => *order == section.topic.order,
            };
            if !owned {
                return Err(ValidationError::new(format!(
                    "exercise in section {} has a dangling owner",
                    section.title()
                )));
            }
        }
    }
    Ok(())
}
