//! Exercise assembly: templated per-formula and per-topic exercises,
//! comprehensive combinations, and validation of AI-authored drafts.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ValidationError;
use crate::generation::{ComprehensiveDraft, ExerciseDraft};
use crate::model::{
    ComprehensiveExercise, Exercise, ExerciseKind, ExerciseOwner, Formula, FormulaKind, Section,
    Topic, clamp_difficulty,
};

/// Formulas per comprehensive exercise.
pub const MAX_COMBINATION: usize = 3;
const SAMPLE_VALUES: [u32; 4] = [2, 3, 5, 7];
const FUNCTION_NAMES: &[&str] = &[
    "sin", "cos", "tan", "log", "ln", "exp", "lim", "max", "min", "det", "sqrt",
];

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\[A-Za-z]+|[A-Za-z]+").expect("valid regex"));

pub struct ExerciseAssembler;

impl ExerciseAssembler {
    /// Templated exercise for one formula. Definitions become conceptual
    /// questions, environments without `=` become derivations, everything
    /// else a substitution exercise with sample values.
    pub fn for_formula(formula: &Formula) -> Exercise {
        let difficulty = Self::difficulty(formula);
        let text = &formula.latex_or_text;
        let name = &formula.name;

        let (kind, question, solution, difficulty) = if formula.kind == FormulaKind::Definition {
            (
                ExerciseKind::Conceptual,
                format!(
                    "Explain the meaning and significance of {name}: ${text}$. Provide an example of its application."
                ),
                "Describe each quantity involved, then illustrate with a concrete case.".to_string(),
                difficulty,
            )
        } else if !text.contains('=') {
            (
                ExerciseKind::Derivation,
                format!("Starting from {name}: ${text}$, derive the relationship step by step and state any assumptions."),
                "Expand the expression, justify each manipulation and simplify.".to_string(),
                clamp_difficulty(i64::from(difficulty) + 1),
            )
        } else {
            let bindings = Self::variables(text)
                .into_iter()
                .skip(1)
                .zip(SAMPLE_VALUES.iter().cycle())
                .map(|(var, value)| format!("{var} = {value}"))
                .collect::<Vec<_>>();
            let question = if bindings.is_empty() {
                format!("Given {name}: ${text}$, evaluate it and interpret the result.")
            } else {
                format!(
                    "Given {name}: ${text}$, compute the result when {}.",
                    bindings.join(", ")
                )
            };
            (
                ExerciseKind::Application,
                question,
                "Apply the formula step by step, substituting the given values and solving for the unknown."
                    .to_string(),
                difficulty,
            )
        };

        Exercise {
            question,
            solution: Some(solution),
            difficulty,
            kind,
            hints: vec![
                "Identify every variable in the formula before substituting.".to_string(),
                "Keep track of units at each step.".to_string(),
            ],
            owner: ExerciseOwner::Formula(formula.id.clone()),
        }
    }

    /// Conceptual exercise for a topic, if it has anything to ask about.
    pub fn for_topic(topic: &Topic) -> Option<Exercise> {
        if topic.description.trim().is_empty() && topic.key_terms.is_empty() {
            return None;
        }
        let terms: Vec<&str> = topic.key_terms.iter().take(3).map(String::as_str).collect();
        let question = if terms.is_empty() {
            format!("Summarize the main ideas of {} in your own words.", topic.title)
        } else {
            format!(
                "Summarize the main ideas of {} and explain the role of: {}.",
                topic.title,
                terms.join(", ")
            )
        };
        Some(Exercise {
            question,
            solution: None,
            difficulty: if terms.len() >= 3 { 2 } else { 1 },
            kind: ExerciseKind::Conceptual,
            hints: vec![format!("Reread the section on {}.", topic.title)],
            owner: ExerciseOwner::Topic(topic.order),
        })
    }

    /// Complexity proxy: operators and commands, plus distinct variables.
    pub fn difficulty(formula: &Formula) -> u8 {
        let text = &formula.latex_or_text;
        let operators = text
            .chars()
            .filter(|c| "+-*/^=<>".contains(*c) || "∑∫∏√∂".contains(*c))
            .count()
            + TOKEN
                .find_iter(text)
                .filter(|m| m.as_str().starts_with('\\'))
                .count();
        let variables = Self::variables(text).len();

        let score = 1
            + i64::from(operators >= 2)
            + i64::from(operators >= 5)
            + i64::from(variables >= 3)
            + i64::from(variables >= 5);
        clamp_difficulty(score)
    }

    /// Distinct variable names in first-appearance order. Short letter runs
    /// are read as products of single-letter variables (`mc` is `m`, `c`).
    pub fn variables(text: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let mut push = |name: String| {
            if seen.insert(name.clone()) {
                out.push(name);
            }
        };
        for m in TOKEN.find_iter(text) {
            let token = m.as_str();
            if token.starts_with('\\') || FUNCTION_NAMES.contains(&token) {
                continue;
            }
            if token.len() <= 3 {
                token.chars().for_each(|c| push(c.to_string()));
            } else {
                push(token.to_string());
            }
        }
        out
    }

    /// Whether the comprehensive stage should run at all.
    pub fn eligible_for_comprehensive(sections: &[Section]) -> bool {
        sections.iter().filter(|s| !s.formulas.is_empty()).count() >= 2
    }

    /// Formula groups drawn from consecutive topic pairs, at most `count`.
    pub fn combinations<'a>(
        topics: &[Topic],
        formulas: &'a [Formula],
        count: usize,
    ) -> Vec<Vec<&'a Formula>> {
        let mut by_topic: BTreeMap<usize, Vec<&Formula>> = BTreeMap::new();
        for formula in formulas {
            by_topic.entry(formula.topic_order).or_default().push(formula);
        }
        let groups: Vec<&Vec<&Formula>> = topics
            .iter()
            .filter_map(|t| by_topic.get(&t.order))
            .collect();

        groups
            .windows(2)
            .take(count)
            .map(|pair| {
                pair[0]
                    .iter()
                    .take(2)
                    .chain(pair[1].iter().take(2))
                    .take(MAX_COMBINATION)
                    .copied()
                    .collect::<Vec<_>>()
            })
            .filter(|combo| combo.len() >= 2)
            .collect()
    }

    /// Tier 2 comprehensive exercise for one combination.
    pub fn comprehensive(topics: &[Topic], combination: &[&Formula]) -> ComprehensiveExercise {
        let title_of = |order: usize| {
            topics
                .iter()
                .find(|t| t.order == order)
                .map(|t| t.title.as_str())
                .unwrap_or("the notes")
        };
        let parts: Vec<String> = combination
            .iter()
            .map(|f| format!("${}$ from {}", f.latex_or_text, title_of(f.topic_order)))
            .collect();
        let hardest = combination
            .iter()
            .map(|f| Self::difficulty(f))
            .max()
            .unwrap_or(1);

        ComprehensiveExercise {
            question: format!(
                "Solve a multi-step problem that combines {}. Explain how the results of each step feed into the next.",
                parts.join(" and ")
            ),
            solution: Some(
                "Work through each formula in turn, carrying intermediate results forward.".to_string(),
            ),
            difficulty: clamp_difficulty(i64::from(hardest) + 1),
            hints: combination
                .iter()
                .map(|f| format!("Start from {}: ${}$.", f.name, f.latex_or_text))
                .collect(),
            formula_ids: combination.iter().map(|f| f.id.clone()).collect(),
            topic_orders: Self::topic_orders(combination),
        }
    }

    /// Accepts AI-authored drafts only if they cover exactly the given formulas.
    pub fn from_drafts(
        formulas: &[Formula],
        drafts: &[ExerciseDraft],
    ) -> Result<Vec<Exercise>, ValidationError> {
        let known: BTreeSet<&str> = formulas.iter().map(|f| f.id.as_str()).collect();
        let mut covered = BTreeSet::new();
        let mut exercises = Vec::with_capacity(drafts.len());

        for draft in drafts {
            if !known.contains(draft.formula_id.as_str()) {
                return Err(ValidationError::new(format!(
                    "exercise references unknown formula {}",
                    draft.formula_id
                )));
            }
            if draft.question.trim().is_empty() {
                return Err(ValidationError::new(format!(
                    "empty question for {}",
                    draft.formula_id
                )));
            }
            covered.insert(draft.formula_id.as_str());
            exercises.push(Exercise {
                question: draft.question.trim().to_string(),
                solution: draft.solution.clone().filter(|s| !s.trim().is_empty()),
                difficulty: clamp_difficulty(draft.difficulty),
                kind: ExerciseKind::Application,
                hints: draft.hints.clone(),
                owner: ExerciseOwner::Formula(draft.formula_id.clone()),
            });
        }

        if let Some(missing) = known.difference(&covered).next() {
            return Err(ValidationError::new(format!("no exercise for {missing}")));
        }
        Ok(exercises)
    }

    pub fn comprehensive_from_draft(
        combination: &[&Formula],
        draft: &ComprehensiveDraft,
    ) -> Result<ComprehensiveExercise, ValidationError> {
        if draft.question.trim().is_empty() {
            return Err(ValidationError::new("empty comprehensive question"));
        }
        Ok(ComprehensiveExercise {
            question: draft.question.trim().to_string(),
            solution: draft.solution.clone().filter(|s| !s.trim().is_empty()),
            difficulty: clamp_difficulty(draft.difficulty),
            hints: draft.hints.clone(),
            formula_ids: combination.iter().map(|f| f.id.clone()).collect(),
            topic_orders: Self::topic_orders(combination),
        })
    }

    fn topic_orders(combination: &[&Formula]) -> Vec<usize> {
        combination
            .iter()
            .map(|f| f.topic_order)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
