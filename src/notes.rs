//! Section synthesis for the lower degradation tiers, plus the derived
//! views (content, summary, title) computed at finalize.
//!
//! [`NoteBuilder::template_sections`] is Tier 2: rule-based, no external
//! call. [`NoteBuilder::emergency_section`] is Tier 3 and never fails.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

use crate::error::ValidationError;
use crate::generation::NotesDraft;
use crate::model::{ComprehensiveExercise, Exercise, Formula, Section, Topic};
use crate::patterns::key_terms;

pub const EMERGENCY_TITLE: &str = "Document Overview";
const EMERGENCY_MAX_CHARS: usize = 4000;
const EMERGENCY_DESCRIPTION_CHARS: usize = 300;

/// Result of applying an AI notes draft to already extracted entities.
#[derive(Debug, Clone, PartialEq)]
pub struct EnhancedNotes {
    pub topics: Vec<Topic>,
    pub formulas: Vec<Formula>,
    pub sections: Vec<Section>,
    pub title: Option<String>,
    pub summary: Option<String>,
}

/// Builds sections from topics, formulas and drafts.
pub struct NoteBuilder;

impl NoteBuilder {
    /// Tier 2: one section per topic, formulas grouped by owning topic.
    pub fn template_sections(
        topics: &[Topic],
        formulas: &[Formula],
    ) -> Result<Vec<Section>, ValidationError> {
        if topics.is_empty() {
            return Err(ValidationError::new("no topics to build sections from"));
        }

        let mut by_topic: BTreeMap<usize, Vec<Formula>> = BTreeMap::new();
        for formula in formulas {
            by_topic
                .entry(formula.topic_order)
                .or_default()
                .push(formula.clone());
        }

        let sections = topics
            .iter()
            .map(|topic| {
                let mut section = Section {
                    topic: topic.clone(),
                    formulas: by_topic.remove(&topic.order).unwrap_or_default(),
                    exercises: Vec::new(),
                    content: String::new(),
                };
                Self::refresh_content(&mut section);
                section
            })
            .collect();

        if let Some(orphan) = by_topic.keys().next() {
            return Err(ValidationError::new(format!(
                "formulas reference unknown topic {orphan}"
            )));
        }
        Ok(sections)
    }

    /// Tier 1: annotate topics and formulas with the draft, then group.
    ///
    /// Every reference in the draft must resolve; an unknown topic order or
    /// formula id rejects the whole draft.
    pub fn enhanced_sections(
        topics: &[Topic],
        formulas: &[Formula],
        draft: &NotesDraft,
    ) -> Result<EnhancedNotes, ValidationError> {
        if draft.sections.is_empty() {
            return Err(ValidationError::new("draft has no sections"));
        }

        let mut topics = topics.to_vec();
        for sd in &draft.sections {
            let topic = topics
                .iter_mut()
                .find(|t| t.order == sd.topic_order)
                .ok_or_else(|| {
                    ValidationError::new(format!("draft references unknown topic {}", sd.topic_order))
                })?;
            if !sd.overview.trim().is_empty() {
                topic.description = sd.overview.trim().to_string();
            }
            topic.key_terms.extend(
                sd.key_terms
                    .iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty()),
            );
        }

        let mut formulas = formulas.to_vec();
        for fd in &draft.formulas {
            let formula = formulas.iter_mut().find(|f| f.id == fd.id).ok_or_else(|| {
                ValidationError::new(format!("draft references unknown formula {}", fd.id))
            })?;
            if let Some(name) = fd.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
                formula.name = name.to_string();
            }
            if !fd.explanation.trim().is_empty() {
                formula.explanation = Some(fd.explanation.trim().to_string());
            }
            formula.applications.extend(fd.applications.iter().cloned());
        }

        let sections = Self::template_sections(&topics, &formulas)?;
        Ok(EnhancedNotes {
            topics,
            formulas,
            sections,
            title: non_empty(&draft.title),
            summary: non_empty(&draft.summary),
        })
    }

    /// Tier 3: the raw text as one section without formulas or exercises.
    pub fn emergency_section(raw_text: &str) -> Section {
        let paragraphs: Vec<String> = raw_text
            .split("\n\n")
            .map(|p| {
                p.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !is_page_marker(l))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .filter(|p| !p.is_empty())
            .collect();

        let body = if paragraphs.is_empty() {
            "No content could be extracted from this document.".to_string()
        } else {
            truncate_chars(&paragraphs.join("\n\n"), EMERGENCY_MAX_CHARS)
        };
        let description = paragraphs
            .first()
            .map(|p| truncate_chars(p, EMERGENCY_DESCRIPTION_CHARS))
            .unwrap_or_default();

        let topic = Topic {
            title: EMERGENCY_TITLE.to_string(),
            description,
            key_terms: key_terms(raw_text, 10),
            order: 0,
            level: 1,
            page: 1,
            parent: None,
            offset: 0,
        };

        let mut content = format!("## {EMERGENCY_TITLE}\n\n{body}\n");
        if !topic.key_terms.is_empty() {
            let _ = write!(content, "\n**Key terms:** {}\n", join_terms(&topic.key_terms));
        }

        Section {
            topic,
            formulas: Vec::new(),
            exercises: Vec::new(),
            content,
        }
    }

    /// Re-derives `section.content` from its topic, formulas and exercises.
    pub fn refresh_content(section: &mut Section) {
        section.content =
            Self::render_content(&section.topic, &section.formulas, &section.exercises);
    }

    pub fn render_content(topic: &Topic, formulas: &[Formula], exercises: &[Exercise]) -> String {
        let mut out = format!("## {}\n", topic.title);
        if !topic.description.is_empty() {
            let _ = write!(out, "\n{}\n", topic.description);
        }
        if !topic.key_terms.is_empty() {
            let _ = write!(out, "\n**Key terms:** {}\n", join_terms(&topic.key_terms));
        }

        if !formulas.is_empty() {
            out.push_str("\n### Formulas\n\n");
            for formula in formulas {
                let _ = writeln!(out, "- **{}**: ${}$", formula.name, formula.latex_or_text);
                if let Some(explanation) = &formula.explanation {
                    let _ = writeln!(out, "  - {explanation}");
                }
                if !formula.applications.is_empty() {
                    let _ = writeln!(out, "  - Applications: {}", formula.applications.join(", "));
                }
            }
        }

        if !exercises.is_empty() {
            out.push_str("\n### Exercises\n\n");
            for (idx, exercise) in exercises.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "{}. {} (difficulty {}/5)",
                    idx + 1,
                    exercise.question,
                    exercise.difficulty
                );
            }
        }
        out
    }

    /// Overview paragraph plus per-section counts.
    pub fn summary(
        sections: &[Section],
        comprehensive: &[ComprehensiveExercise],
        lead: Option<&str>,
    ) -> String {
        let total_formulas: usize = sections.iter().map(|s| s.formulas.len()).sum();
        let total_exercises: usize = sections.iter().map(|s| s.exercises.len()).sum();

        let mut out = String::new();
        if let Some(lead) = lead.map(str::trim).filter(|l| !l.is_empty()) {
            let _ = writeln!(out, "{lead}\n");
        }
        let _ = writeln!(
            out,
            "This study guide covers {} main topics with {} key formulas and {} practice exercises.",
            sections.len(),
            total_formulas,
            total_exercises
        );
        out.push_str("\n**Topics Covered:**\n");
        for section in sections {
            let _ = writeln!(
                out,
                "- **{}**: {} formulas, {} exercises",
                section.title(),
                section.formulas.len(),
                section.exercises.len()
            );
        }
        if !comprehensive.is_empty() {
            let _ = write!(
                out,
                "\nAdditionally, {} comprehensive exercises are provided to test integrated understanding.\n",
                comprehensive.len()
            );
        }
        out.trim_end().to_string()
    }

    /// `hint` if usable, else derived from the source file name.
    pub fn title(source_name: &str, hint: Option<&str>) -> String {
        if let Some(hint) = hint.map(str::trim).filter(|h| !h.is_empty()) {
            return hint.to_string();
        }
        let stem = Path::new(source_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(source_name);
        let words: Vec<String> = stem
            .split(['_', '-', ' '])
            .filter(|w| !w.is_empty())
            .map(capitalize)
            .collect();
        if words.is_empty() {
            "Study Notes".to_string()
        } else {
            format!("Study Notes: {}", words.join(" "))
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn is_page_marker(line: &str) -> bool {
    line.starts_with("--- Page ") && line.ends_with(" ---")
}

fn join_terms(terms: &BTreeSet<String>) -> String {
    terms.iter().cloned().collect::<Vec<_>>().join(", ")
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
