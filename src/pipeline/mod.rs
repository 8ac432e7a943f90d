//! The note-generation pipeline.
//!
//! A run threads one [`AgentState`] through the stage table in
//! [`stages::stage_table`]. Optional stages go through the
//! [`DegradationController`]; required stages abort the run when their only
//! tier fails.

mod degradation;
mod orchestrator;
mod stages;
mod state;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::NotesConfig;
use crate::model::Tier;
use crate::patterns::PatternOptions;

pub use degradation::{Attempt, DegradationController, TierFailure};
pub use orchestrator::Orchestrator;
pub use stages::{StageSpec, stage_table};
pub use state::{AgentState, validate_successor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    ExtractContent,
    AnalyzeStructure,
    ExtractFormulas,
    GenerateNotes,
    CreateExercises,
    CreateComprehensiveExercises,
    Finalize,
}

impl StageName {
    pub const ALL: [StageName; 7] = [
        StageName::ExtractContent,
        StageName::AnalyzeStructure,
        StageName::ExtractFormulas,
        StageName::GenerateNotes,
        StageName::CreateExercises,
        StageName::CreateComprehensiveExercises,
        StageName::Finalize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::ExtractContent => "extract_content",
            StageName::AnalyzeStructure => "analyze_structure",
            StageName::ExtractFormulas => "extract_formulas",
            StageName::GenerateNotes => "generate_notes",
            StageName::CreateExercises => "create_exercises",
            StageName::CreateComprehensiveExercises => "create_comprehensive_exercises",
            StageName::Finalize => "finalize",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-orchestrator settings, derived from [`NotesConfig`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Default bound on a single tier attempt.
    pub stage_timeout: Duration,
    /// Overrides keyed by stage name.
    pub stage_timeouts: BTreeMap<String, Duration>,
    pub comprehensive_exercise_count: usize,
    pub patterns: PatternOptions,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            stage_timeout: Duration::from_secs(120),
            stage_timeouts: BTreeMap::new(),
            comprehensive_exercise_count: 2,
            patterns: PatternOptions::default(),
        }
    }
}

impl From<&NotesConfig> for PipelineOptions {
    fn from(config: &NotesConfig) -> Self {
        Self {
            stage_timeout: Duration::from_secs(config.stage_timeout_secs),
            stage_timeouts: config
                .stage_timeouts
                .iter()
                .map(|(k, v)| (k.clone(), Duration::from_secs(*v)))
                .collect(),
            comprehensive_exercise_count: config.comprehensive_exercise_count,
            patterns: PatternOptions {
                max_key_terms: config.max_key_terms,
                context_lines: config.topic_context_lines,
                ..PatternOptions::default()
            },
        }
    }
}

impl PipelineOptions {
    pub fn timeout_for(&self, stage: StageName) -> Duration {
        self.stage_timeouts
            .get(stage.as_str())
            .copied()
            .unwrap_or(self.stage_timeout)
    }
}

/// Per-submission options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOptions {
    /// Overrides any generated or derived title.
    pub title: Option<String>,
    /// When false, every Tier 1 attempt fails immediately.
    pub enhanced: bool,
    pub comprehensive_exercise_count: Option<usize>,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            title: None,
            enhanced: true,
            comprehensive_exercise_count: None,
        }
    }
}

/// Emitted after every stage, skipped ones included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageUpdate {
    pub stage: StageName,
    pub index: usize,
    pub total: usize,
    /// `(index + 1) * 100 / total`
    pub percent: u8,
    /// Tier that produced the stage result, `None` if skipped or exhausted.
    pub tier: Option<Tier>,
    pub message: String,
}

pub trait ProgressSink: Send + Sync {
    fn on_stage(&self, update: &StageUpdate);
}

/// Discards updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_stage(&self, _update: &StageUpdate) {}
}

/// Cooperative cancellation, checked at stage boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
