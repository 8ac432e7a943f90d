//! Stage descriptors and the per-tier stage implementations.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use super::state::AgentState;
use super::{PipelineOptions, StageName, SubmitOptions};
use crate::error::{GenerationError, StageError, ValidationError};
use crate::exercises::ExerciseAssembler;
use crate::extraction::ContentExtractor;
use crate::generation::{
    FormulaBrief, GenerationRequest, GenerationResponse, Generator, TopicBrief,
};
use crate::model::{
    Exercise, ExerciseOwner, Formula, GeneratedNotes, NotesMetadata, RawInput, Section, Tier, Topic,
};
use crate::notes::NoteBuilder;
use crate::patterns::PatternExtractor;

const PRIMARY: &[Tier] = &[Tier::Primary];
const DEGRADABLE: &[Tier] = &[Tier::Enhanced, Tier::Template, Tier::Emergency];

/// One row of the stage table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub name: StageName,
    /// A required stage aborts the run when all its tiers fail.
    pub required: bool,
    /// Tried strictly in this order.
    pub tiers: &'static [Tier],
    /// Bound on each tier attempt.
    pub timeout: Duration,
}

/// The fixed stage sequence.
pub fn stage_table(options: &PipelineOptions) -> Vec<StageSpec> {
    StageName::ALL
        .iter()
        .map(|&name| {
            let (required, tiers) = match name {
                StageName::ExtractContent | StageName::Finalize => (true, PRIMARY),
                StageName::AnalyzeStructure | StageName::ExtractFormulas => (false, PRIMARY),
                StageName::GenerateNotes
                | StageName::CreateExercises
                | StageName::CreateComprehensiveExercises => (false, DEGRADABLE),
            };
            StageSpec {
                name,
                required,
                tiers,
                timeout: options.timeout_for(name),
            }
        })
        .collect()
}

/// Everything a stage implementation may read besides the state.
pub(super) struct StageRunner<'a, G> {
    pub generator: &'a G,
    pub extractor: &'a dyn ContentExtractor,
    pub patterns: &'a PatternExtractor,
    pub input: &'a RawInput,
    pub submit: &'a SubmitOptions,
    pub run_id: &'a str,
    pub comprehensive_count: usize,
}

impl<G: Generator> StageRunner<'_, G> {
    pub async fn execute(
        &self,
        stage: StageName,
        tier: Tier,
        state: AgentState,
    ) -> Result<AgentState, StageError> {
        match (stage, tier) {
            (StageName::ExtractContent, _) => self.extract_content(state),
            (StageName::AnalyzeStructure, _) => Ok(self.analyze_structure(state)),
            (StageName::ExtractFormulas, _) => Ok(self.extract_formulas(state)),
            (StageName::GenerateNotes, Tier::Enhanced) => self.enhanced_notes(state).await,
            (StageName::GenerateNotes, Tier::Template) => template_notes(state),
            (StageName::GenerateNotes, _) => Ok(emergency_notes(state)),
            (StageName::CreateExercises, Tier::Enhanced) => self.enhanced_exercises(state).await,
            (StageName::CreateExercises, Tier::Template) => Ok(template_exercises(state)),
            (StageName::CreateExercises, _) => Ok(state),
            (StageName::CreateComprehensiveExercises, Tier::Enhanced) => {
                self.enhanced_comprehensive(state).await
            }
            (StageName::CreateComprehensiveExercises, Tier::Template) => {
                Ok(self.template_comprehensive(state))
            }
            (StageName::CreateComprehensiveExercises, _) => Ok(state),
            (StageName::Finalize, _) => Ok(self.finalize(state)),
        }
    }

    fn extract_content(&self, mut state: AgentState) -> Result<AgentState, StageError> {
        let content = self.extractor.extract(&self.input.bytes)?;
        debug!(
            chars = content.text.len(),
            pages = content.pages,
            "content extracted"
        );
        state.raw_text = content.text;
        state.pages = content.pages;
        state.images = content.images;
        state.tables = content.tables;
        Ok(state)
    }

    fn analyze_structure(&self, mut state: AgentState) -> AgentState {
        state.topics = self.patterns.topics(&state.raw_text);
        debug!(topics = state.topics.len(), "structure analyzed");
        state
    }

    fn extract_formulas(&self, mut state: AgentState) -> AgentState {
        let formulas = self.patterns.formulas(&state.raw_text, &state.topics);
        if state.topics.is_empty() && !formulas.is_empty() {
            let overview = self
                .patterns
                .overview_topic(&state.raw_text, state.raw_text.len());
            state.topics.push(overview);
        }
        debug!(formulas = formulas.len(), "formulas extracted");
        state.formulas = formulas;
        state
    }

    fn require_enhanced(&self) -> Result<(), StageError> {
        if self.submit.enhanced {
            Ok(())
        } else {
            Err(GenerationError::Unavailable("generation disabled".into()).into())
        }
    }

    async fn enhanced_notes(&self, mut state: AgentState) -> Result<AgentState, StageError> {
        self.require_enhanced()?;
        if state.topics.is_empty() {
            return Err(ValidationError::new("no topics to write notes for").into());
        }
        let request = GenerationRequest::Notes {
            title_hint: self.submit.title.clone().unwrap_or_else(|| state.source_name.clone()),
            topics: state.topics.iter().map(TopicBrief::from).collect(),
            formulas: state.formulas.iter().map(FormulaBrief::from).collect(),
        };
        let GenerationResponse::Notes(draft) = self.generator.generate(&request).await? else {
            return Err(unexpected_response(&request));
        };
        let enhanced = NoteBuilder::enhanced_sections(&state.topics, &state.formulas, &draft)?;
        state.topics = enhanced.topics;
        state.formulas = enhanced.formulas;
        state.sections = enhanced.sections;
        state.title_hint = enhanced.title;
        state.summary_hint = enhanced.summary;
        Ok(state)
    }

    async fn enhanced_exercises(&self, mut state: AgentState) -> Result<AgentState, StageError> {
        self.require_enhanced()?;
        let formulas: Vec<Formula> = state
            .sections
            .iter()
            .flat_map(|s| s.formulas.iter().cloned())
            .collect();

        if formulas.is_empty() {
            return Err(ValidationError::new("no formulas to write exercises for").into());
        }

        let request = GenerationRequest::FormulaExercises {
            formulas: formulas.iter().map(FormulaBrief::from).collect(),
        };
        let GenerationResponse::FormulaExercises(drafts) = self.generator.generate(&request).await?
        else {
            return Err(unexpected_response(&request));
        };
        let mut exercises = ExerciseAssembler::from_drafts(&formulas, &drafts)?;
        exercises.extend(topic_exercises(&state.sections));
        attach_exercises(&mut state.sections, exercises);
        Ok(state)
    }

    async fn enhanced_comprehensive(
        &self,
        mut state: AgentState,
    ) -> Result<AgentState, StageError> {
        self.require_enhanced()?;
        let (topics, formulas) = section_entities(&state.sections);
        let mut out = Vec::new();
        for combination in ExerciseAssembler::combinations(&topics, &formulas, self.comprehensive_count) {
            let request = GenerationRequest::Comprehensive {
                topics: topics
                    .iter()
                    .filter(|t| combination.iter().any(|f| f.topic_order == t.order))
                    .map(TopicBrief::from)
                    .collect(),
                formulas: combination.iter().map(|f| FormulaBrief::from(*f)).collect(),
            };
            let GenerationResponse::Comprehensive(draft) = self.generator.generate(&request).await?
            else {
                return Err(unexpected_response(&request));
            };
            out.push(ExerciseAssembler::comprehensive_from_draft(&combination, &draft)?);
        }
        state.comprehensive_exercises = out;
        Ok(state)
    }

    fn template_comprehensive(&self, mut state: AgentState) -> AgentState {
        let (topics, formulas) = section_entities(&state.sections);
        state.comprehensive_exercises =
            ExerciseAssembler::combinations(&topics, &formulas, self.comprehensive_count)
                .iter()
                .map(|combination| ExerciseAssembler::comprehensive(&topics, combination))
                .collect();
        state
    }

    fn finalize(&self, mut state: AgentState) -> AgentState {
        let finalize = StageName::Finalize.to_string();
        if state.sections.is_empty() {
            warn!("no sections at finalize, using emergency baseline");
            state.sections.push(NoteBuilder::emergency_section(&state.raw_text));
            state.stage_tiers.insert(finalize.clone(), Tier::Emergency);
        } else {
            state.stage_tiers.entry(finalize).or_insert(Tier::Primary);
        }
        for section in &mut state.sections {
            NoteBuilder::refresh_content(section);
        }

        let hint = self.submit.title.as_deref().or(state.title_hint.as_deref());
        let title = NoteBuilder::title(&state.source_name, hint);
        let summary = NoteBuilder::summary(
            &state.sections,
            &state.comprehensive_exercises,
            state.summary_hint.as_deref(),
        );

        let metadata = NotesMetadata {
            source_name: state.source_name.clone(),
            pages: state.pages,
            images: state.images.len(),
            tables: state.tables.len(),
            total_topics: state.topics.len(),
            total_formulas: state.sections.iter().map(|s| s.formulas.len()).sum(),
            total_exercises: state.sections.iter().map(|s| s.exercises.len()).sum(),
            total_comprehensive_exercises: state.comprehensive_exercises.len(),
            generation: state
                .stage_tiers
                .get(StageName::GenerateNotes.as_str())
                .copied(),
            stage_tiers: state.stage_tiers.clone(),
            stage_errors: state
                .stage_errors
                .iter()
                .map(|(stage, info)| (stage.clone(), info.message.clone()))
                .collect(),
        };

        state.notes = Some(GeneratedNotes {
            id: self.run_id.to_string(),
            title,
            summary,
            sections: state.sections.clone(),
            comprehensive_exercises: state.comprehensive_exercises.clone(),
            metadata,
            created_at: Utc::now(),
        });
        state
    }
}

fn template_notes(mut state: AgentState) -> Result<AgentState, StageError> {
    state.sections = NoteBuilder::template_sections(&state.topics, &state.formulas)?;
    Ok(state)
}

fn emergency_notes(mut state: AgentState) -> AgentState {
    state.sections = vec![NoteBuilder::emergency_section(&state.raw_text)];
    state
}

fn template_exercises(mut state: AgentState) -> AgentState {
    let mut exercises: Vec<Exercise> = state
        .sections
        .iter()
        .flat_map(|s| s.formulas.iter().map(ExerciseAssembler::for_formula))
        .collect();
    exercises.extend(topic_exercises(&state.sections));
    attach_exercises(&mut state.sections, exercises);
    state
}

/// Conceptual exercises for sections that have no formulas to practise.
fn topic_exercises(sections: &[Section]) -> Vec<Exercise> {
    sections
        .iter()
        .filter(|s| s.formulas.is_empty())
        .filter_map(|s| ExerciseAssembler::for_topic(&s.topic))
        .collect()
}

fn attach_exercises(sections: &mut [Section], exercises: Vec<Exercise>) {
    for exercise in exercises {
        let target = sections.iter_mut().find(|s| match &exercise.owner {
            ExerciseOwner::Formula(id) => s.formulas.iter().any(|f| &f.id == id),
            ExerciseOwner::Topic(order) => s.topic.order == *order,
        });
        match target {
            Some(section) => section.exercises.push(exercise),
            None => debug!(owner = ?exercise.owner, "exercise without a section, dropped"),
        }
    }
    for section in sections {
        NoteBuilder::refresh_content(section);
    }
}

fn section_entities(sections: &[Section]) -> (Vec<Topic>, Vec<Formula>) {
    let topics = sections.iter().map(|s| s.topic.clone()).collect();
    let formulas = sections
        .iter()
        .flat_map(|s| s.formulas.iter().cloned())
        .collect();
    (topics, formulas)
}

fn unexpected_response(request: &GenerationRequest) -> StageError {
    GenerationError::MalformedResponse(format!(
        "response does not match {} request",
        request.task()
    ))
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_follows_fixed_order_and_classification() {
        let table = stage_table(&PipelineOptions::default());
        let names: Vec<StageName> = table.iter().map(|s| s.name).collect();
        assert_eq!(names, StageName::ALL.to_vec());

        let required: Vec<StageName> = table
            .iter()
            .filter(|s| s.required)
            .map(|s| s.name)
            .collect();
        assert_eq!(required, vec![StageName::ExtractContent, StageName::Finalize]);

        let notes = &table[3];
        assert_eq!(notes.tiers, DEGRADABLE);
        assert_eq!(table[0].tiers, PRIMARY);
    }

    #[test]
    fn table_applies_timeouts() {
        let mut options = PipelineOptions::default();
        options
            .stage_timeouts
            .insert("create_exercises".into(), Duration::from_secs(9));
        let table = stage_table(&options);
        assert_eq!(table[4].timeout, Duration::from_secs(9));
        assert_eq!(table[5].timeout, Duration::from_secs(120));
    }
}
