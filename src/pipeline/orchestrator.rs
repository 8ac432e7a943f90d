use std::sync::Arc;

use tracing::{debug, error, info, instrument};

use super::degradation::DegradationController;
use super::stages::{StageRunner, stage_table};
use super::state::AgentState;
use super::{CancellationFlag, PipelineOptions, ProgressSink, StageName, StageUpdate, SubmitOptions};
use crate::error::{PipelineError, StageError};
use crate::exercises::ExerciseAssembler;
use crate::extraction::ContentExtractor;
use crate::generation::Generator;
use crate::model::{GeneratedNotes, RawInput};
use crate::patterns::PatternExtractor;

/// Runs the stage table over one input.
pub struct Orchestrator<G> {
    generator: Arc<G>,
    extractor: Arc<dyn ContentExtractor>,
    patterns: PatternExtractor,
    options: PipelineOptions,
}

impl<G: Generator> Orchestrator<G> {
    pub fn new(
        generator: Arc<G>,
        extractor: Arc<dyn ContentExtractor>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            generator,
            extractor,
            patterns: PatternExtractor::new(options.patterns.clone()),
            options,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn patterns(&self) -> &PatternExtractor {
        &self.patterns
    }

    /// Produces notes for `input`, or the required stage that broke.
    ///
    /// Cancellation is checked before each stage; a cancelled run never
    /// reaches finalize.
    #[instrument(skip_all, fields(run_id = %run_id, source = %input.name))]
    pub async fn run(
        &self,
        run_id: &str,
        input: &RawInput,
        submit: &SubmitOptions,
        progress: &dyn ProgressSink,
        cancel: &CancellationFlag,
    ) -> Result<GeneratedNotes, PipelineError> {
        let stages = stage_table(&self.options);
        let total = stages.len();
        let runner = StageRunner {
            generator: &*self.generator,
            extractor: &*self.extractor,
            patterns: &self.patterns,
            input,
            submit,
            run_id,
            comprehensive_count: submit
                .comprehensive_exercise_count
                .unwrap_or(self.options.comprehensive_exercise_count),
        };
        let runner = &runner;
        let mut state = AgentState::new(&input.name);

        info!(stages = total, enhanced = submit.enhanced, "pipeline started");
        for (index, spec) in stages.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(stage = %spec.name, "run cancelled");
                return Err(PipelineError::Cancelled { stage: spec.name });
            }

            let percent = ((index + 1) * 100 / total) as u8;
            if spec.name == StageName::CreateComprehensiveExercises
                && !ExerciseAssembler::eligible_for_comprehensive(&state.sections)
            {
                debug!("fewer than two sections with formulas, skipping comprehensive exercises");
                progress.on_stage(&StageUpdate {
                    stage: spec.name,
                    index,
                    total,
                    percent,
                    tier: None,
                    message: format!("Skipped {}", spec.name),
                });
                continue;
            }

            let name = spec.name;
            let attempt = DegradationController::attempt(spec, &state, move |tier, s| {
                runner.execute(name, tier, s)
            })
            .await;

            let tier = attempt.tier;
            if tier.is_none() && spec.required {
                let cause = attempt
                    .failures
                    .into_iter()
                    .last()
                    .map(|f| f.error)
                    .unwrap_or_else(|| StageError::Internal("stage has no tiers".into()));
                error!(stage = %spec.name, %cause, "required stage failed");
                return Err(PipelineError::StageFailed {
                    stage: spec.name,
                    cause,
                });
            }
            state = attempt.state;

            let message = match tier {
                Some(tier) => format!("Completed {} ({tier})", spec.name),
                None => format!("Gave up on {}, keeping previous results", spec.name),
            };
            progress.on_stage(&StageUpdate {
                stage: spec.name,
                index,
                total,
                percent,
                tier,
                message,
            });
        }

        let notes = state.notes.take().ok_or(PipelineError::StageFailed {
            stage: StageName::Finalize,
            cause: StageError::Internal("finalize produced no notes".into()),
        })?;
        info!(
            sections = notes.sections.len(),
            formulas = notes.metadata.total_formulas,
            generation = ?notes.metadata.generation,
            "pipeline finished"
        );
        Ok(notes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExtractionError, GenerationError};
    use crate::extraction::{ExtractedContent, PlainTextExtractor};
    use crate::generation::{
        ComprehensiveDraft, ExerciseDraft, FormulaDraft, GenerationRequest, GenerationResponse,
        NotesDraft, SectionDraft,
    };
    use crate::model::{ErrorKind, ExerciseKind, Tier};
    use crate::pipeline::NoProgress;
    use std::sync::Mutex;

    /// Answers every request from the entities it is given.
    struct ScriptedGenerator {
        fail_tasks: Vec<&'static str>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl ScriptedGenerator {
        fn new() -> Self {
            Self {
                fail_tasks: vec![],
                calls: Mutex::new(vec![]),
            }
        }

        fn failing(tasks: &[&'static str]) -> Self {
            Self {
                fail_tasks: tasks.to_vec(),
                calls: Mutex::new(vec![]),
            }
        }
    }

    impl Generator for ScriptedGenerator {
        async fn generate(
            &self,
            request: &GenerationRequest,
        ) -> Result<GenerationResponse, GenerationError> {
            self.calls.lock().unwrap().push(request.task());
            if self.fail_tasks.contains(&request.task()) {
                return Err(GenerationError::MalformedResponse("scripted".into()));
            }
            Ok(match request {
                GenerationRequest::Notes {
                    topics, formulas, ..
                } => GenerationResponse::Notes(NotesDraft {
                    title: "Scripted Notes".into(),
                    summary: "A scripted summary.".into(),
                    sections: topics
                        .iter()
                        .map(|t| SectionDraft {
                            topic_order: t.order,
                            overview: format!("Overview of {}", t.title),
                            key_terms: vec![],
                        })
                        .collect(),
                    formulas: formulas
                        .iter()
                        .map(|f| FormulaDraft {
                            id: f.id.clone(),
                            name: Some(format!("Named {}", f.id)),
                            explanation: "Explained.".into(),
                            applications: vec![],
                        })
                        .collect(),
                }),
                GenerationRequest::FormulaExercises { formulas } => {
                    GenerationResponse::FormulaExercises(
                        formulas
                            .iter()
                            .map(|f| ExerciseDraft {
                                formula_id: f.id.clone(),
                                question: format!("Word problem for {}", f.id),
                                solution: None,
                                difficulty: 3,
                                hints: vec![],
                            })
                            .collect(),
                    )
                }
                GenerationRequest::Comprehensive { .. } => {
                    GenerationResponse::Comprehensive(ComprehensiveDraft {
                        question: "Combined problem".into(),
                        solution: None,
                        difficulty: 4,
                        hints: vec![],
                    })
                }
            })
        }
    }

    struct FailingExtractor;

    impl ContentExtractor for FailingExtractor {
        fn extract(&self, _bytes: &[u8]) -> Result<ExtractedContent, ExtractionError> {
            Err(ExtractionError::Unsupported("scanned image".into()))
        }
    }

    fn orchestrator(generator: ScriptedGenerator) -> Orchestrator<ScriptedGenerator> {
        Orchestrator::new(
            Arc::new(generator),
            Arc::new(PlainTextExtractor),
            PipelineOptions::default(),
        )
    }

    const TWO_TOPICS: &str = "# Kinematics\nVelocity $v = u + a t$ grows.\n\n# Dynamics\nForce $F = m a$ acts.\n";

    async fn run(
        orch: &Orchestrator<ScriptedGenerator>,
        text: &str,
        submit: SubmitOptions,
    ) -> Result<GeneratedNotes, PipelineError> {
        orch.run(
            "run-1",
            &RawInput::text("physics.md", text),
            &submit,
            &NoProgress,
            &CancellationFlag::new(),
        )
        .await
    }

    #[tokio::test]
    async fn enhanced_run_uses_tier_one_everywhere() {
        let orch = orchestrator(ScriptedGenerator::new());
        let notes = run(&orch, TWO_TOPICS, SubmitOptions::default()).await.unwrap();

        assert_eq!(notes.id, "run-1");
        assert_eq!(notes.title, "Scripted Notes");
        assert!(notes.summary.starts_with("A scripted summary."));
        assert_eq!(notes.sections.len(), 2);
        assert_eq!(notes.sections[1].formulas[0].name, "Named formula_2");
        assert_eq!(notes.sections[0].exercises[0].difficulty, 3);
        assert_eq!(notes.comprehensive_exercises.len(), 1);
        assert_eq!(notes.metadata.generation, Some(Tier::Enhanced));
        assert_eq!(notes.metadata.stage_tiers["create_exercises"], Tier::Enhanced);
        assert_eq!(notes.metadata.stage_tiers["finalize"], Tier::Primary);
        assert!(notes.metadata.stage_errors.is_empty());
        let calls = orch.generator.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["notes", "formula_exercises", "comprehensive"]);
    }

    #[tokio::test]
    async fn failed_tier_one_degrades_to_templates() {
        let orch = orchestrator(ScriptedGenerator::failing(&["notes", "formula_exercises"]));
        let notes = run(&orch, TWO_TOPICS, SubmitOptions::default()).await.unwrap();

        assert_eq!(notes.metadata.generation, Some(Tier::Template));
        assert_eq!(notes.title, "Study Notes: Physics");
        assert_eq!(notes.sections[0].exercises[0].kind, ExerciseKind::Application);
        assert!(notes.metadata.stage_errors["generate_notes"].contains("scripted"));
        assert_eq!(notes.metadata.stage_tiers["create_comprehensive_exercises"], Tier::Enhanced);
    }

    #[tokio::test]
    async fn disabled_generation_never_calls_generator() {
        let orch = orchestrator(ScriptedGenerator::new());
        let submit = SubmitOptions {
            enhanced: false,
            ..Default::default()
        };
        let notes = run(&orch, TWO_TOPICS, submit).await.unwrap();
        assert_eq!(notes.metadata.generation, Some(Tier::Template));
        assert!(orch.generator.calls.lock().unwrap().is_empty());
        assert_eq!(notes.comprehensive_exercises.len(), 1);
    }

    #[tokio::test]
    async fn comprehensive_is_skipped_without_two_formula_sections() {
        let orch = orchestrator(ScriptedGenerator::new());
        let notes = run(&orch, "# Only\n$x = y + 1$ here.\n", SubmitOptions::default())
            .await
            .unwrap();
        assert!(notes.comprehensive_exercises.is_empty());
        assert!(!notes.metadata.stage_errors.contains_key("create_comprehensive_exercises"));
        assert!(!notes.metadata.stage_tiers.contains_key("create_comprehensive_exercises"));
    }

    #[tokio::test]
    async fn exercises_without_formulas_come_from_templates() {
        let orch = orchestrator(ScriptedGenerator::new());
        let text = "# The Printing Press\nMovable type spread books across Europe.\n";
        let notes = run(&orch, text, SubmitOptions::default()).await.unwrap();

        assert_eq!(notes.metadata.stage_tiers["generate_notes"], Tier::Enhanced);
        assert_eq!(notes.metadata.stage_tiers["create_exercises"], Tier::Template);
        assert!(notes.metadata.stage_errors["create_exercises"].contains("no formulas"));
        assert_eq!(notes.sections[0].exercises[0].kind, ExerciseKind::Conceptual);
        let calls = orch.generator.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["notes"]);
    }

    #[tokio::test]
    async fn extraction_failure_aborts_run() {
        let orch = Orchestrator::new(
            Arc::new(ScriptedGenerator::new()),
            Arc::new(FailingExtractor),
            PipelineOptions::default(),
        );
        let err = run(&orch, "ignored", SubmitOptions::default()).await.unwrap_err();
        assert_eq!(err.stage(), StageName::ExtractContent);
        assert_eq!(err.to_info().kind, ErrorKind::Extraction);
    }

    #[tokio::test]
    async fn cancelled_run_stops_at_boundary() {
        let orch = orchestrator(ScriptedGenerator::new());
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let err = orch
            .run(
                "run-2",
                &RawInput::text("a.md", TWO_TOPICS),
                &SubmitOptions::default(),
                &NoProgress,
                &cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::Cancelled {
                stage: StageName::ExtractContent
            }
        );
    }

    #[tokio::test]
    async fn title_override_wins() {
        let orch = orchestrator(ScriptedGenerator::new());
        let submit = SubmitOptions {
            title: Some("Exam Prep".into()),
            ..Default::default()
        };
        let notes = run(&orch, TWO_TOPICS, submit).await.unwrap();
        assert_eq!(notes.title, "Exam Prep");
    }
}
