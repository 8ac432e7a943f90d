use std::sync::Arc;
use std::time::Duration;

use studynotes::error::{ExtractionError, GenerationError, JobError};
use studynotes::extraction::{ContentExtractor, ExtractedContent, PlainTextExtractor};
use studynotes::generation::{
    GenerationRequest, GenerationResponse, Generator, LlmGenerator, LlmSettings, NotesDraft,
    SectionDraft,
};
use studynotes::jobs::JobManager;
use studynotes::model::{ErrorKind, RawInput, Tier};
use studynotes::patterns::PatternExtractor;
use studynotes::pipeline::{Orchestrator, PipelineOptions, SubmitOptions};
use studynotes::state_machine::JobStatus;

const LINEAR_REGRESSION: &str =
    "# Linear Regression\n\nThe fitted line is $y = \\beta_0 + \\beta_1 x$ for each observation.\n";

fn offline() -> LlmGenerator {
    LlmGenerator::offline(LlmSettings {
        model: "test-model".into(),
        max_tokens: 512,
        timeout: Duration::from_secs(1),
    })
}

fn manager_with<G: Generator + 'static>(
    generator: G,
    extractor: Arc<dyn ContentExtractor>,
    options: PipelineOptions,
) -> JobManager<G> {
    JobManager::new(Orchestrator::new(Arc::new(generator), extractor, options))
}

fn offline_manager() -> JobManager<LlmGenerator> {
    manager_with(offline(), Arc::new(PlainTextExtractor), PipelineOptions::default())
}

fn no_ai() -> SubmitOptions {
    SubmitOptions {
        enhanced: false,
        ..Default::default()
    }
}

struct BrokenExtractor;

impl ContentExtractor for BrokenExtractor {
    fn extract(&self, _bytes: &[u8]) -> Result<ExtractedContent, ExtractionError> {
        Err(ExtractionError::Failed("adapter crashed".into()))
    }
}

/// Takes longer than any test stage timeout.
struct SlowGenerator;

impl Generator for SlowGenerator {
    async fn generate(
        &self,
        _request: &GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Err(GenerationError::Unavailable("too slow".into()))
    }
}

/// Writes an overview for every topic and nothing else.
struct OverviewGenerator;

impl Generator for OverviewGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        match request {
            GenerationRequest::Notes { topics, .. } => Ok(GenerationResponse::Notes(NotesDraft {
                title: "Regression Basics".into(),
                summary: "Lines through data.".into(),
                sections: topics
                    .iter()
                    .map(|t| SectionDraft {
                        topic_order: t.order,
                        overview: format!("{} in one paragraph.", t.title),
                        key_terms: vec!["residual".into()],
                    })
                    .collect(),
                formulas: vec![],
            })),
            _ => Err(GenerationError::RateLimited {
                retry_after_ms: 1000,
            }),
        }
    }
}

#[tokio::test]
async fn linear_regression_scenario_uses_templates() {
    let manager = offline_manager();
    let view = manager
        .process(RawInput::text("regression.md", LINEAR_REGRESSION), no_ai())
        .await
        .unwrap();
    assert_eq!(view.status, JobStatus::Completed);

    let notes = manager.get_result(&view.id).unwrap();
    assert_eq!(notes.sections.len(), 1);
    assert_eq!(notes.sections[0].title(), "Linear Regression");
    assert_eq!(notes.sections[0].formulas.len(), 1);
    assert_eq!(
        notes.sections[0].formulas[0].latex_or_text,
        "y = \\beta_0 + \\beta_1 x"
    );
    assert_eq!(notes.metadata.total_formulas, 1);
    assert_eq!(notes.metadata.generation, Some(Tier::Template));
    assert!(notes.metadata.stage_errors.contains_key("generate_notes"));
}

#[tokio::test]
async fn every_readable_input_yields_sections() {
    let inputs = [
        LINEAR_REGRESSION,
        "Just a single sentence without structure.",
        "# One\nalpha\n# Two\nbeta\n## Two point one\ngamma\n",
        "x",
        "--- Page 1 ---\nIntro text.\n--- Page 2 ---\n# Later\nMore text here.\n",
    ];
    let manager = offline_manager();
    for text in inputs {
        let view = manager
            .process(RawInput::text("input.txt", text), SubmitOptions::default())
            .await
            .unwrap();
        let notes = manager.get_result(&view.id).unwrap();
        assert!(!notes.sections.is_empty(), "no sections for {text:?}");
        assert!(notes.sections.iter().all(|s| !s.title().trim().is_empty()));
    }
}

#[tokio::test]
async fn text_without_formulas_still_completes() {
    let manager = offline_manager();
    let view = manager
        .process(
            RawInput::text(
                "history.md",
                "# The Printing Press\nMovable type changed how books were made and shared.\n",
            ),
            no_ai(),
        )
        .await
        .unwrap();
    let notes = manager.get_result(&view.id).unwrap();
    assert_eq!(notes.metadata.total_formulas, 0);
    assert!(notes.sections.iter().all(|s| s.formulas.is_empty()));
    assert!(!notes.sections.is_empty());
    assert!(notes.comprehensive_exercises.is_empty());
}

#[tokio::test]
async fn extraction_failure_fails_the_job() {
    let manager = manager_with(offline(), Arc::new(BrokenExtractor), PipelineOptions::default());
    let id = manager
        .submit(RawInput::text("scan.pdf", "ignored"), SubmitOptions::default())
        .unwrap();
    let view = manager.wait(&id).await.unwrap();

    assert_eq!(view.status, JobStatus::Failed);
    let error = view.error.unwrap();
    assert_eq!(error.stage, "extract_content");
    assert_eq!(error.kind, ErrorKind::Extraction);
    assert!(error.message.contains("adapter crashed"));

    assert_eq!(
        manager.get_result(&id),
        Err(JobError::NotReady {
            id: id.clone(),
            status: JobStatus::Failed
        })
    );
}

#[tokio::test]
async fn progress_is_monotonic_and_ends_at_100() {
    let manager = offline_manager();
    let id = manager
        .submit(
            RawInput::text("regression.md", LINEAR_REGRESSION),
            SubmitOptions::default(),
        )
        .unwrap();
    manager.wait(&id).await.unwrap();

    let history = manager.progress_history(&id).unwrap();
    assert!(history.windows(2).all(|w| w[0] <= w[1]), "{history:?}");
    assert_eq!(history.first(), Some(&0));
    assert_eq!(history.last(), Some(&100));
}

#[tokio::test]
async fn terminal_results_are_stable() {
    let manager = offline_manager();
    let view = manager
        .process(RawInput::text("regression.md", LINEAR_REGRESSION), no_ai())
        .await
        .unwrap();
    let first = manager.get_result(&view.id).unwrap();
    let second = manager.get_result(&view.id).unwrap();
    assert_eq!(first, second);
    assert_eq!(manager.get_status(&view.id).unwrap(), view);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let manager = offline_manager();
    assert_eq!(
        manager.get_status("does-not-exist"),
        Err(JobError::NotFound("does-not-exist".into()))
    );
    assert_eq!(
        manager.get_result("does-not-exist"),
        Err(JobError::NotFound("does-not-exist".into()))
    );
}

#[tokio::test]
async fn cancelled_job_fails_without_finalizing() {
    let manager = offline_manager();
    let id = manager
        .submit(
            RawInput::text("regression.md", LINEAR_REGRESSION),
            SubmitOptions::default(),
        )
        .unwrap();
    manager.cancel(&id).unwrap();

    let view = manager.wait(&id).await.unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.error.unwrap().kind, ErrorKind::Cancelled);
    assert!(manager.get_result(&id).is_err());
}

#[tokio::test]
async fn slow_generation_times_out_into_templates() {
    let mut options = PipelineOptions::default();
    for stage in ["generate_notes", "create_exercises"] {
        options
            .stage_timeouts
            .insert(stage.into(), Duration::from_millis(50));
    }
    let manager = manager_with(SlowGenerator, Arc::new(PlainTextExtractor), options);
    let view = manager
        .process(
            RawInput::text("regression.md", LINEAR_REGRESSION),
            SubmitOptions::default(),
        )
        .await
        .unwrap();

    let notes = manager.get_result(&view.id).unwrap();
    assert_eq!(notes.metadata.generation, Some(Tier::Template));
    assert!(notes.metadata.stage_errors["generate_notes"].contains("timed out"));
    assert_eq!(notes.sections[0].formulas.len(), 1);

    let audit = manager.audit(&view.id).unwrap();
    assert_eq!(audit.stage_tiers["create_exercises"], Tier::Template);
}

#[tokio::test]
async fn partial_ai_output_mixes_tiers() {
    let manager = manager_with(
        OverviewGenerator,
        Arc::new(PlainTextExtractor),
        PipelineOptions::default(),
    );
    let view = manager
        .process(
            RawInput::text("regression.md", LINEAR_REGRESSION),
            SubmitOptions::default(),
        )
        .await
        .unwrap();
    let notes = manager.get_result(&view.id).unwrap();

    assert_eq!(notes.title, "Regression Basics");
    assert_eq!(notes.metadata.stage_tiers["generate_notes"], Tier::Enhanced);
    assert_eq!(notes.metadata.stage_tiers["create_exercises"], Tier::Template);
    assert!(notes.sections[0].topic.key_terms.contains("residual"));
    assert!(!notes.sections[0].exercises.is_empty());
}

#[tokio::test]
async fn failed_template_tier_falls_through_to_emergency() {
    let manager = offline_manager();
    let view = manager
        .process(
            RawInput::text("scan.txt", "--- Page 1 ---\n--- Page 2 ---\n"),
            SubmitOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(view.status, JobStatus::Completed);

    let notes = manager.get_result(&view.id).unwrap();
    assert_eq!(notes.metadata.generation, Some(Tier::Emergency));
    assert_eq!(notes.sections.len(), 1);
    assert_eq!(notes.sections[0].title(), "Document Overview");
    // The enhanced tier's cause is kept, not the template tier's.
    assert_eq!(
        notes.metadata.stage_errors["generate_notes"],
        "invalid stage output: no topics to write notes for"
    );
    assert_eq!(notes.metadata.pages, 2);
}

#[test]
fn pattern_extraction_is_idempotent() {
    let text = "# Kinematics\n$v = u + a t$\n\n## Energy\nThe energy is given by E = m c^2\n";
    let extractor = PatternExtractor::default();

    let topics_a = extractor.topics(text);
    let topics_b = extractor.topics(text);
    assert_eq!(topics_a, topics_b);

    let formulas_a = extractor.formulas(text, &topics_a);
    let formulas_b = extractor.formulas(text, &topics_b);
    let bodies = |fs: &[studynotes::model::Formula]| {
        fs.iter()
            .map(|f| (f.latex_or_text.clone(), f.topic_order))
            .collect::<Vec<_>>()
    };
    assert_eq!(bodies(&formulas_a), bodies(&formulas_b));
    assert!(!formulas_a.is_empty());
}
