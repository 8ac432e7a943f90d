use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use studynotes::artifacts::{ArtifactFormat, ArtifactWriter, JsonArtifactWriter, writer_for};
use studynotes::cli::{Cli, Command};
use studynotes::config::NotesConfig;
use studynotes::extraction::{ContentExtractor, PlainTextExtractor};
use studynotes::generation::LlmGenerator;
use studynotes::jobs::JobManager;
use studynotes::model::RawInput;
use studynotes::patterns::PatternExtractor;
use studynotes::pipeline::{Orchestrator, PipelineOptions, SubmitOptions};
use studynotes::state_machine::JobStatus;
use studynotes::{logging, ui};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_json);

    let config = NotesConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Process {
            file,
            output,
            formats,
            no_ai,
            title,
        } => {
            let options = ProcessArgs {
                output: output.unwrap_or_else(|| config.output_dir.clone()),
                formats: if formats.is_empty() {
                    config.formats.clone()
                } else {
                    formats.into_iter().map(ArtifactFormat::from).collect()
                },
                no_ai,
                title,
                show_audit: cli.verbose > 0,
            };
            process(&config, &file, options).await
        }
        Command::Inspect { file } => inspect(&config, &file),
        Command::Show { job_id, output } => {
            let dir = output.unwrap_or_else(|| config.output_dir.clone());
            let notes = JsonArtifactWriter::load(&dir, &job_id)?;
            ui::print_notes(&notes);
            Ok(())
        }
    }
}

struct ProcessArgs {
    output: PathBuf,
    formats: Vec<ArtifactFormat>,
    no_ai: bool,
    title: Option<String>,
    show_audit: bool,
}

fn read_input(file: &Path) -> Result<RawInput> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());
    Ok(RawInput::new(name, bytes))
}

async fn process(config: &NotesConfig, file: &Path, args: ProcessArgs) -> Result<()> {
    let input = read_input(file)?;
    let generator = LlmGenerator::from_config(config);
    let enhanced = !args.no_ai && generator.is_online();
    info!(source = %input.name, enhanced, "processing document");

    let orchestrator = Orchestrator::new(
        Arc::new(generator),
        Arc::new(PlainTextExtractor),
        PipelineOptions::from(config),
    );
    let progress = Arc::new(ui::TerminalProgress::start(&input.name));
    let writers: Vec<Arc<dyn ArtifactWriter>> = args
        .formats
        .iter()
        .map(|&format| Arc::from(writer_for(format, &args.output)))
        .collect();
    let manager = writers
        .iter()
        .fold(JobManager::new(orchestrator), |manager, writer| {
            manager.with_writer(Arc::clone(writer))
        })
        .with_observer(progress.clone());

    let submit = SubmitOptions {
        title: args.title,
        enhanced,
        comprehensive_exercise_count: None,
    };
    let view = manager.process(input, submit).await?;
    progress.complete(&view);
    if args.show_audit {
        progress.print_audit(&manager.audit(&view.id)?);
    }

    if view.status != JobStatus::Completed {
        bail!("job {} failed: {}", view.id, view.message);
    }
    let notes = manager.get_result(&view.id)?;
    ui::print_notes(&notes);
    for writer in &writers {
        let path = writer.path_for(&view.id);
        if path.exists() {
            progress.artifact(&path);
        }
    }
    Ok(())
}

fn inspect(config: &NotesConfig, file: &Path) -> Result<()> {
    let input = read_input(file)?;
    let content = PlainTextExtractor.extract(&input.bytes)?;
    let extractor = PatternExtractor::new(PipelineOptions::from(config).patterns);
    let topics = extractor.topics(&content.text);
    let formulas = extractor.formulas(&content.text, &topics);
    ui::print_inspection(&topics, &formulas);
    Ok(())
}
