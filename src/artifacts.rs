//! Persisting finished notes.
//!
//! Every writer stores one file per job under its output directory, named
//! after the job id: `<dir>/<job_id>.json` and `<dir>/<job_id>.md`. The JSON
//! file is the complete artifact and can be loaded back with
//! [`JsonArtifactWriter::load`].

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ArtifactError;
use crate::model::{Exercise, GeneratedNotes, Section};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    Json,
    Markdown,
}

impl ArtifactFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactFormat::Json => "json",
            ArtifactFormat::Markdown => "md",
        }
    }
}

pub trait ArtifactWriter: Send + Sync {
    fn format(&self) -> ArtifactFormat;

    /// Where the artifact for `job_id` lives.
    fn path_for(&self, job_id: &str) -> PathBuf;

    fn write(&self, notes: &GeneratedNotes) -> Result<PathBuf, ArtifactError>;
}

/// Builds the writer for `format` rooted at `dir`.
pub fn writer_for(format: ArtifactFormat, dir: impl Into<PathBuf>) -> Box<dyn ArtifactWriter> {
    match format {
        ArtifactFormat::Json => Box::new(JsonArtifactWriter::new(dir)),
        ArtifactFormat::Markdown => Box::new(MarkdownArtifactWriter::new(dir)),
    }
}

fn artifact_path(dir: &Path, job_id: &str, format: ArtifactFormat) -> PathBuf {
    dir.join(format!("{job_id}.{}", format.extension()))
}

fn write_file(dir: &Path, path: &Path, contents: &str) -> Result<(), ArtifactError> {
    fs::create_dir_all(dir).map_err(|e| ArtifactError::io(dir, e))?;
    fs::write(path, contents).map_err(|e| ArtifactError::io(path, e))?;
    debug!(path = %path.display(), bytes = contents.len(), "artifact written");
    Ok(())
}

#[derive(Debug, Clone)]
pub struct JsonArtifactWriter {
    dir: PathBuf,
}

impl JsonArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Reads back the artifact stored for `job_id`.
    pub fn load(dir: impl AsRef<Path>, job_id: &str) -> Result<GeneratedNotes, ArtifactError> {
        let path = artifact_path(dir.as_ref(), job_id, ArtifactFormat::Json);
        if !path.exists() {
            return Err(ArtifactError::Missing(job_id.to_string()));
        }
        let contents = fs::read_to_string(&path).map_err(|e| ArtifactError::io(&path, e))?;
        Ok(serde_json::from_str(&contents)?)
    }
}

impl ArtifactWriter for JsonArtifactWriter {
    fn format(&self) -> ArtifactFormat {
        ArtifactFormat::Json
    }

    fn path_for(&self, job_id: &str) -> PathBuf {
        artifact_path(&self.dir, job_id, ArtifactFormat::Json)
    }

    fn write(&self, notes: &GeneratedNotes) -> Result<PathBuf, ArtifactError> {
        let path = self.path_for(&notes.id);
        let json = serde_json::to_string_pretty(notes)?;
        write_file(&self.dir, &path, &json)?;
        Ok(path)
    }
}

#[derive(Debug, Clone)]
pub struct MarkdownArtifactWriter {
    dir: PathBuf,
}

impl MarkdownArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ArtifactWriter for MarkdownArtifactWriter {
    fn format(&self) -> ArtifactFormat {
        ArtifactFormat::Markdown
    }

    fn path_for(&self, job_id: &str) -> PathBuf {
        artifact_path(&self.dir, job_id, ArtifactFormat::Markdown)
    }

    fn write(&self, notes: &GeneratedNotes) -> Result<PathBuf, ArtifactError> {
        let path = self.path_for(&notes.id);
        write_file(&self.dir, &path, &render_markdown(notes))?;
        Ok(path)
    }
}

fn stars(difficulty: u8) -> String {
    let filled = usize::from(difficulty.min(5));
    format!("{}{}", "★".repeat(filled), "☆".repeat(5 - filled))
}

/// Renders the whole document as Markdown.
pub fn render_markdown(notes: &GeneratedNotes) -> String {
    let mut out = format!("# {}\n\n", notes.title);
    let _ = writeln!(out, "_Generated {}_\n", notes.created_at.format("%Y-%m-%d %H:%M UTC"));
    if !notes.summary.trim().is_empty() {
        let _ = writeln!(out, "## Summary\n\n{}\n", notes.summary.trim_end());
    }

    for (idx, section) in notes.sections.iter().enumerate() {
        render_section(&mut out, idx + 1, section);
    }

    if !notes.comprehensive_exercises.is_empty() {
        out.push_str("## Comprehensive Exercises\n\n");
        for (idx, exercise) in notes.comprehensive_exercises.iter().enumerate() {
            let _ = writeln!(
                out,
                "{}. {} {}",
                idx + 1,
                exercise.question,
                stars(exercise.difficulty)
            );
            if !exercise.formula_ids.is_empty() {
                let _ = writeln!(out, "   - Uses: {}", exercise.formula_ids.join(", "));
            }
            render_hints(&mut out, &exercise.hints, exercise.solution.as_deref());
        }
        out.push('\n');
    }
    out
}

fn render_section(out: &mut String, number: usize, section: &Section) {
    let topic = &section.topic;
    let _ = writeln!(out, "## {number}. {}\n", topic.title);
    if !topic.description.trim().is_empty() {
        let _ = writeln!(out, "{}\n", topic.description.trim());
    }
    if !topic.key_terms.is_empty() {
        let terms: Vec<&str> = topic.key_terms.iter().map(String::as_str).collect();
        let _ = writeln!(out, "**Key terms:** {}\n", terms.join(", "));
    }

    if !section.formulas.is_empty() {
        out.push_str("### Formulas\n\n");
        for formula in &section.formulas {
            let _ = writeln!(out, "**{}**\n\n$${}$$\n", formula.name, formula.latex_or_text);
            if let Some(explanation) = &formula.explanation {
                let _ = writeln!(out, "{explanation}\n");
            }
            if !formula.applications.is_empty() {
                let _ = writeln!(out, "Applications: {}\n", formula.applications.join("; "));
            }
        }
    }

    if !section.exercises.is_empty() {
        out.push_str("### Exercises\n\n");
        for (idx, exercise) in section.exercises.iter().enumerate() {
            render_exercise(out, idx + 1, exercise);
        }
        out.push('\n');
    }
}

fn render_exercise(out: &mut String, number: usize, exercise: &Exercise) {
    let _ = writeln!(
        out,
        "{number}. {} {}",
        exercise.question,
        stars(exercise.difficulty)
    );
    render_hints(out, &exercise.hints, exercise.solution.as_deref());
}

fn render_hints(out: &mut String, hints: &[String], solution: Option<&str>) {
    for hint in hints {
        let _ = writeln!(out, "   - Hint: {hint}");
    }
    if let Some(solution) = solution {
        let _ = writeln!(out, "   - Solution: {solution}");
    }
}
