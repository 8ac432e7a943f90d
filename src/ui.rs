//! Interface de terminal do studynotes: barra de progresso e saída colorida.
//!
//! Usa as crates `indicatif` para a barra de progresso e `console` para
//! estilização com cores. O [`TerminalProgress`] acompanha visualmente
//! os estágios de um job no terminal.

use std::path::Path;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::model::{Formula, GeneratedNotes, Tier, Topic};
use crate::pipeline::{ProgressSink, StageUpdate};
use crate::state_machine::{AuditRecord, JobStatus, JobStatusView};

/// Indicador visual de progresso para a execução de um job no terminal.
///
/// Exibe uma barra de 0 a 100 durante o processamento e mensagens
/// coloridas para sucesso (verde), falha (vermelho) e degradação (amarelo).
pub struct TerminalProgress {
    // Barra de progresso do indicatif.
    pb: ProgressBar,
    // Estilo verde para mensagens de sucesso.
    green: Style,
    // Estilo vermelho para mensagens de falha.
    red: Style,
    // Estilo amarelo para estágios degradados.
    yellow: Style,
    dim: Style,
}

impl TerminalProgress {
    /// Inicia a barra com o nome do documento.
    pub fn start(source: &str) -> Self {
        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
                .expect("invalid template")
                .progress_chars("=> "),
        );
        pb.set_message(format!("Processing {source}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }

    /// Finaliza a barra e exibe o status final do job.
    pub fn complete(&self, view: &JobStatusView) {
        self.pb.finish_and_clear();
        match view.status {
            JobStatus::Completed => {
                println!("  {} Notes generated (job {})", self.green.apply_to("✓"), view.id);
            }
            _ => {
                println!("  {} Job failed: {}", self.red.apply_to("✗"), view.message);
            }
        }
    }

    pub fn artifact(&self, path: &Path) {
        println!("  {} {}", self.dim.apply_to("→"), path.display());
    }

    /// Imprime o registro de auditoria formatado em JSON com estilo colorido.
    pub fn print_audit(&self, record: &AuditRecord) {
        let status_style = match record.status {
            JobStatus::Completed => &self.green,
            JobStatus::Failed => &self.red,
            _ => &self.yellow,
        };
        println!();
        println!("{}", status_style.apply_to("─── Audit Record ───"));
        println!(
            "{}",
            serde_json::to_string_pretty(record).unwrap_or_default()
        );
    }
}

impl ProgressSink for TerminalProgress {
    fn on_stage(&self, update: &StageUpdate) {
        self.pb.set_position(u64::from(update.percent));
        self.pb.set_message(update.message.clone());
        if matches!(update.tier, Some(Tier::Template | Tier::Emergency)) {
            self.pb.println(format!(
                "  {} {} fell back to {}",
                self.yellow.apply_to("↓"),
                update.stage,
                update.tier.map(|t| t.to_string()).unwrap_or_default()
            ));
        }
    }
}

/// Resumo das notas: título, contagens e tiers por estágio.
pub fn print_notes(notes: &GeneratedNotes) {
    let bold = Style::new().bold();
    let dim = Style::new().dim();
    let meta = &notes.metadata;

    println!("{}", bold.apply_to(&notes.title));
    println!(
        "  {} sections, {} formulas, {} exercises, {} comprehensive",
        notes.sections.len(),
        meta.total_formulas,
        meta.total_exercises,
        meta.total_comprehensive_exercises
    );
    for section in &notes.sections {
        println!(
            "  - {} {}",
            section.title(),
            dim.apply_to(format!(
                "({} formulas, {} exercises)",
                section.formulas.len(),
                section.exercises.len()
            ))
        );
    }
    for (stage, tier) in &meta.stage_tiers {
        println!("  {} {stage}: {tier}", dim.apply_to("·"));
    }
    for (stage, message) in &meta.stage_errors {
        println!("  {} {stage}: {message}", Style::new().yellow().apply_to("!"));
    }
}

/// Saída do subcomando `inspect`.
pub fn print_inspection(topics: &[Topic], formulas: &[Formula]) {
    let bold = Style::new().bold();
    let dim = Style::new().dim();

    println!("{}", bold.apply_to(format!("Topics ({})", topics.len())));
    for topic in topics {
        let indent = "  ".repeat(usize::from(topic.level.max(1)));
        println!(
            "{indent}{} {}",
            topic.title,
            dim.apply_to(format!("[page {}, {} terms]", topic.page, topic.key_terms.len()))
        );
    }

    println!("{}", bold.apply_to(format!("Formulas ({})", formulas.len())));
    for formula in formulas {
        println!(
            "  {} {} {}",
            formula.id,
            formula.latex_or_text,
            dim.apply_to(format!("[{:?}, topic {}]", formula.kind, formula.topic_order))
        );
    }
}
