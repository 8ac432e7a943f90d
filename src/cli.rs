//! Interface de linha de comando do studynotes baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (process, inspect, show)
//! e flags globais (--verbose, --log-json, --config).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::artifacts::ArtifactFormat;

/// studynotes: transforma documentos em notas de estudo estruturadas.
#[derive(Debug, Parser)]
#[command(name = "studynotes", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Aumenta o nível de log (-v debug, -vv trace).
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emite logs em JSON.
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,

    /// Caminho para o arquivo de configuração (padrão: ./studynotes.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

/// Formato de saída aceito pela CLI, mapeado para [`ArtifactFormat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Json,
    Markdown,
}

impl From<FormatArg> for ArtifactFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Json => ArtifactFormat::Json,
            FormatArg::Markdown => ArtifactFormat::Markdown,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Gera notas de estudo a partir de um documento.
    Process {
        /// Documento de entrada (texto ou Markdown).
        file: PathBuf,

        /// Diretório de saída dos artefatos.
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Formatos a gravar; pode ser repetido.
        #[arg(long = "format", value_enum)]
        formats: Vec<FormatArg>,

        /// Desativa a geração por IA e usa apenas templates.
        #[arg(long, default_value_t = false)]
        no_ai: bool,

        /// Título das notas.
        #[arg(long)]
        title: Option<String>,
    },

    /// Lista os tópicos e fórmulas que o extrator de padrões encontra.
    Inspect {
        file: PathBuf,
    },

    /// Mostra notas já geradas a partir do id do job.
    Show {
        job_id: String,

        /// Diretório onde os artefatos foram gravados.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}
