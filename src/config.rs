//! Configuração do studynotes carregada a partir de `studynotes.toml`.
//!
//! A struct [`NotesConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `ANTHROPIC_API_KEY` tem precedência sobre o arquivo.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::artifacts::ArtifactFormat;
use crate::error::NotesError;

/// Nome do arquivo procurado no diretório atual.
pub const CONFIG_FILE: &str = "studynotes.toml";

/// Configuração de nível superior carregada de `studynotes.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct NotesConfig {
    /// Chave da API Anthropic. Vazia desativa a geração por IA.
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Substitui a URL base da API (útil para proxies e testes).
    #[serde(default)]
    pub api_url: Option<String>,

    /// Limite de cada chamada ao modelo, em segundos.
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,

    /// Limite de cada tentativa de estágio, em segundos.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,

    /// Limites por estágio, pelo nome do estágio (`generate_notes`, ...).
    #[serde(default)]
    pub stage_timeouts: BTreeMap<String, u64>,

    #[serde(default = "default_comprehensive_exercise_count")]
    pub comprehensive_exercise_count: usize,

    #[serde(default = "default_max_key_terms")]
    pub max_key_terms: usize,

    /// Máximo de linhas usadas como descrição de um tópico.
    #[serde(default = "default_topic_context_lines")]
    pub topic_context_lines: usize,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_formats")]
    pub formats: Vec<ArtifactFormat>,
}

fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_generation_timeout_secs() -> u64 {
    60
}

fn default_stage_timeout_secs() -> u64 {
    120
}

fn default_comprehensive_exercise_count() -> usize {
    2
}

fn default_max_key_terms() -> usize {
    10
}

fn default_topic_context_lines() -> usize {
    50
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("generated_notes")
}

fn default_formats() -> Vec<ArtifactFormat> {
    vec![ArtifactFormat::Json, ArtifactFormat::Markdown]
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            api_url: None,
            generation_timeout_secs: default_generation_timeout_secs(),
            stage_timeout_secs: default_stage_timeout_secs(),
            stage_timeouts: BTreeMap::new(),
            comprehensive_exercise_count: default_comprehensive_exercise_count(),
            max_key_terms: default_max_key_terms(),
            topic_context_lines: default_topic_context_lines(),
            output_dir: default_output_dir(),
            formats: default_formats(),
        }
    }
}

impl NotesConfig {
    /// Carrega a configuração de `path`, ou de `studynotes.toml` no diretório atual.
    ///
    /// Um caminho explícito precisa existir; o arquivo padrão é opcional.
    pub fn load(path: Option<&Path>) -> Result<Self, NotesError> {
        let mut config = match path {
            Some(path) if !path.exists() => {
                return Err(NotesError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            Some(path) => Self::from_file(path)?,
            None if Path::new(CONFIG_FILE).exists() => Self::from_file(Path::new(CONFIG_FILE))?,
            None => Self::default(),
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração para a chave API.
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY")
            && !key.is_empty()
        {
            config.api_key = key;
        }

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, NotesError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str::<NotesConfig>(&contents)?)
    }

    /// Se a geração por IA (Tier 1) está disponível.
    pub fn generation_enabled(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = NotesConfig::default();
        assert_eq!(config.max_tokens, 4096);
        assert_eq!(config.generation_timeout_secs, 60);
        assert_eq!(config.stage_timeout_secs, 120);
        assert_eq!(config.comprehensive_exercise_count, 2);
        assert_eq!(config.output_dir, PathBuf::from("generated_notes"));
        assert_eq!(config.formats.len(), 2);
        assert!(!config.generation_enabled());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            api_key = "sk-test-123"
            max_key_terms = 5
            formats = ["markdown"]

            [stage_timeouts]
            generate_notes = 30
        "#;
        let config: NotesConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.api_key, "sk-test-123");
        assert_eq!(config.max_key_terms, 5);
        assert_eq!(config.formats, vec![ArtifactFormat::Markdown]);
        assert_eq!(config.stage_timeouts["generate_notes"], 30);
        assert_eq!(config.topic_context_lines, 50);
        assert!(config.generation_enabled());
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "comprehensive_exercise_count = 4\noutput_dir = \"out\"\n").unwrap();

        let config = NotesConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(config.comprehensive_exercise_count, 4);
        assert_eq!(config.output_dir, PathBuf::from("out"));
    }

    #[test]
    fn load_rejects_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = NotesConfig::load(Some(dir.path().join("absent.toml").as_path())).unwrap_err();
        assert!(matches!(err, NotesError::Config(_)));
    }

    #[test]
    fn load_reports_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "max_tokens = \"lots\"").unwrap();
        assert!(matches!(
            NotesConfig::load(Some(path.as_path())),
            Err(NotesError::Toml(_))
        ));
    }
}
