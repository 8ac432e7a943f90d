use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::{
    ComprehensiveDraft, ExerciseDraft, GenerationRequest, GenerationResponse, Generator,
    NotesDraft,
};
use crate::anthropic::{AnthropicClient, MessageSender, MessagesRequest};
use crate::config::NotesConfig;
use crate::error::GenerationError;

const SYSTEM_PROMPT: &str = "You are an expert educator who writes concise, accurate study notes. \
     Respond with ONLY one valid JSON object, no prose before or after it.";

static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub model: String,
    pub max_tokens: u32,
    /// Per-call bound; exceeding it is a [`GenerationError::Timeout`].
    pub timeout: Duration,
}

impl From<&NotesConfig> for LlmSettings {
    fn from(config: &NotesConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.generation_timeout_secs),
        }
    }
}

/// Generator backed by the Messages API. Without a sender every call fails
/// with [`GenerationError::Unavailable`], which pushes stages to Tier 2.
pub struct LlmGenerator<S = AnthropicClient> {
    sender: Option<S>,
    settings: LlmSettings,
}

impl<S: MessageSender> LlmGenerator<S> {
    pub fn new(sender: S, settings: LlmSettings) -> Self {
        Self {
            sender: Some(sender),
            settings,
        }
    }

    pub fn offline(settings: LlmSettings) -> Self {
        Self {
            sender: None,
            settings,
        }
    }

    pub fn is_online(&self) -> bool {
        self.sender.is_some()
    }
}

impl LlmGenerator<AnthropicClient> {
    /// Builds the HTTP-backed generator, or an offline one when no key is set.
    pub fn from_config(config: &NotesConfig) -> Self {
        let settings = LlmSettings::from(config);
        if !config.generation_enabled() {
            debug!("no API key configured, AI generation disabled");
            return Self::offline(settings);
        }
        let client = match &config.api_url {
            Some(url) => AnthropicClient::with_base_url(config.api_key.clone(), url.clone()),
            None => AnthropicClient::new(config.api_key.clone()),
        }
        .and_then(|client| client.with_timeout(settings.timeout));
        match client {
            Ok(client) => Self::new(client, settings),
            Err(e) => {
                warn!("could not build API client, AI generation disabled: {e}");
                Self::offline(settings)
            }
        }
    }
}

impl<S: MessageSender> Generator for LlmGenerator<S> {
    #[instrument(skip_all, fields(task = request.task()))]
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        let Some(sender) = &self.sender else {
            return Err(GenerationError::Unavailable("no API key configured".into()));
        };

        let req = MessagesRequest::user(
            self.settings.model.clone(),
            self.settings.max_tokens,
            render_prompt(request)?,
        )
        .with_system(SYSTEM_PROMPT)
        .with_temperature(0.3);

        let response = tokio::time::timeout(self.settings.timeout, sender.send_message(&req))
            .await
            .map_err(|_| GenerationError::Timeout(self.settings.timeout))??;

        debug!(chars = response.text().len(), "generation reply received");
        parse_reply(request, &response.text())
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, GenerationError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| GenerationError::Api(format!("could not encode request: {e}")))
}

fn render_prompt(request: &GenerationRequest) -> Result<String, GenerationError> {
    let prompt = match request {
        GenerationRequest::Notes {
            title_hint,
            topics,
            formulas,
        } => format!(
            "Write study notes for the document \"{title_hint}\".\n\
             \n\
             Topics (keep every topic_order exactly as given):\n{topics}\n\
             \n\
             Formulas (keep every id exactly as given):\n{formulas}\n\
             \n\
             Return JSON in this shape:\n\
             {{\"title\": \"<notes title>\", \"summary\": \"<2-3 sentences>\",\n\
              \"sections\": [{{\"topic_order\": 0, \"overview\": \"<explanation of the topic>\", \"key_terms\": [\"<term>\"]}}],\n\
              \"formulas\": [{{\"id\": \"formula_1\", \"name\": \"<short name>\", \"explanation\": \"<what it means>\", \"applications\": [\"<where it is used>\"]}}]}}\n\
             Include one section per topic and one entry per formula.",
            topics = to_json(topics)?,
            formulas = to_json(formulas)?,
        ),
        GenerationRequest::FormulaExercises { formulas } => format!(
            "Write one practice exercise for each formula below. Prefer realistic word problems.\n\
             \n\
             Formulas:\n{formulas}\n\
             \n\
             Return JSON in this shape:\n\
             {{\"exercises\": [{{\"formula_id\": \"formula_1\", \"question\": \"<problem>\", \
             \"solution\": \"<worked approach>\", \"difficulty\": 2, \"hints\": [\"<hint>\"]}}]}}\n\
             difficulty is an integer from 1 (easy) to 5 (hard).",
            formulas = to_json(formulas)?,
        ),
        GenerationRequest::Comprehensive { topics, formulas } => format!(
            "Write one comprehensive exercise that requires combining all of the formulas below.\n\
             \n\
             Topics involved:\n{topics}\n\
             \n\
             Formulas:\n{formulas}\n\
             \n\
             Return JSON in this shape:\n\
             {{\"question\": \"<multi-step problem>\", \"solution\": \"<solution outline>\", \
             \"difficulty\": 4, \"hints\": [\"<hint>\"]}}",
            topics = to_json(topics)?,
            formulas = to_json(formulas)?,
        ),
    };
    Ok(prompt)
}

#[derive(Deserialize)]
struct ExercisesReply {
    exercises: Vec<ExerciseDraft>,
}

fn parse_reply(
    request: &GenerationRequest,
    text: &str,
) -> Result<GenerationResponse, GenerationError> {
    let json = JSON_OBJECT
        .find(text)
        .map(|m| m.as_str())
        .ok_or_else(|| GenerationError::MalformedResponse("no JSON object in reply".into()))?;
    let malformed = |e: serde_json::Error| GenerationError::MalformedResponse(e.to_string());

    let response = match request {
        GenerationRequest::Notes { .. } => {
            GenerationResponse::Notes(serde_json::from_str::<NotesDraft>(json).map_err(malformed)?)
        }
        GenerationRequest::FormulaExercises { .. } => GenerationResponse::FormulaExercises(
            serde_json::from_str::<ExercisesReply>(json)
                .map_err(malformed)?
                .exercises,
        ),
        GenerationRequest::Comprehensive { .. } => GenerationResponse::Comprehensive(
            serde_json::from_str::<ComprehensiveDraft>(json).map_err(malformed)?,
        ),
    };
    Ok(response)
}
