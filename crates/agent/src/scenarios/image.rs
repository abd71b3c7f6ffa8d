use std::sync::Arc;

use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use dastyar_core::errors::{AgentError, DomainError};

use crate::budget::UsageMeter;
use crate::llm::{ChatMessage, ChatRequest, LlmClient};
use crate::prompts::IMAGE_TOPIC_SYSTEM_PROMPT;

#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct ImageReply {
    pub description: Option<String>,
    pub long_description: Option<String>,
    pub candidates: Option<Vec<String>>,
    pub main_topic: Option<String>,
}

/// Validate a `data:` URI carrying the user image: extract the media type
/// and check the payload actually decodes as base64.
pub fn parse_data_uri(uri: &str) -> Result<(String, Vec<u8>), DomainError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| DomainError::MalformedDataUri("missing `data:` prefix".to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| DomainError::MalformedDataUri("missing payload separator".to_string()))?;
    let media_type = header.split(';').next().unwrap_or_default().to_string();
    if !media_type.starts_with("image/") {
        return Err(DomainError::MalformedDataUri(format!(
            "unsupported media type `{media_type}`"
        )));
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| DomainError::MalformedDataUri(e.to_string()))?;
    Ok((media_type, bytes))
}

/// Describes a pictured object. `main_topic` answers topic requests; the
/// caption fields feed the retrieval queries for search-by-image requests.
pub struct ImageAgent {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl ImageAgent {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self { llm, model: model.into() }
    }

    pub async fn run(
        &self,
        instruction: &str,
        image_data_uri: &str,
        meter: &UsageMeter,
    ) -> Result<ImageReply, AgentError> {
        parse_data_uri(image_data_uri).map_err(AgentError::Validation)?;

        meter.record_request()?;
        let request = ChatRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::System(IMAGE_TOPIC_SYSTEM_PROMPT.to_string()),
                ChatMessage::User {
                    text: instruction.to_string(),
                    image_data_uri: Some(image_data_uri.to_string()),
                },
            ],
        )
        .with_schema(
            "image_reply",
            json!({
                "type": "object",
                "properties": {
                    "description": {"type": ["string", "null"]},
                    "long_description": {"type": ["string", "null"]},
                    "candidates": {"type": ["array", "null"], "items": {"type": "string"}},
                    "main_topic": {"type": ["string", "null"]},
                },
                "required": ["description", "long_description", "candidates", "main_topic"],
                "additionalProperties": false,
            }),
        );

        let outcome = self.llm.chat(&request).await?;
        meter.record_output_tokens(outcome.output_tokens)?;
        outcome.parse_json()
    }
}
