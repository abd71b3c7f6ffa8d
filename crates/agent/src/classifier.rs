//! Closed-set scenario classification. A label outside the allowed set is an
//! error, never a silent fallback.

use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use dastyar_core::errors::AgentError;
use dastyar_core::ScenarioLabel;

use crate::budget::UsageMeter;
use crate::llm::{ChatMessage, ChatRequest, LlmClient};
use crate::prompts::{CLASSIFIER_SYSTEM_PROMPT, IMAGE_CLASSIFIER_SYSTEM_PROMPT};

#[derive(Debug, Deserialize)]
struct ClassificationReply {
    classification: String,
}

fn classification_schema(labels: &[ScenarioLabel]) -> Value {
    json!({
        "type": "object",
        "properties": {
            "classification": {
                "type": "string",
                "enum": labels.iter().map(|l| l.as_str()).collect::<Vec<_>>(),
            },
        },
        "required": ["classification"],
        "additionalProperties": false,
    })
}

/// Accept either the structured reply or a bare label; smaller models
/// occasionally skip the JSON wrapper.
fn parse_label(raw: &str, allowed: &[ScenarioLabel]) -> Result<ScenarioLabel, AgentError> {
    let text = raw.trim();
    let candidate = match serde_json::from_str::<ClassificationReply>(text) {
        Ok(reply) => reply.classification,
        Err(_) => text.trim_matches(|c| c == '"' || c == '`').to_string(),
    };

    let label = ScenarioLabel::from_str(&candidate)?;
    if !allowed.contains(&label) {
        return Err(AgentError::Validation(
            dastyar_core::DomainError::UnknownScenarioLabel(candidate),
        ));
    }
    Ok(label)
}

/// Five-way classifier for text-only first turns.
pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self { llm, model: model.into() }
    }

    pub async fn classify(
        &self,
        text: &str,
        meter: &UsageMeter,
    ) -> Result<ScenarioLabel, AgentError> {
        meter.record_request()?;
        let request = ChatRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::System(CLASSIFIER_SYSTEM_PROMPT.to_string()),
                ChatMessage::user(text),
            ],
        )
        .with_schema("classification", classification_schema(&ScenarioLabel::TEXT_LABELS));

        let outcome = self.llm.chat(&request).await?;
        meter.record_output_tokens(outcome.output_tokens)?;
        let raw = outcome
            .text
            .as_deref()
            .ok_or_else(|| AgentError::collaborator("llm", "classifier returned no content"))?;
        let label = parse_label(raw, &ScenarioLabel::TEXT_LABELS)?;
        tracing::info!(event_name = "scenario_classified", label = %label);
        Ok(label)
    }
}

/// Two-way router for requests that carry an image.
pub struct ImageRouteClassifier {
    llm: Arc<dyn LlmClient>,
    model: String,
}

const IMAGE_LABELS: [ScenarioLabel; 2] = [ScenarioLabel::ImageTopic, ScenarioLabel::ImageSearch];

impl ImageRouteClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self { llm, model: model.into() }
    }

    pub async fn classify(
        &self,
        text: &str,
        meter: &UsageMeter,
    ) -> Result<ScenarioLabel, AgentError> {
        // Without an instruction there is nothing to route on; identifying
        // the pictured object is the default request.
        if text.trim().is_empty() {
            return Ok(ScenarioLabel::ImageTopic);
        }

        meter.record_request()?;
        let request = ChatRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::System(IMAGE_CLASSIFIER_SYSTEM_PROMPT.to_string()),
                ChatMessage::user(text),
            ],
        )
        .with_schema("classification", classification_schema(&IMAGE_LABELS));

        let outcome = self.llm.chat(&request).await?;
        meter.record_output_tokens(outcome.output_tokens)?;
        let raw = outcome
            .text
            .as_deref()
            .ok_or_else(|| AgentError::collaborator("llm", "classifier returned no content"))?;
        parse_label(raw, &IMAGE_LABELS)
    }
}

#[cfg(test)]
mod tests {
    use dastyar_core::ScenarioLabel;

    use super::parse_label;

    #[test]
    fn structured_replies_are_parsed() {
        let label = parse_label(
            "{\"classification\": \"PRODUCT_SEARCH\"}",
            &ScenarioLabel::TEXT_LABELS,
        )
        .expect("parse");
        assert_eq!(label, ScenarioLabel::ProductSearch);
    }

    #[test]
    fn bare_labels_are_accepted() {
        let label = parse_label("CONVERSATION", &ScenarioLabel::TEXT_LABELS).expect("parse");
        assert_eq!(label, ScenarioLabel::Conversation);
    }

    #[test]
    fn labels_outside_the_closed_set_fail() {
        assert!(parse_label("SOMETHING_ELSE", &ScenarioLabel::TEXT_LABELS).is_err());
        // A real label that the five-way classifier may not emit.
        assert!(parse_label("IMAGE_TOPIC", &ScenarioLabel::TEXT_LABELS).is_err());
    }
}
