//! Chat-completions client. All scenario agents and classifiers speak to the
//! model through the [`LlmClient`] trait so tests can substitute scripted
//! doubles.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use dastyar_core::config::LlmConfig;
use dastyar_core::errors::AgentError;

/// Near-deterministic sampling. The scenario agents classify and extract;
/// they do not need creative variance.
pub const DEFAULT_TEMPERATURE: f64 = 0.0001;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

#[derive(Clone, Debug, PartialEq)]
pub enum ChatMessage {
    System(String),
    User { text: String, image_data_uri: Option<String> },
    Assistant { text: Option<String>, tool_calls: Vec<ToolCall> },
    ToolResult { call_id: String, content: String },
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into(), image_data_uri: None }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One round trip to the model. `response_schema` forces structured JSON
/// output; `tools` carries OpenAI function definitions verbatim.
#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<Value>,
    pub response_schema: Option<(String, Value)>,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            response_schema: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_schema(mut self, name: impl Into<String>, schema: Value) -> Self {
        self.response_schema = Some((name.into(), schema));
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatOutcome {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub output_tokens: u32,
}

impl ChatOutcome {
    /// Parse the text content as a JSON document of the requested shape.
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, AgentError> {
        let text = self
            .text
            .as_deref()
            .ok_or_else(|| AgentError::collaborator("llm", "expected JSON content, got none"))?;
        serde_json::from_str(text)
            .map_err(|e| AgentError::collaborator("llm", format!("malformed JSON output: {e}")))
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatOutcome, AgentError>;
}

pub struct OpenAiChatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    max_retries: u32,
}

impl OpenAiChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::collaborator("llm", e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
        })
    }
}

fn message_to_json(message: &ChatMessage) -> Value {
    match message {
        ChatMessage::System(text) => json!({"role": "system", "content": text}),
        ChatMessage::User { text, image_data_uri: None } => {
            json!({"role": "user", "content": text})
        }
        ChatMessage::User { text, image_data_uri: Some(uri) } => json!({
            "role": "user",
            "content": [
                {"type": "text", "text": text},
                {"type": "image_url", "image_url": {"url": uri}},
            ],
        }),
        ChatMessage::Assistant { text, tool_calls } => {
            let mut body = json!({"role": "assistant", "content": text});
            if !tool_calls.is_empty() {
                body["tool_calls"] = tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string(),
                            },
                        })
                    })
                    .collect();
            }
            body
        }
        ChatMessage::ToolResult { call_id, content } => {
            json!({"role": "tool", "tool_call_id": call_id, "content": content})
        }
    }
}

fn build_payload(request: &ChatRequest) -> Value {
    let mut payload = json!({
        "model": request.model,
        "messages": request.messages.iter().map(message_to_json).collect::<Vec<_>>(),
        "temperature": request.temperature,
        "max_tokens": request.max_tokens,
    });
    if !request.tools.is_empty() {
        payload["tools"] = Value::Array(request.tools.clone());
    }
    if let Some((name, schema)) = &request.response_schema {
        payload["response_format"] = json!({
            "type": "json_schema",
            "json_schema": {"name": name, "schema": schema, "strict": true},
        });
    }
    payload
}

fn parse_completion(body: &Value) -> Result<ChatOutcome, AgentError> {
    let message = body
        .pointer("/choices/0/message")
        .ok_or_else(|| AgentError::collaborator("llm", "response carried no choices"))?;

    let text = message
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.is_empty());

    let mut tool_calls = Vec::new();
    if let Some(raw_calls) = message.get("tool_calls").and_then(Value::as_array) {
        for raw in raw_calls {
            let id = raw.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
            let name = raw
                .pointer("/function/name")
                .and_then(Value::as_str)
                .ok_or_else(|| AgentError::collaborator("llm", "tool call without a name"))?
                .to_string();
            let raw_arguments =
                raw.pointer("/function/arguments").and_then(Value::as_str).unwrap_or("{}");
            let arguments = serde_json::from_str(raw_arguments).map_err(|e| {
                AgentError::collaborator("llm", format!("unparsable tool arguments: {e}"))
            })?;
            tool_calls.push(ToolCall { id, name, arguments });
        }
    }

    let output_tokens =
        body.pointer("/usage/completion_tokens").and_then(Value::as_u64).unwrap_or(0) as u32;

    Ok(ChatOutcome { text, tool_calls, output_tokens })
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatOutcome, AgentError> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = build_payload(request);

        let mut attempt = 0;
        loop {
            let mut builder = self.http.post(&url).json(&payload);
            if let Some(key) = &self.api_key {
                builder = builder.bearer_auth(key.expose_secret());
            }

            match builder.send().await {
                Ok(response) if response.status().is_success() => {
                    let body: Value = response
                        .json()
                        .await
                        .map_err(|e| AgentError::collaborator("llm", e.to_string()))?;
                    return parse_completion(&body);
                }
                Ok(response) => {
                    let status = response.status();
                    let detail = response.text().await.unwrap_or_default();
                    // Retry server-side failures, fail fast on client errors.
                    if !status.is_server_error() || attempt >= self.max_retries {
                        return Err(AgentError::collaborator(
                            "llm",
                            format!("chat completion failed with {status}: {detail}"),
                        ));
                    }
                    tracing::warn!(event_name = "llm_retry", %status, attempt, "retrying chat completion");
                }
                Err(error) => {
                    if attempt >= self.max_retries {
                        return Err(AgentError::collaborator("llm", error.to_string()));
                    }
                    tracing::warn!(event_name = "llm_retry", error = %error, attempt, "retrying chat completion");
                }
            }

            attempt += 1;
            tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{build_payload, parse_completion, ChatMessage, ChatRequest};

    #[test]
    fn image_messages_become_multi_part_content() {
        let request = ChatRequest::new(
            "gpt-4.1-mini",
            vec![ChatMessage::User {
                text: "این چیست؟".to_string(),
                image_data_uri: Some("data:image/png;base64,AAAA".to_string()),
            }],
        );
        let payload = build_payload(&request);
        let content = &payload["messages"][0]["content"];
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[test]
    fn schema_and_tools_are_attached_when_present() {
        let request = ChatRequest::new("m", vec![ChatMessage::user("hi")])
            .with_tools(vec![json!({"type": "function"})])
            .with_schema("reply", json!({"type": "object"}));
        let payload = build_payload(&request);
        assert_eq!(payload["tools"].as_array().map(Vec::len), Some(1));
        assert_eq!(payload["response_format"]["json_schema"]["name"], "reply");
    }

    #[test]
    fn completion_with_tool_calls_is_parsed() {
        let body = json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "function": {"name": "similarity_search", "arguments": "{\"query\":\"میز\"}"},
                }],
            }}],
            "usage": {"completion_tokens": 17},
        });
        let outcome = parse_completion(&body).expect("parse");
        assert!(outcome.text.is_none());
        assert_eq!(outcome.tool_calls[0].name, "similarity_search");
        assert_eq!(outcome.tool_calls[0].arguments["query"], "میز");
        assert_eq!(outcome.output_tokens, 17);
    }

    #[test]
    fn completion_without_choices_is_an_error() {
        assert!(parse_completion(&json!({"choices": []})).is_err());
    }
}
