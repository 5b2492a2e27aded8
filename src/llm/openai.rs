use super::{CompletionRequest, ContentPart, JsonCompletion, LlmError, parse_json_payload};
use crate::http::build_client;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("OPENAI_BASE_URL")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "https://api.openai.com/v1".into()),
            api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            model: std::env::var("OPENAI_MODEL")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| "gpt-4.1-mini".into()),
        }
    }

    /// Configuration with no credential; every call short-circuits.
    #[cfg(test)]
    pub fn disabled() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            model: "gpt-4.1-mini".into(),
        }
    }
}

/// Client for the Responses API with strict JSON-schema output.
pub struct OpenAiClient {
    http: Client,
    config: LlmConfig,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }
}

#[async_trait]
impl JsonCompletion for OpenAiClient {
    fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<Value, LlmError> {
        let Some(key) = self.config.api_key.as_deref() else {
            return Err(LlmError::NotConfigured);
        };

        let body = ResponsesRequest {
            model: &self.config.model,
            input: [InputMessage {
                role: "user",
                content: &request.content,
            }],
            text: TextOptions {
                format: ResponseFormat {
                    kind: "json_schema",
                    name: request.schema_name,
                    schema: request.schema,
                    strict: true,
                },
            },
        };

        let response = self
            .http
            .post(format!("{}/responses", self.config.base_url))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::Http(format!("HTTP {}", response.status())));
        }

        let payload: ResponsesPayload = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;

        let text = payload
            .output_text()
            .ok_or_else(|| LlmError::InvalidResponse("missing output_text".into()))?;
        debug!(
            target = "listing.llm",
            model = %self.config.model,
            chars = text.len(),
            "model_output_received"
        );
        parse_json_payload(&text)
    }
}

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: [InputMessage<'a>; 1],
    text: TextOptions<'a>,
}

#[derive(Debug, Serialize)]
struct InputMessage<'a> {
    role: &'static str,
    content: &'a [ContentPart],
}

#[derive(Debug, Serialize)]
struct TextOptions<'a> {
    format: ResponseFormat<'a>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'a str,
    schema: &'a Value,
    strict: bool,
}

#[derive(Debug, Deserialize)]
struct ResponsesPayload {
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

impl ResponsesPayload {
    fn output_text(self) -> Option<String> {
        if let Some(text) = self.output_text.filter(|text| !text.trim().is_empty()) {
            return Some(text);
        }
        self.output
            .into_iter()
            .flat_map(|item| item.content)
            .find(|part| part.r#type == "output_text")
            .and_then(|part| part.text)
    }
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    r#type: String,
    #[serde(default)]
    text: Option<String>,
}
