mod gateway;
mod openai;

pub use gateway::ModelGateway;
pub use openai::{LlmConfig, OpenAiClient};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model backend is not configured")]
    NotConfigured,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("model output is not json: {0}")]
    Parse(String),
}

/// One part of a multimodal user message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
    InputImage { image_url: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::InputText { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self::InputImage {
            image_url: url.into(),
        }
    }
}

#[derive(Debug)]
pub struct CompletionRequest<'a> {
    pub schema_name: &'static str,
    pub schema: &'a Value,
    pub content: Vec<ContentPart>,
}

/// The opaque AI capability: a prompt plus a strict output schema in,
/// parsed JSON out.
#[async_trait]
pub trait JsonCompletion: Send + Sync {
    fn is_configured(&self) -> bool;

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<Value, LlmError>;
}

/// Parses model text as JSON. When the direct parse fails, retries once on
/// the span from the first `{` to the last `}`. Truncated output stays an error.
pub fn parse_json_payload(text: &str) -> Result<Value, LlmError> {
    let err = match serde_json::from_str(text) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };
    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return Err(LlmError::Parse(err.to_string()));
    };
    if end <= start {
        return Err(LlmError::Parse(err.to_string()));
    }
    serde_json::from_str(&text[start..=end]).map_err(|err| LlmError::Parse(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_clean_json() {
        let value = parse_json_payload(r#"{"title":"a"}"#).unwrap();
        assert_eq!(value, json!({"title": "a"}));
    }

    #[test]
    fn recovers_object_wrapped_in_prose() {
        let text = "Sure! Here you go:\n```json\n{\"brand\": {\"value\": \"Sony\", \"confidence\": 0.9}}\n```";
        let value = parse_json_payload(text).unwrap();
        assert_eq!(value["brand"]["value"], json!("Sony"));
    }

    #[test]
    fn truncated_output_is_not_recovered() {
        let err = parse_json_payload("{\"title\": \"abc\", \"body\": \"unfinished").unwrap_err();
        assert!(matches!(err, LlmError::Parse(_)));
    }

    #[test]
    fn empty_text_is_an_error() {
        assert!(parse_json_payload("").is_err());
        assert!(parse_json_payload("} nope {").is_err());
    }

    #[test]
    fn content_parts_use_responses_api_tags() {
        let parts = vec![ContentPart::text("hi"), ContentPart::image("https://x/a.jpg")];
        let value = serde_json::to_value(&parts).unwrap();
        assert_eq!(
            value,
            json!([
                {"type": "input_text", "text": "hi"},
                {"type": "input_image", "image_url": "https://x/a.jpg"}
            ])
        );
    }
}
