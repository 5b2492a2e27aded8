use super::{CompletionRequest, ContentPart, JsonCompletion, LlmError};
use crate::models::{ClassifyCategoryRequest, GenerateDescriptionRequest};
use once_cell::sync::Lazy;
use serde_json::{Map, Value, json};
use std::sync::Arc;

const ANALYZE_PROMPT: &str = "You analyze used item photos and extract facts. \
Return JSON following the schema. \
Be conservative and use UNKNOWN when unsure.";

const CLASSIFY_PROMPT: &str = "Classify category candidates for a used item. \
Use only the provided category list and match by semantic similarity. \
Use category name, path, aliases, and keywords for matching. \
Select leaf categories only (isLeaf=true). \
If no reasonable match, select the category named '기타'. \
Return JSON with candidates and a selected_category_id.";

const DESCRIBE_PROMPT: &str = "Write a concise, factual listing in Korean (2-3 sentences, <= 320 chars). \
No exaggeration. Use given facts only. \
If brand/model is unknown, use item_type (e.g., '카메라', '신발') in title/body. \
Return JSON with title, summary, body, hashtags, and auction_register_req.";

const SCHEMA_NAME: &str = "response";

/// Builds per-operation prompts and strict output schemas, then hands them
/// to the configured completion backend. No retries happen here.
#[derive(Clone)]
pub struct ModelGateway {
    backend: Arc<dyn JsonCompletion>,
}

impl ModelGateway {
    pub fn new(backend: Arc<dyn JsonCompletion>) -> Self {
        Self { backend }
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_configured()
    }

    pub async fn analyze_image(
        &self,
        image_urls: &[String],
        metadata: Option<&Map<String, Value>>,
    ) -> Result<Value, LlmError> {
        let mut content = vec![ContentPart::text(ANALYZE_PROMPT)];
        if let Some(metadata) = metadata.filter(|m| !m.is_empty()) {
            content.push(ContentPart::text(format!(
                "metadata: {}",
                Value::Object(metadata.clone())
            )));
        }
        content.extend(image_urls.iter().map(ContentPart::image));
        self.call(&ANALYZE_SCHEMA, content).await
    }

    pub async fn classify_category(
        &self,
        request: &ClassifyCategoryRequest,
    ) -> Result<Value, LlmError> {
        let context = json!({
            "brand": request.brand.as_ref().map(|b| &b.value),
            "model": request.model.as_ref().map(|m| &m.value),
            "text_ocr": request.text_ocr.as_deref().unwrap_or_default(),
            "categories": request.categories.as_deref().unwrap_or_default(),
            "keywords": request.keywords.as_deref().unwrap_or_default(),
        });
        let content = vec![
            ContentPart::text(CLASSIFY_PROMPT),
            ContentPart::text(context.to_string()),
        ];
        self.call(&CLASSIFY_SCHEMA, content).await
    }

    pub async fn generate_description(
        &self,
        request: &GenerateDescriptionRequest,
    ) -> Result<Value, LlmError> {
        let context = json!({
            "category_id": request.category_id,
            "brand": request.brand,
            "model": request.model,
            "condition": request.condition,
            "defects": request.defects,
            "accessories": request.accessories,
            "image_urls": request.image_urls,
            "item_type": request.item_type,
            "start_price": request.start_price,
            "auction_duration": request.auction_duration,
            "start_at": request.start_at,
            "end_at": request.end_at,
        });
        let content = vec![
            ContentPart::text(DESCRIBE_PROMPT),
            ContentPart::text(context.to_string()),
        ];
        self.call(&DESCRIBE_SCHEMA, content).await
    }

    async fn call(&self, schema: &Value, content: Vec<ContentPart>) -> Result<Value, LlmError> {
        if !self.backend.is_configured() {
            return Err(LlmError::NotConfigured);
        }
        let request = CompletionRequest {
            schema_name: SCHEMA_NAME,
            schema,
            content,
        };
        self.backend.complete(&request).await
    }
}

fn value_confidence_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "value": {"type": "string"},
            "confidence": {"type": "number"},
        },
        "required": ["value", "confidence"],
        "additionalProperties": false,
    })
}

static ANALYZE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "brand": value_confidence_schema(),
            "model": value_confidence_schema(),
            "condition": value_confidence_schema(),
            "defects": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "type": {"type": "string"},
                        "location": {"type": ["string", "null"]},
                        "severity": {"type": ["string", "null"]},
                        "confidence": {"type": ["number", "null"]},
                    },
                    "required": ["type", "location", "severity", "confidence"],
                    "additionalProperties": false,
                },
            },
            "accessories": {"type": "array", "items": {"type": "string"}},
            "text_ocr": {"type": "array", "items": {"type": "string"}},
            "image_quality": {
                "type": "object",
                "properties": {
                    "is_blurry": {"type": "boolean"},
                    "is_overexposed": {"type": "boolean"},
                    "resolution_ok": {"type": "boolean"},
                },
                "required": ["is_blurry", "is_overexposed", "resolution_ok"],
                "additionalProperties": false,
            },
        },
        "required": [
            "brand",
            "model",
            "condition",
            "defects",
            "accessories",
            "text_ocr",
            "image_quality",
        ],
        "additionalProperties": false,
    })
});

static CLASSIFY_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "category_candidates": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "category_id": {"type": "integer"},
                        "category_path": {"type": "string"},
                        "confidence": {"type": "number"},
                    },
                    "required": ["category_id", "category_path", "confidence"],
                    "additionalProperties": false,
                },
            },
            "selected_category_id": {"type": ["integer", "null"]},
            "selection_reason": {"type": "string"},
            "needs_user_confirmation": {"type": "boolean"},
        },
        "required": [
            "category_candidates",
            "selected_category_id",
            "selection_reason",
            "needs_user_confirmation",
        ],
        "additionalProperties": false,
    })
});

static DESCRIBE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "summary": {"type": "string"},
            "body": {"type": "string"},
            "hashtags": {"type": "array", "items": {"type": "string"}},
            "auction_register_req": {
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "description": {"type": "string"},
                    "startPrice": {"type": ["integer", "null"]},
                    "categoryId": {"type": ["integer", "null"]},
                    "auctionDuration": {"type": ["integer", "null"]},
                    "startAt": {"type": ["string", "null"]},
                    "endAt": {"type": ["string", "null"]},
                    "imageUrls": {"type": "array", "items": {"type": "string"}},
                },
                "required": [
                    "title",
                    "description",
                    "startPrice",
                    "categoryId",
                    "auctionDuration",
                    "startAt",
                    "endAt",
                    "imageUrls",
                ],
                "additionalProperties": false,
            },
        },
        "required": ["title", "summary", "body", "hashtags", "auction_register_req"],
        "additionalProperties": false,
    })
});
