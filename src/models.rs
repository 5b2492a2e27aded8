use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::{Map, Value};
use serde_with::{DisplayFromStr, PickFirst, serde_as};
use thiserror::Error;

/// Canonical placeholder for a fact nobody could resolve.
pub const UNKNOWN: &str = "UNKNOWN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueConfidence {
    pub value: String,
    pub confidence: f64,
}

impl ValueConfidence {
    pub fn new(value: impl Into<String>, confidence: f64) -> Self {
        Self {
            value: value.into(),
            confidence,
        }
    }

    pub fn unknown() -> Self {
        Self::new(UNKNOWN, 0.1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defect {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageQuality {
    pub is_blurry: bool,
    pub is_overexposed: bool,
    pub resolution_ok: bool,
}

impl Default for ImageQuality {
    fn default() -> Self {
        Self {
            is_blurry: false,
            is_overexposed: false,
            resolution_ok: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyzeImageRequest {
    #[serde(rename = "imageUrls")]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeImageResponse {
    pub brand: ValueConfidence,
    pub model: ValueConfidence,
    pub condition: ValueConfidence,
    pub defects: Vec<Defect>,
    pub accessories: Vec<String>,
    pub text_ocr: Vec<String>,
    pub image_quality: ImageQuality,
}

/// A taxonomy node supplied by the caller for a single classification.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryItem {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub id: i64,
    pub name: String,
    #[serde(rename = "parentId")]
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub aliases: Option<Vec<String>>,
    #[serde(rename = "isLeaf", default)]
    pub is_leaf: Option<bool>,
}

impl CategoryItem {
    /// Only an explicit `isLeaf: false` excludes a node from selection.
    pub fn selectable(&self) -> bool {
        self.is_leaf != Some(false)
    }

    /// Path shown to the caller, falling back to the bare name.
    pub fn display_path(&self) -> &str {
        self.path
            .as_deref()
            .filter(|path| !path.is_empty())
            .unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassifyCategoryRequest {
    #[serde(default)]
    pub brand: Option<ValueConfidence>,
    #[serde(default)]
    pub model: Option<ValueConfidence>,
    #[serde(default)]
    pub text_ocr: Option<Vec<String>>,
    #[serde(default)]
    pub categories: Option<Vec<CategoryItem>>,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCandidate {
    pub category_id: i64,
    pub category_path: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyCategoryResponse {
    pub category_candidates: Vec<CategoryCandidate>,
    #[serde(default)]
    pub selected_category_id: Option<i64>,
    pub selection_reason: String,
    pub needs_user_confirmation: bool,
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateDescriptionRequest {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub defects: Vec<Defect>,
    #[serde(default)]
    pub accessories: Vec<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub item_type: Option<String>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub start_price: Option<i64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub auction_duration: Option<i64>,
    #[serde(default, deserialize_with = "local_datetime")]
    pub start_at: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "local_datetime")]
    pub end_at: Option<NaiveDateTime>,
}

/// Listing-creation payload handed back to the marketplace backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionRegisterReq {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub start_price: Option<i64>,
    pub category_id: i64,
    #[serde(default)]
    pub auction_duration: Option<i64>,
    #[serde(default, deserialize_with = "local_datetime")]
    pub start_at: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "local_datetime")]
    pub end_at: Option<NaiveDateTime>,
    pub image_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateDescriptionResponse {
    pub title: String,
    pub summary: String,
    pub body: String,
    pub hashtags: Vec<String>,
    pub auction_register_req: AuctionRegisterReq,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaViolation {
    #[error("`{field}` confidence {value} is outside [0, 1]")]
    Confidence { field: String, value: f64 },
    #[error("selected category {0} is not part of the supplied taxonomy")]
    UnknownCategory(i64),
}

/// Invariants serde cannot express on its own.
pub trait Validate {
    fn validate(&self) -> Result<(), SchemaViolation>;
}

impl Validate for AnalyzeImageResponse {
    fn validate(&self) -> Result<(), SchemaViolation> {
        check_confidence("brand", self.brand.confidence)?;
        check_confidence("model", self.model.confidence)?;
        check_confidence("condition", self.condition.confidence)?;
        for (idx, defect) in self.defects.iter().enumerate() {
            if let Some(confidence) = defect.confidence {
                check_confidence(&format!("defects[{idx}]"), confidence)?;
            }
        }
        Ok(())
    }
}

impl Validate for ClassifyCategoryResponse {
    fn validate(&self) -> Result<(), SchemaViolation> {
        for (idx, candidate) in self.category_candidates.iter().enumerate() {
            check_confidence(&format!("category_candidates[{idx}]"), candidate.confidence)?;
        }
        Ok(())
    }
}

impl Validate for GenerateDescriptionResponse {
    fn validate(&self) -> Result<(), SchemaViolation> {
        Ok(())
    }
}

fn check_confidence(field: &str, value: f64) -> Result<(), SchemaViolation> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SchemaViolation::Confidence {
            field: field.to_string(),
            value,
        })
    }
}

/// Parses backend timestamps. Offset-free values are taken as-is, offset
/// values are converted to local wall-clock time (the clock fallbacks use for
/// "now"), bare dates mean midnight.
pub fn parse_local_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(value) = text.parse::<NaiveDateTime>() {
        return Some(value);
    }
    if let Ok(value) = DateTime::parse_from_rfc3339(text) {
        return Some(value.with_timezone(&Local).naive_local());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

fn local_datetime<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => parse_local_datetime(text)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid datetime `{text}`"))),
    }
}
