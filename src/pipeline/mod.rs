mod fallback;
mod normalize;

use crate::llm::{LlmConfig, LlmError, ModelGateway, OpenAiClient};
use crate::models::{
    AnalyzeImageRequest, AnalyzeImageResponse, ClassifyCategoryRequest, ClassifyCategoryResponse,
    GenerateDescriptionRequest, GenerateDescriptionResponse, SchemaViolation, Validate,
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

const ANALYZE_IMAGE: &str = "analyze_image";
const CLASSIFY_CATEGORY: &str = "classify_category";
const GENERATE_DESCRIPTION: &str = "generate_description";

/// Runs each operation as "model first, deterministic fallback second".
/// The public operations never fail; degradation reasons only reach the logs.
#[derive(Clone)]
pub struct Pipeline {
    gateway: ModelGateway,
    model_timeout: Duration,
}

impl Pipeline {
    pub fn new(gateway: ModelGateway, model_timeout: Duration) -> Self {
        Self {
            gateway,
            model_timeout,
        }
    }

    pub fn from_env() -> Self {
        let backend = OpenAiClient::new(LlmConfig::from_env());
        Self::new(
            ModelGateway::new(Arc::new(backend)),
            model_timeout_from_env(),
        )
    }

    pub fn is_model_configured(&self) -> bool {
        self.gateway.is_configured()
    }

    pub async fn analyze_image(&self, request: &AnalyzeImageRequest) -> AnalyzeImageResponse {
        let started = Instant::now();
        let outcome = self.analyze_outcome(request).await;
        let summary = {
            let response = outcome.value();
            json!({
                "brand": response.brand.value,
                "model": response.model.value,
                "condition": response.condition.value,
                "text_ocr": response.text_ocr,
            })
        };
        report(ANALYZE_IMAGE, started, &outcome, summary);
        outcome.into_inner()
    }

    pub async fn classify_category(
        &self,
        request: &ClassifyCategoryRequest,
    ) -> ClassifyCategoryResponse {
        let started = Instant::now();
        let outcome = self.classify_outcome(request).await;
        let summary = {
            let response = outcome.value();
            json!({
                "selected_category_id": response.selected_category_id,
                "needs_user_confirmation": response.needs_user_confirmation,
                "candidates": response.category_candidates,
            })
        };
        report(CLASSIFY_CATEGORY, started, &outcome, summary);
        outcome.into_inner()
    }

    pub async fn generate_description(
        &self,
        request: &GenerateDescriptionRequest,
    ) -> GenerateDescriptionResponse {
        let started = Instant::now();
        let outcome = self.describe_outcome(request).await;
        let summary = json!({ "title": outcome.value().title });
        report(GENERATE_DESCRIPTION, started, &outcome, summary);
        outcome.into_inner()
    }

    async fn analyze_outcome(&self, request: &AnalyzeImageRequest) -> Outcome<AnalyzeImageResponse> {
        let attempt = self
            .attempt(
                ANALYZE_IMAGE,
                self.gateway
                    .analyze_image(&request.image_urls, request.metadata.as_ref()),
            )
            .await
            .and_then(|raw| decode(ANALYZE_IMAGE, normalize::analyze_payload(raw)));
        Outcome::resolve(attempt, || fallback::analyze_image(request))
    }

    async fn classify_outcome(
        &self,
        request: &ClassifyCategoryRequest,
    ) -> Outcome<ClassifyCategoryResponse> {
        let attempt = self
            .attempt(CLASSIFY_CATEGORY, self.gateway.classify_category(request))
            .await
            .and_then(|raw| decode(CLASSIFY_CATEGORY, normalize::classify_payload(raw)))
            .and_then(|response| ensure_known_selection(request, response));
        Outcome::resolve(attempt, || fallback::classify_category(request))
    }

    async fn describe_outcome(
        &self,
        request: &GenerateDescriptionRequest,
    ) -> Outcome<GenerateDescriptionResponse> {
        let attempt = self
            .attempt(GENERATE_DESCRIPTION, self.gateway.generate_description(request))
            .await
            .and_then(|raw| {
                decode(
                    GENERATE_DESCRIPTION,
                    normalize::description_payload(raw, request),
                )
            });
        Outcome::resolve(attempt, || {
            fallback::generate_description(request, chrono::Local::now().naive_local())
        })
    }

    /// One bounded model call. The future is never polled when the backend
    /// has no credential.
    async fn attempt<Fut>(&self, operation: &'static str, call: Fut) -> Result<Value, PipelineError>
    where
        Fut: Future<Output = Result<Value, LlmError>>,
    {
        if !self.gateway.is_configured() {
            return Err(PipelineError::unconfigured(operation));
        }
        let started = Instant::now();
        let result = tokio::time::timeout(self.model_timeout, call).await;
        crate::metrics::stage_elapsed(operation, started.elapsed().as_millis());
        match result {
            Ok(Ok(raw)) => Ok(raw),
            Ok(Err(err)) => Err(PipelineError::from_llm(operation, err)),
            Err(_) => Err(PipelineError::timeout(operation, self.model_timeout)),
        }
    }
}

/// Result of one run: the model's answer, or a fallback answer plus the reason
/// the model path was abandoned.
#[derive(Debug)]
enum Outcome<T> {
    Model(T),
    Degraded(T, PipelineError),
}

impl<T> Outcome<T> {
    fn resolve(attempt: Result<T, PipelineError>, fallback: impl FnOnce() -> T) -> Self {
        match attempt {
            Ok(value) => Self::Model(value),
            Err(reason) => Self::Degraded(fallback(), reason),
        }
    }

    fn value(&self) -> &T {
        match self {
            Self::Model(value) | Self::Degraded(value, _) => value,
        }
    }

    fn into_inner(self) -> T {
        match self {
            Self::Model(value) | Self::Degraded(value, _) => value,
        }
    }

    fn source(&self) -> &'static str {
        match self {
            Self::Model(_) => "model",
            Self::Degraded(..) => "fallback",
        }
    }

    fn reason(&self) -> Option<&PipelineError> {
        match self {
            Self::Model(_) => None,
            Self::Degraded(_, reason) => Some(reason),
        }
    }
}

#[derive(Debug, Error)]
#[error("operation `{operation}` degraded: {message}")]
pub struct PipelineError {
    operation: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    Unconfigured,
    Gateway,
    Timeout,
    Malformed,
}

impl PipelineErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::Gateway => "gateway",
            Self::Timeout => "timeout",
            Self::Malformed => "malformed",
        }
    }
}

impl PipelineError {
    fn new(operation: &'static str, kind: PipelineErrorKind, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
            kind,
        }
    }

    pub fn unconfigured(operation: &'static str) -> Self {
        Self::new(
            operation,
            PipelineErrorKind::Unconfigured,
            "model backend is not configured",
        )
    }

    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        Self::new(
            operation,
            PipelineErrorKind::Timeout,
            format!("no model answer within {}s", after.as_secs_f32()),
        )
    }

    pub fn malformed(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(operation, PipelineErrorKind::Malformed, message)
    }

    fn from_llm(operation: &'static str, err: LlmError) -> Self {
        let kind = match err {
            LlmError::NotConfigured => PipelineErrorKind::Unconfigured,
            LlmError::Http(_) | LlmError::InvalidResponse(_) => PipelineErrorKind::Gateway,
            LlmError::Parse(_) => PipelineErrorKind::Malformed,
        };
        Self::new(operation, kind, err.to_string())
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

fn decode<T>(operation: &'static str, payload: Value) -> Result<T, PipelineError>
where
    T: DeserializeOwned + Validate,
{
    let response: T = serde_json::from_value(payload)
        .map_err(|err| PipelineError::malformed(operation, err.to_string()))?;
    response
        .validate()
        .map_err(|err| PipelineError::malformed(operation, err.to_string()))?;
    Ok(response)
}

/// A model pick outside the caller's taxonomy is treated as malformed output.
fn ensure_known_selection(
    request: &ClassifyCategoryRequest,
    response: ClassifyCategoryResponse,
) -> Result<ClassifyCategoryResponse, PipelineError> {
    let (Some(categories), Some(selected)) = (
        request.categories.as_deref().filter(|c| !c.is_empty()),
        response.selected_category_id,
    ) else {
        return Ok(response);
    };
    if categories.iter().any(|category| category.id == selected) {
        Ok(response)
    } else {
        Err(PipelineError::malformed(
            CLASSIFY_CATEGORY,
            SchemaViolation::UnknownCategory(selected).to_string(),
        ))
    }
}

fn report<T>(operation: &'static str, started: Instant, outcome: &Outcome<T>, summary: Value) {
    let run_id = Uuid::new_v4();
    let source = outcome.source();
    if let Some(reason) = outcome.reason() {
        if reason.kind() == PipelineErrorKind::Unconfigured {
            debug!(
                target = "listing.pipeline",
                run_id = %run_id,
                operation = reason.operation(),
                "model_unconfigured_fallback"
            );
        } else {
            warn!(
                target = "listing.pipeline",
                run_id = %run_id,
                operation = reason.operation(),
                kind = reason.kind().as_str(),
                error = %reason.detail(),
                "model_fallback"
            );
        }
    }
    crate::metrics::pipeline_outcome(operation, source);
    info!(
        target = "listing.pipeline",
        run_id = %run_id,
        operation = operation,
        source = source,
        elapsed_ms = started.elapsed().as_millis() as u64,
        summary = %summary,
        "pipeline_result"
    );
}

fn model_timeout_from_env() -> Duration {
    let secs = std::env::var("MODEL_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(30);
    Duration::from_secs(secs)
}
