mod http;
mod llm;
mod metrics;
mod models;
mod pipeline;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State, rejection::JsonRejection},
    http::header,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    AnalyzeImageRequest, AnalyzeImageResponse, ApiError, ClassifyCategoryRequest,
    ClassifyCategoryResponse, GenerateDescriptionRequest, GenerateDescriptionResponse,
};
use pipeline::Pipeline;
use serde_json::{Value, json};
use std::{net::SocketAddr, sync::Arc};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

const SERVICE_NAME: &str = "listing-ai-rs";

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "listing.api", "server crashed: {err:?}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let pipeline = Pipeline::from_env();
    if !pipeline.is_model_configured() {
        warn!(
            target = "listing.api",
            "OPENAI_API_KEY is not set; serving deterministic fallbacks only"
        );
    }
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    let app = router(AppState::new(pipeline, prometheus_handle));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "listing.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    openapi: Arc<Value>,
    prometheus_handle: PrometheusHandle,
}

impl AppState {
    fn new(pipeline: Pipeline, prometheus_handle: PrometheusHandle) -> Self {
        let openapi = serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
            .unwrap_or_else(|_| json!({"openapi": "3.0.3"}));
        Self {
            pipeline,
            openapi: Arc::new(openapi),
            prometheus_handle,
        }
    }
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let ai = Router::new()
        .route("/analyze-image", post(analyze_image))
        .route("/classify-category", post(classify_category))
        .route("/generate-description", post(generate_description));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .nest("/ai", ai)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(body_limit_from_env())),
        )
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
///
/// Returns a small JSON payload with `status` and `service`.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
    }))
}

async fn openapi_json(State(state): State<AppState>) -> Json<Value> {
    Json((*state.openapi).clone())
}

async fn swagger_ui() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Listing AI Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#,
    )
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

/// Extract brand, model, condition and defects from item photos.
///
/// - Method: `POST`
/// - Path: `/ai/analyze-image`
/// - Body: `AnalyzeImageRequest`
/// - Response: `AnalyzeImageResponse`, always 200
async fn analyze_image(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeImageRequest>, JsonRejection>,
) -> Result<Json<AnalyzeImageResponse>, AppError> {
    crate::metrics::inc_requests("/ai/analyze-image");
    let Json(request) = payload?;
    info!(
        target = "listing.api",
        images = request.image_urls.len(),
        "analyze_image invoked"
    );
    Ok(Json(state.pipeline.analyze_image(&request).await))
}

/// Pick a leaf category from the taxonomy supplied in the request.
///
/// - Method: `POST`
/// - Path: `/ai/classify-category`
async fn classify_category(
    State(state): State<AppState>,
    payload: Result<Json<ClassifyCategoryRequest>, JsonRejection>,
) -> Result<Json<ClassifyCategoryResponse>, AppError> {
    crate::metrics::inc_requests("/ai/classify-category");
    let Json(request) = payload?;
    info!(
        target = "listing.api",
        categories = request.categories.as_ref().map_or(0, Vec::len),
        keywords = request.keywords.as_ref().map_or(0, Vec::len),
        "classify_category invoked"
    );
    Ok(Json(state.pipeline.classify_category(&request).await))
}

/// Write listing copy plus the auction registration payload.
///
/// - Method: `POST`
/// - Path: `/ai/generate-description`
async fn generate_description(
    State(state): State<AppState>,
    payload: Result<Json<GenerateDescriptionRequest>, JsonRejection>,
) -> Result<Json<GenerateDescriptionResponse>, AppError> {
    crate::metrics::inc_requests("/ai/generate-description");
    let Json(request) = payload?;
    info!(
        target = "listing.api",
        category_id = ?request.category_id,
        "generate_description invoked"
    );
    Ok(Json(state.pipeline.generate_description(&request).await))
}

#[derive(Debug)]
enum AppError {
    InvalidRequest(JsonRejection),
}

impl From<JsonRejection> for AppError {
    fn from(value: JsonRejection) -> Self {
        Self::InvalidRequest(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::InvalidRequest(rejection) => {
                let status = rejection.status();
                let payload = ApiError {
                    error: "invalid_request".into(),
                    detail: Some(rejection.body_text()),
                };
                warn!(target = "listing.api", status = %status, "request_rejected");
                (status, Json(payload)).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
