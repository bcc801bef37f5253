use axum::{
    Router,
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{Json, Response},
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use crate::{
    config::AnalyzerConfig,
    error::AnalyzerError,
    models::{AnalyzePrescriptionRequest, BatchResult, LookupRequest, PrescriptionReport},
    pipeline::Pipeline,
    prescription::{self, PrescriptionExtractor},
    summarize::{ImageInput, backend},
};

pub const CORRELATION_HEADER: &str = "x-correlation-id";
const DEFAULT_IMAGE_MIME: &str = "image/png";

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn api_error(status: StatusCode, message: &str, details: &str) -> ApiError {
    (
        status,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn analyzer_error(message: &str, err: &AnalyzerError) -> ApiError {
    error!("{}: {}", message, err);
    let status = match err {
        AnalyzerError::Browser(_) => StatusCode::SERVICE_UNAVAILABLE,
        AnalyzerError::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AnalyzerError::Config(_) | AnalyzerError::Workflow(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, message, &err.to_string())
}

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub extractor: Arc<PrescriptionExtractor>,
    /// One browser batch at a time
    pub batch_permit: Arc<Semaphore>,
}

impl AppState {
    pub fn new(pipeline: Pipeline, extractor: PrescriptionExtractor) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            extractor: Arc::new(extractor),
            batch_permit: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn from_config(config: &AnalyzerConfig) -> Self {
        let backend = backend::from_settings(&config.llm);
        Self::new(
            Pipeline::from_config(config, backend.clone()),
            PrescriptionExtractor::new(backend),
        )
    }

    async fn acquire_batch(&self) -> Result<SemaphorePermit<'_>, ApiError> {
        self.batch_permit.acquire().await.map_err(|e| {
            api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "Service is shutting down",
                &e.to_string(),
            )
        })
    }
}

pub fn create_app(config: &AnalyzerConfig) -> Router {
    build_router(AppState::from_config(config))
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/medicines/lookup", post(lookup_medicines))
        .route("/prescriptions/analyze", post(analyze_prescription))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(correlation_id))
        .with_state(app_state)
}

/// Tag the request's logs and response with a correlation id, reusing the caller's if given.
async fn correlation_id(request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = info_span!("http_request", correlation_id = %id);
    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(CORRELATION_HEADER), value);
    }
    response
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Prescription Analyzer",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Reads prescription images and looks up medicine information on pharmacy sites",
        "endpoints": {
            "POST /medicines/lookup": "Look up a list of medicine names",
            "POST /prescriptions/analyze": "Extract a prescription image and look up its medicines",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn lookup_medicines(
    State(state): State<AppState>,
    Json(request): Json<LookupRequest>,
) -> ApiResult<BatchResult> {
    let names = validate_names(request.medicines)?;
    info!("Looking up {} medicines", names.len());

    let _permit = state.acquire_batch().await?;
    state
        .pipeline
        .process(&names)
        .await
        .map(Json)
        .map_err(|e| analyzer_error("Failed to look up medicines", &e))
}

fn validate_names(names: Vec<String>) -> Result<Vec<String>, ApiError> {
    let names: Vec<String> = names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect();
    if names.is_empty() {
        return Err(bad_request_error("At least one medicine name is required"));
    }
    Ok(names)
}

async fn analyze_prescription(
    State(state): State<AppState>,
    Json(request): Json<AnalyzePrescriptionRequest>,
) -> ApiResult<PrescriptionReport> {
    let image = decode_image(request)?;
    info!("Analyzing prescription image ({} bytes)", image.bytes.len());

    let _permit = state.acquire_batch().await?;
    prescription::analyze(&state.extractor, &state.pipeline, &image)
        .await
        .map(Json)
        .map_err(|e| analyzer_error("Failed to analyze prescription", &e))
}

fn decode_image(request: AnalyzePrescriptionRequest) -> Result<ImageInput, ApiError> {
    let encoded = request.image_base64.trim();
    if encoded.is_empty() {
        return Err(bad_request_error("Image data is required"));
    }
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| {
            api_error(StatusCode::BAD_REQUEST, "Image is not valid base64", &e.to_string())
        })?;
    let mime = request
        .mime_type
        .filter(|m| m.starts_with("image/"))
        .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());
    Ok(ImageInput::new(bytes, mime))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakeLauncher, FakePage};
    use crate::normalize::ContentNormalizer;
    use crate::pacing::Pacer;
    use crate::pipeline::Stages;
    use crate::search::SearchStage;
    use crate::sites::{NameExtractor, SiteRegistry};
    use crate::summarize::backend::scripted::ScriptedBackend;
    use crate::summarize::{RetryPolicy, Summarizer};
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request as HttpRequest};
    use tower::ServiceExt;

    const ENGINE: &str = "https://search.test/";

    const PRESCRIPTION: &str = r#"{"patient_info": {"name": "A. Rao"}, "doctor_info": {},
        "medicines": [{"full_name": "Tab. Zzqx 10mg", "timing": "1-0-1", "special_instructions": "after food"}]}"#;

    fn app(launcher: FakeLauncher, backend: ScriptedBackend) -> Router {
        let backend = Arc::new(backend);
        let registry = Arc::new(SiteRegistry::default());
        let stages = Stages {
            search: SearchStage::new(ENGINE, Pacer::instant()),
            names: NameExtractor::new(registry.clone()),
            normalizer: ContentNormalizer::new(registry),
            summarizer: Summarizer::new(backend.clone()).with_policy(RetryPolicy::immediate(1)),
        };
        let pipeline = Pipeline::new(Arc::new(launcher), stages, Pacer::instant());
        build_router(AppState::new(pipeline, PrescriptionExtractor::new(backend)))
    }

    fn search_only() -> FakeLauncher {
        FakeLauncher::new(
            FakePage::new()
                .with_page(ENGINE, r#"<textarea name="q"></textarea>"#)
                .on_submit("https://search.test/results"),
        )
    }

    fn post(uri: &str, body: Value) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_carries_a_correlation_id() {
        let response = app(search_only(), ScriptedBackend::new())
            .oneshot(HttpRequest::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(CORRELATION_HEADER));
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn caller_correlation_id_is_echoed() {
        let request = HttpRequest::get("/")
            .header(CORRELATION_HEADER, "req-42")
            .body(Body::empty())
            .unwrap();
        let response = app(search_only(), ScriptedBackend::new()).oneshot(request).await.unwrap();
        assert_eq!(response.headers()[CORRELATION_HEADER], "req-42");
    }

    #[tokio::test]
    async fn lookup_requires_names() {
        let response = app(search_only(), ScriptedBackend::new())
            .oneshot(post("/medicines/lookup", json!({ "medicines": ["  ", ""] })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn lookup_returns_one_record_per_name() {
        let response = app(search_only(), ScriptedBackend::new())
            .oneshot(post("/medicines/lookup", json!({ "medicines": ["zzqx", "qqzx"] })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["success_count"], 0);
        assert!(body["medicines"]["zzqx"].is_object());
    }

    #[tokio::test]
    async fn browser_launch_failure_is_unavailable() {
        let response = app(FakeLauncher::unavailable(), ScriptedBackend::new())
            .oneshot(post("/medicines/lookup", json!({ "medicines": ["dolo"] })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Failed to look up medicines");
        assert!(body["details"].is_string());
    }

    #[tokio::test]
    async fn analyze_rejects_bad_base64() {
        let response = app(search_only(), ScriptedBackend::new())
            .oneshot(post("/prescriptions/analyze", json!({ "image_base64": "not base64!" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn analyze_reads_then_looks_up() {
        let backend = ScriptedBackend::new().reply(PRESCRIPTION);
        let image = STANDARD.encode([0x89u8, 0x50, 0x4e, 0x47]);
        let response = app(search_only(), backend)
            .oneshot(post(
                "/prescriptions/analyze",
                json!({ "image_base64": image, "mime_type": "image/jpeg" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["prescription"]["patient_info"]["name"], "A. Rao");
        assert_eq!(body["prescription"]["medicines"][0]["clean_name"], "zzqx");
        assert_eq!(body["medicine_information"]["total"], 1);
    }

    #[tokio::test]
    async fn unreadable_prescription_is_unprocessable() {
        let backend = ScriptedBackend::new().reply("sorry, too blurry");
        let image = STANDARD.encode([1u8, 2, 3]);
        let response = app(search_only(), backend)
            .oneshot(post("/prescriptions/analyze", json!({ "image_base64": image })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
