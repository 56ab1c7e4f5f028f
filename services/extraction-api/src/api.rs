use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::export::{export_filename, render_csv};
use crate::metrics_aggregator::{self, DashboardMetrics};
use crate::query::ExtractionQuery;
use crate::store::{Extraction, ExtractionStore, NewExtraction, DEFAULT_MIME_TYPE, DEFAULT_STATUS};
use anyhow::{Context, Result};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ExtractionStore>,
}

impl AppState {
    pub fn new(store: ExtractionStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }
}

/// Body of `POST /api/extractions`
#[derive(Debug, Default, Deserialize)]
pub struct CreateExtractionRequest {
    pub filename: Option<String>,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
    pub status: Option<String>,
    /// Stored as text; a JSON string is kept verbatim
    pub data_json: Option<serde_json::Value>,
}

impl CreateExtractionRequest {
    /// Validate and apply defaults
    pub fn into_new_extraction(self) -> Result<NewExtraction, ApiError> {
        let filename = self
            .filename
            .filter(|f| !f.is_empty())
            .ok_or_else(|| ApiError::Validation("Filename is required".to_string()))?;

        let data_json = self.data_json.map(|value| match value {
            serde_json::Value::String(text) => text,
            other => other.to_string(),
        });

        Ok(NewExtraction {
            filename,
            file_size: self.file_size,
            mime_type: self.mime_type.unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
            status: self.status.unwrap_or_else(|| DEFAULT_STATUS.to_string()),
            data_json,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExtractionListResponse {
    pub extractions: Vec<Extraction>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub id: i64,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

/// CORS policy: disabled, any origin, or the configured allow-list
fn cors_layer(config: &ApiConfig) -> CorsLayer {
    if !config.cors_enabled {
        return CorsLayer::new();
    }

    let allow_origin = match config.cors_origins.as_slice() {
        [] => AllowOrigin::any(),
        origins => AllowOrigin::list(origins.iter().filter_map(|o| o.parse().ok())),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/extractions", get(list_extractions).post(create_extraction))
        .route("/api/extractions/clear", delete(clear_extractions))
        .route(
            "/api/extractions/:id",
            get(get_extraction).delete(delete_extraction),
        )
        .route("/api/metrics", get(get_metrics))
        .route("/api/export/csv", get(export_csv))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(config))
        .with_state(state)
}

/// Liveness endpoint
async fn home() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "message": "Extraction API is running"
    }))
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME")
    }))
}

/// Readiness check: the database can be opened and queried
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// List extractions with optional search and date filter
#[instrument(skip(state))]
async fn list_extractions(
    State(state): State<AppState>,
    Query(query): Query<ExtractionQuery>,
) -> Result<Json<ExtractionListResponse>, ApiError> {
    let extractions = state.store.list(&query.clauses()).await?;
    Ok(Json(ExtractionListResponse { extractions }))
}

#[instrument(skip(state, payload))]
async fn create_extraction(
    State(state): State<AppState>,
    payload: Result<Json<CreateExtractionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(JsonRejection::MissingJsonContentType(_)) => CreateExtractionRequest::default(),
        Err(rejection) => {
            debug!(error = %rejection.body_text(), "Rejected create body");
            return Err(ApiError::Validation(format!(
                "Invalid request body: {}",
                rejection.body_text()
            )));
        }
    };
    let new = request.into_new_extraction()?;

    let id = state.store.insert(&new).await?;
    metrics::counter!("extractions.created").increment(1);
    metrics_aggregator::update_metrics(&state.store).await;

    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            id,
            message: "Extraction created".to_string(),
        }),
    ))
}

/// Ids that do not parse as integers name no extraction
fn extraction_id(path: Result<Path<i64>, PathRejection>) -> Result<i64, ApiError> {
    path.map(|Path(id)| id).map_err(|rejection| {
        debug!(error = %rejection.body_text(), "Rejected extraction id");
        ApiError::NotFound
    })
}

#[instrument(skip(state))]
async fn get_extraction(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<Extraction>, ApiError> {
    let id = extraction_id(path)?;
    state
        .store
        .get(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

#[instrument(skip(state))]
async fn delete_extraction(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = extraction_id(path)?;
    if !state.store.delete(id).await? {
        return Err(ApiError::NotFound);
    }

    metrics::counter!("extractions.deleted").increment(1);
    metrics_aggregator::update_metrics(&state.store).await;

    Ok(MessageResponse::new("Deleted"))
}

#[instrument(skip(state))]
async fn clear_extractions(
    State(state): State<AppState>,
) -> Result<Json<MessageResponse>, ApiError> {
    let deleted = state.store.clear().await?;

    metrics::counter!("extractions.cleared").increment(1);
    metrics::counter!("extractions.deleted").increment(deleted);
    metrics_aggregator::update_metrics(&state.store).await;

    Ok(MessageResponse::new("All cleared"))
}

async fn get_metrics(State(state): State<AppState>) -> Result<Json<DashboardMetrics>, ApiError> {
    Ok(Json(metrics_aggregator::compute(&state.store).await?))
}

/// Download the filtered extractions as CSV
#[instrument(skip(state))]
async fn export_csv(
    State(state): State<AppState>,
    Query(query): Query<ExtractionQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let extractions = state.store.list(&query.clauses()).await?;
    let body = render_csv(&extractions)?;
    let filename = export_filename(Utc::now());

    metrics::counter!("extractions.exported").increment(extractions.len() as u64);
    info!(rows = extractions.len(), filename = %filename, "Exported extractions");

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    ))
}

/// Serve the API until `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = config.listen_addr();

    info!(address = %addr, "Starting extraction API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
