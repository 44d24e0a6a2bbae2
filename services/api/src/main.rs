//! API Service - HTTP surface for gold loss analytics
//!
//! Endpoints:
//! - GET /health - Health check
//! - GET /analysis/{view} - item-wise, karigar-wise, process-wise, month-wise loss
//! - GET /items - Weighed items with their loss
//! - GET /item-details/{item_no} - One item's losses by process and karigar
//! - GET /item-process/{item_no}, /item-karigar/{item_no} - One item's loss split
//! - GET /month-details?year=&month= - Items weighed in a month
//! - GET /last-uploaded/{kind}, /summary/{kind} - Dataset status
//! - POST /upload?kind=&mode=&format= - Ingest one file (raw body)
//! - POST /upload-data - Ingest weightFile and/or lossFile (multipart)
//! - POST /clear-database - Wipe both datasets

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use goldloss_core::analytics::Analytics;
use goldloss_core::error::{EngineError, StoreError};
use goldloss_core::normalize::parse_upload;
use goldloss_core::{
    Config, FileFormat, IngestReport, Ingestor, PgStore, RecordKind, Store, UploadMode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// ============================================================================
// State
// ============================================================================

#[derive(Clone)]
struct AppState {
    store: Arc<dyn Store>,
    batch_size: usize,
}

impl AppState {
    fn analytics(&self) -> Analytics<'_, dyn Store> {
        Analytics::new(self.store.as_ref())
    }

    fn ingestor(&self) -> Ingestor<'_, dyn Store> {
        Ingestor::new(self.store.as_ref()).with_batch_size(self.batch_size)
    }
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct UploadDataResponse {
    weight: Option<IngestReport>,
    loss: Option<IngestReport>,
}

#[derive(Serialize)]
struct ClearResponse {
    weight_deleted: u64,
    loss_deleted: u64,
}

// ============================================================================
// Errors
// ============================================================================

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Input(input) => ApiError::bad_request(input.to_string()),
            EngineError::Store(store) => store.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, error = %self.message, "request failed");
        }
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Query params
// ============================================================================

#[derive(Deserialize)]
struct MonthQuery {
    year: i32,
    month: u32,
}

#[derive(Deserialize)]
struct UploadQuery {
    kind: String,
    mode: Option<String>,
    format: Option<String>,
}

fn parse_kind(raw: &str) -> ApiResult<RecordKind> {
    raw.parse::<RecordKind>()
        .map_err(|e| ApiError::bad_request(e.to_string()))
}

fn parse_mode(raw: Option<&str>) -> ApiResult<UploadMode> {
    match raw {
        Some(raw) => raw
            .parse::<UploadMode>()
            .map_err(|e| ApiError::bad_request(e.to_string())),
        None => Ok(UploadMode::default()),
    }
}

/// Explicit `format` wins, then the Content-Type header, then CSV.
fn upload_format(explicit: Option<&str>, headers: &HeaderMap) -> FileFormat {
    let hint = explicit.or_else(|| {
        headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    });
    hint.map(FileFormat::detect).unwrap_or(FileFormat::Csv)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: "0.1.0",
    })
}

async fn analysis_handler(
    State(state): State<AppState>,
    Path(view): Path<String>,
) -> ApiResult<Response> {
    let analytics = state.analytics();
    let response = match view.as_str() {
        "item-wise-loss" => Json(analytics.item_wise_loss().await?).into_response(),
        "karigar-wise-loss" => Json(analytics.karigar_wise_loss().await?).into_response(),
        "process-wise-loss" => Json(analytics.process_wise_loss().await?).into_response(),
        "month-wise-loss" => Json(analytics.month_wise_loss().await?).into_response(),
        other => {
            return Err(ApiError::bad_request(format!(
                "Unknown analysis type '{}'",
                other
            )))
        }
    };
    Ok(response)
}

async fn items_handler(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.analytics().items_overview().await?))
}

async fn item_details_handler(
    State(state): State<AppState>,
    Path(item_no): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.analytics().item_detail(&item_no).await?))
}

async fn item_process_handler(
    State(state): State<AppState>,
    Path(item_no): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.analytics().item_process_loss(&item_no).await?))
}

async fn item_karigar_handler(
    State(state): State<AppState>,
    Path(item_no): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.analytics().item_karigar_loss(&item_no).await?))
}

async fn month_details_handler(
    State(state): State<AppState>,
    Query(params): Query<MonthQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state
            .analytics()
            .month_details(params.year, params.month)
            .await?,
    ))
}

/// `null` when nothing of that kind has been uploaded yet.
async fn last_uploaded_handler(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.analytics().latest_upload(kind).await?))
}

async fn summary_handler(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.analytics().summary(kind).await?))
}

async fn upload_handler(
    State(state): State<AppState>,
    Query(params): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let kind = parse_kind(&params.kind)?;
    let mode = parse_mode(params.mode.as_deref())?;
    let format = upload_format(params.format.as_deref(), &headers);
    if body.is_empty() {
        return Err(ApiError::bad_request("Empty upload"));
    }

    info!(%kind, %mode, ?format, bytes = body.len(), "upload received");
    let report = state
        .ingestor()
        .ingest_content(kind, &body, format, mode)
        .await?;
    Ok(Json(report))
}

/// Two optional files in one form. Both are normalized before either is
/// written, so a bad loss file leaves the weight data untouched.
async fn upload_data_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut weight_file = None;
    let mut loss_file = None;
    let mut mode = UploadMode::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let hint = field
            .file_name()
            .or_else(|| field.content_type())
            .map(FileFormat::detect)
            .unwrap_or(FileFormat::Csv);
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(e.to_string()))?;

        match name.as_str() {
            "weightFile" => weight_file = Some((data, hint)),
            "lossFile" => loss_file = Some((data, hint)),
            "mode" => mode = parse_mode(Some(String::from_utf8_lossy(&data).as_ref()))?,
            _ => {}
        }
    }

    if weight_file.is_none() && loss_file.is_none() {
        return Err(ApiError::bad_request("No files uploaded"));
    }

    let weight = match &weight_file {
        Some((data, format)) => Some(
            parse_upload(RecordKind::Weight, data, *format).map_err(EngineError::from)?,
        ),
        None => None,
    };
    let loss = match &loss_file {
        Some((data, format)) => {
            Some(parse_upload(RecordKind::Loss, data, *format).map_err(EngineError::from)?)
        }
        None => None,
    };

    let ingestor = state.ingestor();
    let mut response = UploadDataResponse {
        weight: None,
        loss: None,
    };
    if let Some(records) = &weight {
        response.weight = Some(ingestor.ingest(records, mode).await?);
    }
    if let Some(records) = &loss {
        response.loss = Some(ingestor.ingest(records, mode).await?);
    }
    Ok(Json(response))
}

async fn clear_database_handler(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let (weight_deleted, loss_deleted) = state.ingestor().clear_all().await?;
    Ok(Json(ClearResponse {
        weight_deleted,
        loss_deleted,
    }))
}

// ============================================================================
// Router
// ============================================================================

fn router(state: AppState, max_upload_bytes: usize) -> Router {
    // CORS for web frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/analysis/:view", get(analysis_handler))
        .route("/items", get(items_handler))
        .route("/item-details/:item_no", get(item_details_handler))
        .route("/item-process/:item_no", get(item_process_handler))
        .route("/item-karigar/:item_no", get(item_karigar_handler))
        .route("/month-details", get(month_details_handler))
        .route("/last-uploaded/:kind", get(last_uploaded_handler))
        .route("/summary/:kind", get(summary_handler))
        .route("/upload", post(upload_handler))
        .route("/upload-data", post(upload_data_handler))
        .route("/clear-database", post(clear_database_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env()?;

    println!("=== Gold Loss API ===");
    println!("Connecting to database...");

    let store = PgStore::connect(&config.db_url, config.max_connections)
        .await
        .context("Failed to connect to database")?;
    store.ensure_schema().await?;

    println!("Database connected");

    let state = AppState {
        store: Arc::new(store),
        batch_size: config.batch_size,
    };
    let app = router(state, config.max_upload_bytes);

    println!("API listening on http://{}", config.bind);
    println!("\nEndpoints:");
    println!("  GET  /health");
    println!("  GET  /analysis/{{item-wise-loss|karigar-wise-loss|process-wise-loss|month-wise-loss}}");
    println!("  GET  /items");
    println!("  GET  /item-details/{{item_no}}");
    println!("  GET  /item-process/{{item_no}}");
    println!("  GET  /item-karigar/{{item_no}}");
    println!("  GET  /month-details?year=&month=");
    println!("  GET  /last-uploaded/{{weight|loss}}");
    println!("  GET  /summary/{{weight|loss}}");
    println!("  POST /upload?kind=&mode=&format=");
    println!("  POST /upload-data");
    println!("  POST /clear-database");

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
