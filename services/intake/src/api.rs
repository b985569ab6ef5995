use crate::archive::{PaymentArchive, StoredUpload};
use crate::config::ServerConfig;
use crate::error::{IntakeError, StorageError};
use crate::event_day::EventCalendar;
use crate::upload_buffer::BufferStrategy;
use crate::upload_policy::{IncomingFile, UploadPolicy, UploadRequest};
use anyhow::{Context, Result};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};

/// Multipart field carrying the screenshot
pub const SCREENSHOT_FIELD: &str = "screenshot";
/// Multipart field carrying the shop name
pub const SHOP_NAME_FIELD: &str = "shopName";

/// Room for multipart framing and the text fields on top of the file limit
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub archive: PaymentArchive,
    pub calendar: EventCalendar,
    pub policy: UploadPolicy,
    pub buffering: BufferStrategy,
    pub service_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInfoResponse {
    pub success: bool,
    pub event_day: u8,
    pub event_date: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub event_day: u8,
    pub url: String,
    pub file_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadListResponse {
    pub success: bool,
    pub event_date: String,
    pub count: usize,
    pub uploads: Vec<StoredUpload>,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    let cors = if config.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let body_limit = state.policy.max_file_bytes() + FORM_OVERHEAD_BYTES;

    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/event-info", get(event_info))
        .route(
            "/api/upload",
            post(upload_screenshot).layer(DefaultBodyLimit::max(body_limit)),
        );

    if config.expose_listing {
        router = router.route("/api/uploads/{date}", get(list_uploads));
    }

    if let Some(dir) = config.static_dir.as_ref().filter(|d| d.is_dir()) {
        info!(dir = %dir.display(), "Serving static assets");
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": state.service_name
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let backend = state.archive.backend_name();
    match state.archive.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "storage": backend
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "storage": backend,
                "error": e.to_string()
            })),
        ),
    }
}

async fn event_info(State(state): State<AppState>) -> Json<EventInfoResponse> {
    let day = state.calendar.today();
    Json(EventInfoResponse {
        success: true,
        event_day: day.index,
        event_date: day.date_string(),
    })
}

#[instrument(skip(state, multipart))]
async fn upload_screenshot(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, IntakeError> {
    let result = handle_upload(&state, multipart).await;

    let outcome = match &result {
        Ok(_) => "success",
        Err(e) => {
            warn!(error = %e, kind = e.kind(), "Upload rejected");
            e.kind()
        }
    };
    metrics::counter!("intake_uploads_total", "outcome" => outcome).increment(1);

    result.map(Json)
}

async fn handle_upload(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<UploadResponse, IntakeError> {
    let multipart = multipart.map_err(|e| IntakeError::MalformedBody(e.body_text()))?;
    let request = read_form(state, multipart).await?;
    let upload = state.policy.validate(request)?;
    let day = state.calendar.today();
    if !day.is_event_day() {
        warn!(date = %day.date, "Upload outside the festival days, filing under Day 0");
    }

    metrics::histogram!("intake_upload_bytes").record(upload.buffer.len() as f64);
    debug!(
        size = upload.buffer.len(),
        spooled_to = ?upload.buffer.path(),
        "Upload buffered"
    );

    // On error the buffer is dropped here, which removes any temp file
    let archived = state
        .archive
        .store(
            upload.buffer.payload(),
            &upload.file_name,
            day.date,
            &upload.shop_name,
        )
        .await?;
    upload.buffer.cleanup();

    info!(
        shop_name = %upload.shop_name,
        event_day = %day,
        file_name = %archived.file_name,
        "Payment screenshot uploaded"
    );

    Ok(UploadResponse {
        success: true,
        message: format!(
            "Payment screenshot uploaded successfully to Day {}!",
            day.index
        ),
        event_day: day.index,
        url: archived.object.url,
        file_name: archived.file_name,
    })
}

/// Read the form, spooling the screenshot into the configured buffer
async fn read_form(state: &AppState, mut multipart: Multipart) -> Result<UploadRequest, IntakeError> {
    let limit = state.policy.max_file_bytes();
    let mut request = UploadRequest::default();

    while let Some(mut field) = multipart.next_field().await.map_err(|e| form_error(e, limit))? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(SCREENSHOT_FIELD) if request.file.is_none() => {
                // Browsers send an empty filename when no file was chosen
                let Some(file_name) = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                else {
                    continue;
                };
                let content_type = field.content_type().map(str::to_string);

                let mut writer = state
                    .buffering
                    .begin(&file_name, limit)
                    .map_err(StorageError::Io)?;
                while let Some(chunk) = field.chunk().await.map_err(|e| form_error(e, limit))? {
                    writer.write_chunk(&chunk).await?;
                }

                request.file = Some(IncomingFile {
                    file_name,
                    content_type,
                    buffer: writer.finish().await?,
                });
            }
            Some(SHOP_NAME_FIELD) => {
                request.shop_name = Some(field.text().await.map_err(|e| form_error(e, limit))?);
            }
            _ => {}
        }
    }

    Ok(request)
}

fn form_error(err: MultipartError, limit: usize) -> IntakeError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        IntakeError::TooLarge { max_bytes: limit }
    } else {
        IntakeError::MalformedBody(err.body_text())
    }
}

#[instrument(skip(state))]
async fn list_uploads(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<UploadListResponse>, IntakeError> {
    let parsed = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|_| IntakeError::InvalidDate(date.clone()))?;

    let uploads = state
        .archive
        .list(parsed)
        .await
        .map_err(IntakeError::Listing)?;

    Ok(Json(UploadListResponse {
        success: true,
        event_date: parsed.format("%Y-%m-%d").to_string(),
        count: uploads.len(),
        uploads,
    }))
}

/// Start the intake API server
pub async fn start_api_server(state: AppState, config: &ServerConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting intake API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
