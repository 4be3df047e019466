//! HTTP trigger API: axum router and request handlers.
//!
//! Picking the wake time is left to whatever calls this API (cron, a home
//! automation hub, a phone shortcut). Handlers render the target frame on
//! the blocking pool, hand it to the [`FadeController`] and return at once;
//! the animator thread does the rest.
//!
//! ## Rust concepts
//! - axum extractors: `State`, `Json`
//! - `tokio::task::spawn_blocking` for CPU-bound work inside async handlers
//! - Tuple error types (`(StatusCode, String)`) that implement `IntoResponse`
//! - `#[tokio::test]` to call handlers directly in tests

use crate::WakeLightError;
use crate::animator::{AnimationStatus, FadeController, FadeTimings, Phase};
use crate::media::{self, MediaEntry};
use crate::render::Renderer;
use crate::weather::WeatherImages;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

type ApiError = (StatusCode, String);

// ── App State ────────────────────────────────────────────────────────

/// Shared application state, cloned into every handler.
///
/// Rust concept: CLONE for Arc
/// axum clones the state for each request. The controller and renderer
/// are behind `Arc`, so a clone only bumps reference counts.
#[derive(Clone)]
pub struct AppState {
    pub controller: FadeController,
    pub renderer: Arc<Renderer>,
    pub weather: Arc<WeatherImages>,
    /// Root directory for media files (images/)
    pub media_dir: PathBuf,
    /// Phase lengths used when a request leaves them out
    pub defaults: FadeTimings,
}

// ── OpenAPI Documentation ────────────────────────────────────────────

#[derive(OpenApi)]
#[openapi(
    paths(get_status, get_images, post_fade_start, post_fade_cancel),
    components(schemas(AnimationStatus, Phase, MediaEntry, FadeRequest)),
    tags(
        (name = "fade", description = "Wake-up fade control"),
        (name = "media", description = "Media discovery endpoints"),
        (name = "system", description = "System status endpoints"),
    ),
    info(
        title = "Wake Light API",
        version = env!("CARGO_PKG_VERSION"),
        description = "HTTP API for triggering the weather wake-up light"
    )
)]
pub struct ApiDoc;

// ── Request types ────────────────────────────────────────────────────

#[derive(Deserialize, utoipa::ToSchema)]
pub struct FadeRequest {
    /// Image path relative to the media directory. Takes precedence over `weather`.
    #[schema(example = "images/sunrise.jpg")]
    image: Option<String>,
    /// Weather condition used to pick the image, e.g. "Rain" or "Clear"
    #[schema(example = "Clear")]
    weather: Option<String>,
    /// Fade-in length in seconds
    #[schema(example = 1200)]
    fade_in_secs: Option<f64>,
    /// How long to stay fully lit, in seconds
    #[schema(example = 1200)]
    hold_secs: Option<f64>,
    /// Fade-out length in seconds
    #[schema(example = 600)]
    fade_out_secs: Option<f64>,
}

impl FadeRequest {
    fn timings(&self, defaults: FadeTimings) -> Result<FadeTimings, ApiError> {
        Ok(FadeTimings {
            fade_in: seconds("fade_in_secs", self.fade_in_secs, defaults.fade_in)?,
            hold: seconds("hold_secs", self.hold_secs, defaults.hold)?,
            fade_out: seconds("fade_out_secs", self.fade_out_secs, defaults.fade_out)?,
        })
    }
}

fn seconds(field: &str, value: Option<f64>, default: Duration) -> Result<Duration, ApiError> {
    match value {
        None => Ok(default),
        Some(secs) => Duration::try_from_secs_f64(secs).map_err(|_| {
            (
                StatusCode::BAD_REQUEST,
                format!("{field} must be a non-negative number of seconds"),
            )
        }),
    }
}

// ── Router ───────────────────────────────────────────────────────────

/// Build the axum router with all API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(
            SwaggerUi::new("/docs")
                .url("/api-docs/openapi.json", ApiDoc::openapi())
                .config(utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"]).validator_url("none")),
        )
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/images", get(get_images))
        .route("/api/v1/fade/start", post(post_fade_start))
        .route("/api/v1/fade/cancel", post(post_fade_cancel))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Handlers ─────────────────────────────────────────────────────────

/// GET /api/v1/status — current animation state
#[utoipa::path(
    get,
    path = "/api/v1/status",
    tag = "system",
    responses(
        (status = 200, description = "Current animation status", body = AnimationStatus)
    )
)]
async fn get_status(State(state): State<AppState>) -> Json<AnimationStatus> {
    Json(state.controller.status())
}

/// GET /api/v1/images — list available images
#[utoipa::path(
    get,
    path = "/api/v1/images",
    tag = "media",
    responses(
        (status = 200, description = "List of available images", body = Vec<MediaEntry>)
    )
)]
async fn get_images(State(state): State<AppState>) -> Json<Vec<MediaEntry>> {
    Json(media::list_images(&state.media_dir))
}

/// POST /api/v1/fade/start — render an image and fade it in
#[utoipa::path(
    post,
    path = "/api/v1/fade/start",
    tag = "fade",
    request_body = FadeRequest,
    responses(
        (status = 200, description = "Fade started", body = AnimationStatus),
        (status = 400, description = "Invalid request or path"),
        (status = 404, description = "Image not found or unreadable"),
        (status = 409, description = "Rendered frame does not fit the strip")
    )
)]
async fn post_fade_start(
    State(state): State<AppState>,
    Json(req): Json<FadeRequest>,
) -> Result<Json<AnimationStatus>, ApiError> {
    let timings = req.timings(state.defaults)?;

    let (full_path, label) = match (&req.image, &req.weather) {
        (Some(image), _) => (validate_media_path(&state.media_dir, image)?, image.clone()),
        (None, Some(weather)) => {
            let selected = state.weather.select_image(weather);
            let relative = selected
                .strip_prefix(&state.media_dir)
                .unwrap_or(selected.as_path())
                .to_string_lossy()
                .into_owned();
            tracing::info!("Weather {:?} selects {}", weather, relative);
            (validate_media_path(&state.media_dir, &relative)?, relative)
        }
        (None, None) => {
            return Err((
                StatusCode::BAD_REQUEST,
                "Either image or weather is required".to_string(),
            ));
        }
    };

    // Clustering is CPU bound; keep it off the async workers.
    let renderer = state.renderer.clone();
    let target = tokio::task::spawn_blocking(move || renderer.render_path(&full_path))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Render task failed: {e}")))?
        .map_err(error_response)?;

    state
        .controller
        .start(target, timings, Some(label))
        .map_err(|e| (StatusCode::CONFLICT, e.to_string()))?;

    Ok(Json(state.controller.status()))
}

/// POST /api/v1/fade/cancel — stop the fade immediately
#[utoipa::path(
    post,
    path = "/api/v1/fade/cancel",
    tag = "fade",
    responses(
        (status = 200, description = "Fade cancelled", body = AnimationStatus),
    )
)]
async fn post_fade_cancel(State(state): State<AppState>) -> Json<AnimationStatus> {
    state.controller.cancel();
    Json(state.controller.status())
}

fn error_response(e: WakeLightError) -> ApiError {
    match e {
        WakeLightError::ImageUnavailable { .. } => {
            tracing::error!("{}", e);
            (StatusCode::NOT_FOUND, e.to_string())
        }
        other => {
            tracing::error!("Render failed: {}", other);
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

// ── Path validation ──────────────────────────────────────────────────

/// Resolve `relative_path` inside the media directory.
///
/// Both paths are canonicalized, so `..` tricks that escape the media
/// directory are rejected.
fn validate_media_path(media_dir: &Path, relative_path: &str) -> Result<PathBuf, ApiError> {
    let full_path = media_dir.join(relative_path);

    let canonical = full_path.canonicalize().map_err(|_| {
        (
            StatusCode::NOT_FOUND,
            format!("Path not found: {relative_path}"),
        )
    })?;

    let canonical_media = media_dir.canonicalize().map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Media directory not found".to_string(),
        )
    })?;

    if !canonical.starts_with(&canonical_media) {
        return Err((
            StatusCode::BAD_REQUEST,
            "Path is outside the media directory".to_string(),
        ));
    }

    Ok(canonical)
}
