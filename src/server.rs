//! HTTP API for feeds, engagement mutations, and notifications.
//!
//! Authentication happens upstream: the caller's identity arrives in the
//! `X-Viewer-Id` header. Feeds accept anonymous viewers (except home);
//! every mutation requires one.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version and worker stats) |
//! | `GET`  | `/feed/home` | Content from followed users |
//! | `GET`  | `/feed/discover` | Trending, popular, or recent public content |
//! | `GET`  | `/feed/tags/{tag}` | Content carrying one tag |
//! | `POST` / `DELETE` | `/anchors/{id}/like` | Like / unlike |
//! | `POST` / `DELETE` | `/anchors/{id}/follow` | Follow / unfollow an anchor |
//! | `POST` | `/anchors/{id}/seen` | Mark an anchor's updates as seen |
//! | `POST` / `DELETE` | `/users/{id}/follow` | Follow / unfollow a user |
//! | `GET`  | `/notifications` | The viewer's most recent notifications |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "INVALID_LIMIT", "message": "limit must be between 1 and 50, got 0" } }
//! ```
//!
//! Validation codes map to 400, `UNAUTHENTICATED` to 401, `NOT_FOUND` to
//! 404, and `INTERNAL` to 500. Store failures are logged with their cause
//! and reported with a generic message.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use anchor_feed_core::models::Notification;
use anchor_feed_core::planner::FeedParams;
use anchor_feed_core::{FeedError, FeedResponse};

use crate::config::Config;
use crate::services::Services;
use crate::worker::PoolStats;

pub const VIEWER_HEADER: &str = "x-viewer-id";

const DEFAULT_NOTIFICATION_LIMIT: i64 = 50;
const MAX_NOTIFICATION_LIMIT: i64 = 200;
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct AppState {
    services: Arc<Services>,
}

/// Starts the HTTP server on `[server].bind` and runs until Ctrl-C.
///
/// On shutdown, queued background tasks get a short grace period to finish.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Arc::new(Services::open(config).await?);
    let app = router(services.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "anchor feed listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if tokio::time::timeout(SHUTDOWN_DRAIN, services.workers.wait_idle())
        .await
        .is_err()
    {
        warn!(
            pending = services.workers.stats().in_flight,
            "shutting down with background tasks still queued"
        );
    }
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

pub fn router(services: Arc<Services>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/feed/home", get(handle_home))
        .route("/feed/discover", get(handle_discover))
        .route("/feed/tags/{tag}", get(handle_tag))
        .route("/anchors/{id}/like", post(handle_like).delete(handle_unlike))
        .route(
            "/anchors/{id}/follow",
            post(handle_follow_anchor).delete(handle_unfollow_anchor),
        )
        .route("/anchors/{id}/seen", post(handle_seen))
        .route(
            "/users/{id}/follow",
            post(handle_follow_user).delete(handle_unfollow_user),
        )
        .route("/notifications", get(handle_notifications))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { services })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<FeedError> for AppError {
    fn from(err: FeedError) -> Self {
        let status = match &err {
            e if e.is_validation() => StatusCode::BAD_REQUEST,
            FeedError::Unauthenticated => StatusCode::UNAUTHORIZED,
            FeedError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %err, "request failed");
            "internal error".to_string()
        } else {
            err.to_string()
        };
        AppError {
            status,
            code: err.code(),
            message,
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        FeedError::Store(err).into()
    }
}

// ============ Request helpers ============

/// The viewer named by `X-Viewer-Id`, if any. A header that is present but
/// not a valid id is treated as a failed authentication.
fn viewer(headers: &HeaderMap) -> Result<Option<Uuid>, AppError> {
    let Some(value) = headers.get(VIEWER_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .map(Some)
        .ok_or_else(|| FeedError::Unauthenticated.into())
}

fn require_viewer(headers: &HeaderMap) -> Result<Uuid, AppError> {
    viewer(headers)?.ok_or_else(|| FeedError::Unauthenticated.into())
}

fn path_id(field: &'static str, raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| {
        FeedError::InvalidParameter {
            field,
            message: format!("'{}' is not a valid id", raw),
        }
        .into()
    })
}

/// Feed query string. Every field is read as text so malformed values get
/// the engine's error codes instead of an extractor rejection.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedQuery {
    limit: Option<String>,
    cursor: Option<String>,
    category: Option<String>,
    sort: Option<String>,
    tag: Option<String>,
    include_own: Option<String>,
}

impl FeedQuery {
    fn into_params(self) -> Result<FeedParams, FeedError> {
        let limit = match self.limit.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(raw.parse::<i64>().map_err(|_| FeedError::InvalidParameter {
                field: "limit",
                message: format!("'{}' is not an integer", raw),
            })?),
        };
        let include_own = match self.include_own.as_deref() {
            None | Some("") | Some("false") | Some("0") => false,
            Some("true") | Some("1") => true,
            Some(other) => {
                return Err(FeedError::InvalidParameter {
                    field: "includeOwn",
                    message: format!("'{}' is not a boolean", other),
                })
            }
        };
        Ok(FeedParams {
            limit,
            cursor: self.cursor.filter(|c| !c.is_empty()),
            category: self.category.filter(|c| !c.is_empty()),
            sort: self.sort.filter(|s| !s.is_empty()),
            tag: self.tag,
            include_own,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MutationResponse {
    /// False when the request was a no-op (already liked, not following, ...).
    changed: bool,
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    workers: WorkerHealth,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkerHealth {
    count: usize,
    completed: u64,
    failed: u64,
    dropped: u64,
    in_flight: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let workers = &state.services.workers;
    let PoolStats {
        completed,
        failed,
        dropped,
        in_flight,
    } = workers.stats();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        workers: WorkerHealth {
            count: workers.worker_count(),
            completed,
            failed,
            dropped,
            in_flight,
        },
    })
}

// ============ Feeds ============

async fn handle_home(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FeedQuery>,
) -> Result<Json<FeedResponse>, AppError> {
    let viewer = viewer(&headers)?;
    let params = query.into_params()?;
    Ok(Json(state.services.feed.home(viewer, &params).await?))
}

async fn handle_discover(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FeedQuery>,
) -> Result<Json<FeedResponse>, AppError> {
    let viewer = viewer(&headers)?;
    let params = query.into_params()?;
    Ok(Json(state.services.feed.discover(viewer, &params).await?))
}

async fn handle_tag(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(tag): Path<String>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<FeedResponse>, AppError> {
    let viewer = viewer(&headers)?;
    let params = query.into_params()?;
    Ok(Json(state.services.feed.tag(viewer, &tag, &params).await?))
}

// ============ Anchor engagement ============

async fn handle_like(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MutationResponse>, AppError> {
    let user = require_viewer(&headers)?;
    let anchor = path_id("anchorId", &id)?;
    let changed = state.services.engagement.like(user, anchor).await?;
    Ok(Json(MutationResponse { changed }))
}

async fn handle_unlike(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MutationResponse>, AppError> {
    let user = require_viewer(&headers)?;
    let anchor = path_id("anchorId", &id)?;
    let changed = state.services.engagement.unlike(user, anchor).await?;
    Ok(Json(MutationResponse { changed }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FollowAnchorBody {
    #[serde(default = "default_notify")]
    notify_on_update: bool,
}

fn default_notify() -> bool {
    true
}

async fn handle_follow_anchor(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<MutationResponse>, AppError> {
    let user = require_viewer(&headers)?;
    let anchor = path_id("anchorId", &id)?;
    // The body is optional; an empty one means the defaults.
    let notify_on_update = if body.is_empty() {
        default_notify()
    } else {
        serde_json::from_slice::<FollowAnchorBody>(&body)
            .map_err(|e| FeedError::InvalidParameter {
                field: "body",
                message: e.to_string(),
            })?
            .notify_on_update
    };
    let changed = state
        .services
        .engagement
        .follow_anchor(user, anchor, notify_on_update)
        .await?;
    Ok(Json(MutationResponse { changed }))
}

async fn handle_unfollow_anchor(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MutationResponse>, AppError> {
    let user = require_viewer(&headers)?;
    let anchor = path_id("anchorId", &id)?;
    let changed = state
        .services
        .engagement
        .unfollow_anchor(user, anchor)
        .await?;
    Ok(Json(MutationResponse { changed }))
}

async fn handle_seen(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MutationResponse>, AppError> {
    let user = require_viewer(&headers)?;
    let anchor = path_id("anchorId", &id)?;
    let changed = state
        .services
        .engagement
        .mark_anchor_seen(user, anchor)
        .await?;
    Ok(Json(MutationResponse { changed }))
}

// ============ User follows ============

async fn handle_follow_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MutationResponse>, AppError> {
    let follower = require_viewer(&headers)?;
    let followee = path_id("userId", &id)?;
    let changed = state
        .services
        .engagement
        .follow_user(follower, followee)
        .await?;
    Ok(Json(MutationResponse { changed }))
}

async fn handle_unfollow_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MutationResponse>, AppError> {
    let follower = require_viewer(&headers)?;
    let followee = path_id("userId", &id)?;
    let changed = state
        .services
        .engagement
        .unfollow_user(follower, followee)
        .await?;
    Ok(Json(MutationResponse { changed }))
}

// ============ GET /notifications ============

#[derive(Debug, Deserialize)]
struct NotificationQuery {
    limit: Option<String>,
}

#[derive(Serialize)]
struct NotificationList {
    notifications: Vec<Notification>,
}

async fn handle_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<NotificationList>, AppError> {
    let user = require_viewer(&headers)?;
    let limit = match query.limit.as_deref() {
        None | Some("") => DEFAULT_NOTIFICATION_LIMIT,
        Some(raw) => match raw.parse::<i64>() {
            Ok(n) if (1..=MAX_NOTIFICATION_LIMIT).contains(&n) => n,
            Ok(n) => {
                return Err(FeedError::InvalidLimit {
                    got: n,
                    max: MAX_NOTIFICATION_LIMIT,
                }
                .into())
            }
            Err(_) => {
                return Err(FeedError::InvalidParameter {
                    field: "limit",
                    message: format!("'{}' is not an integer", raw),
                }
                .into())
            }
        },
    };
    let notifications = state.services.store.list_notifications(user, limit).await?;
    Ok(Json(NotificationList { notifications }))
}
