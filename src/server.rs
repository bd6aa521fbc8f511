//! HTTP front end for the relay.
//!
//! Exposes dispatch and undo over a JSON API so a browser UI (or any other
//! client) can upload archives and manage what has been sent to the index.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/archives?collection=&doc_type=&user=` | Upload a zip archive and dispatch its files |
//! | `GET`  | `/audit[?user=]` | List audit entries (metadata only, no chunk text) |
//! | `POST` | `/undo` | Compensate entries by id, position, or run |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "collection must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `archive_error` (422), `internal` (500).
//!
//! # CORS
//!
//! Only the origins listed in `[server].allowed_origins` get CORS headers.
//! With an empty list no CORS layer is installed and browsers keep the
//! same-origin policy.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

use crate::archive::UnpackedArchive;
use crate::audit::{AuditLog, UndoOutcome, UndoResult};
use crate::config::Config;
use crate::error::RelayError;
use crate::ingest::Dispatcher;
use crate::models::{AuditRecord, DispatchReport, DispatchRequest, EntryId};
use crate::remote::{HttpRemoteIndex, RemoteIndex};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    dispatcher: Arc<Dispatcher>,
    audit: Arc<AuditLog>,
    remote: Arc<dyn RemoteIndex>,
}

impl AppState {
    /// Wire the dispatcher and the undo path to the same audit log and remote.
    pub fn new(config: Arc<Config>, remote: Arc<dyn RemoteIndex>, audit: Arc<AuditLog>) -> Self {
        let dispatcher = Dispatcher::new(config.clone(), remote.clone(), audit.clone());
        Self::with_dispatcher(config, Arc::new(dispatcher))
    }

    pub fn with_dispatcher(config: Arc<Config>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            audit: dispatcher.audit().clone(),
            remote: dispatcher.remote().clone(),
            config,
            dispatcher,
        }
    }
}

/// Starts the HTTP server on `[server].bind`.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let config = Arc::new(config.clone());
    let remote = Arc::new(HttpRemoteIndex::new(&config.remote)?);
    let audit = Arc::new(AuditLog::from_config(&config.audit));
    let app = router(AppState::new(config.clone(), remote, audit));

    info!(bind = %bind_addr, remote = %config.remote.base_url, "relay server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router; exposed so tests can serve it on an ephemeral port.
pub fn router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.archive.max_archive_bytes).unwrap_or(usize::MAX);
    let cors = cors_layer(&state.config.server.allowed_origins);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/archives", post(handle_archive))
        .route("/audit", get(handle_audit))
        .route("/undo", post(handle_undo))
        .layer(DefaultBodyLimit::max(body_limit));

    match cors {
        Some(cors) => app.layer(cors).with_state(state),
        None => app.with_state(state),
    }
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    if origins.is_empty() {
        return None;
    }
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any),
    )
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"archive_error"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Configuration(msg) => bad_request(msg),
            RelayError::Archive(msg) => AppError {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                code: "archive_error".to_string(),
                message: msg,
            },
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /archives ============

#[derive(Deserialize)]
struct ArchiveQuery {
    collection: String,
    doc_type: String,
    #[serde(default)]
    user: Option<String>,
}

/// Unpack the uploaded zip into a temporary directory, dispatch every file
/// in it, and remove the directory afterwards.
async fn handle_archive(
    State(state): State<AppState>,
    Query(query): Query<ArchiveQuery>,
    body: Bytes,
) -> Result<Json<DispatchReport>, AppError> {
    if body.is_empty() {
        return Err(bad_request("request body must be a zip archive"));
    }

    let archive_config = state.config.archive.clone();
    let unpacked =
        tokio::task::spawn_blocking(move || UnpackedArchive::unpack(&body, &archive_config))
            .await
            .map_err(|e| AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal".to_string(),
                message: e.to_string(),
            })??;
    if unpacked.files().is_empty() {
        return Err(RelayError::archive("archive contains no files").into());
    }

    let request = DispatchRequest {
        files: unpacked.files().to_vec(),
        collection: query.collection,
        doc_type: query.doc_type,
        user: acting_user(&state, query.user),
    };
    let report = state.dispatcher.dispatch(request).await?;
    Ok(Json(report))
}

// ============ GET /audit ============

#[derive(Deserialize)]
struct AuditQuery {
    #[serde(default)]
    user: Option<String>,
}

#[derive(Serialize)]
struct AuditResponse {
    entries: Vec<AuditRecord>,
}

async fn handle_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Json<AuditResponse> {
    let entries = match query.user.as_deref().map(str::trim) {
        Some(user) if !user.is_empty() => state.audit.entries_for(user),
        _ => state.audit.entries(),
    };
    Json(AuditResponse {
        entries: entries.iter().map(AuditRecord::from_entry).collect(),
    })
}

// ============ POST /undo ============

/// Exactly one selector (`ids`, `positions`, or `run_id`) must be given.
#[derive(Deserialize)]
struct UndoBody {
    #[serde(default)]
    ids: Option<Vec<EntryId>>,
    #[serde(default)]
    positions: Option<Vec<usize>>,
    #[serde(default)]
    run_id: Option<Uuid>,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Serialize)]
struct UndoView {
    entry_id: Option<EntryId>,
    position: Option<usize>,
    /// `removed`, `dismissed`, `refused`, or `failed`.
    outcome: &'static str,
    identifier: Option<String>,
    message: Option<String>,
}

impl From<UndoResult> for UndoView {
    fn from(result: UndoResult) -> Self {
        let (outcome, identifier, message) = match result.outcome {
            UndoOutcome::Removed { identifier } => ("removed", Some(identifier), None),
            UndoOutcome::Dismissed => ("dismissed", None, None),
            UndoOutcome::Refused(e) => ("refused", None, Some(e.to_string())),
            UndoOutcome::Failed(e) => ("failed", None, Some(e.to_string())),
        };
        Self {
            entry_id: result.entry_id,
            position: result.position,
            outcome,
            identifier,
            message,
        }
    }
}

#[derive(Serialize)]
struct UndoResponse {
    succeeded: usize,
    failed: usize,
    results: Vec<UndoView>,
}

async fn handle_undo(
    State(state): State<AppState>,
    Json(body): Json<UndoBody>,
) -> Result<Json<UndoResponse>, AppError> {
    let user = acting_user(&state, body.user);
    let remote = state.remote.as_ref();

    let results = match (body.ids, body.positions, body.run_id) {
        (Some(ids), None, None) => state.audit.undo(&ids, &user, remote).await,
        (None, Some(positions), None) => state.audit.undo_positions(&positions, &user, remote).await,
        (None, None, Some(run_id)) => state.audit.undo_run(run_id, &user, remote).await,
        _ => {
            return Err(bad_request(
                "exactly one of ids, positions or run_id must be given",
            ))
        }
    };

    let succeeded = results.iter().filter(|r| r.is_success()).count();
    let failed = results.len() - succeeded;
    info!(user = %user, succeeded, failed, "undo processed");
    Ok(Json(UndoResponse {
        succeeded,
        failed,
        results: results.into_iter().map(UndoView::from).collect(),
    }))
}

fn acting_user(state: &AppState, user: Option<String>) -> String {
    user.map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| state.config.audit.default_user.clone())
}
