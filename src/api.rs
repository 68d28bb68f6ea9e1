//! HTTP API handlers for Raksha.
//!
//! Thin adapters between HTTP and [`SosController`]. Every handler returns
//! immediately; the confirmation call and escalation run in background tasks.
//!
//! # Sensitive Data
//!
//! PINs are accepted by `POST /cancel_sos` only, compared and dropped. They
//! are never logged or echoed back.

use axum::{
    Form, Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tracing::{instrument, warn};

use crate::controller::SosController;
use crate::error::SosError;
use crate::model::{
    CallEvent, CallStatusForm, CallStatusQuery, CallStatusReport, CancelRequest, HealthResponse,
    HistoryQuery, Location, LocationRequest, SessionRecord, SessionSnapshot, StatusResponse,
    TextRequest, TextResponse, TriggerRequest, TriggerResponse,
};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: SosController,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(get_status))
        .route("/health", get(health_check))
        .route("/check_distress", post(post_check_distress))
        .route("/sos_trigger", post(post_sos_trigger))
        .route("/cancel_sos", post(post_cancel_sos))
        .route("/update_location", post(post_update_location))
        .route("/call_status", post(post_call_status))
        .route("/sos/status", get(get_session))
        .route("/sos/history", get(get_history))
        .with_state(state)
}

impl IntoResponse for SosError {
    fn into_response(self) -> Response {
        let status = match &self {
            SosError::NotRegistered | SosError::MissingField(_) => StatusCode::BAD_REQUEST,
            SosError::InvalidPin => StatusCode::UNAUTHORIZED,
            SosError::NoActiveSession => StatusCode::CONFLICT,
            SosError::Classifier(_) => StatusCode::BAD_GATEWAY,
            SosError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &self {
            SosError::Storage(e) => {
                warn!(error = %e, "Storage failure");
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// GET / - Service status.
///
/// # Response
///
/// ```json
/// {
///     "status": "backend_running",
///     "twilio_ready": true,
///     "sos_active": false,
///     "user_registered": true
/// }
/// ```
pub async fn get_status(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(state.controller.health().await)
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// POST /check_distress - Classify a transcribed text sample.
///
/// Three distress samples in quick succession start an SOS session.
///
/// # Request Body
///
/// ```json
/// { "text": "please help me" }
/// ```
///
/// # Response
///
/// ```json
/// { "result": "DISTRESS", "session_triggered": false }
/// ```
#[instrument(skip(state, request))]
pub async fn post_check_distress(
    State(state): State<AppState>,
    Json(request): Json<TextRequest>,
) -> Result<Json<TextResponse>, SosError> {
    let response = state.controller.observe_text(&request.text).await?;
    Ok(Json(response))
}

/// POST /sos_trigger - Start an SOS session.
///
/// # Request Body
///
/// ```json
/// { "location": "12.97,77.59" }
/// ```
///
/// The body is optional; without a location the last reported one is used.
///
/// # Response
///
/// `{"status": "started", "session_id": "..."}`, or
/// `{"status": "already_active", ...}` when a session is running.
#[instrument(skip(state, request))]
pub async fn post_sos_trigger(
    State(state): State<AppState>,
    request: Option<Json<TriggerRequest>>,
) -> Result<Json<TriggerResponse>, SosError> {
    let location = request
        .and_then(|Json(r)| r.location)
        .map(Location::new);
    let outcome = state.controller.trigger(location).await?;
    Ok(Json(outcome.into()))
}

/// POST /cancel_sos - Cancel the active session with the user's PIN.
///
/// # Responses
///
/// - `200` `{"status": "cancelled"}`
/// - `401` wrong PIN
/// - `409` no session running
#[instrument(skip(state, request))]
pub async fn post_cancel_sos(
    State(state): State<AppState>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<StatusResponse>, SosError> {
    let pin = request.pin.unwrap_or_default();
    state.controller.cancel(pin.trim()).await?;
    Ok(Json(StatusResponse {
        status: "cancelled",
    }))
}

/// POST /update_location - Record the user's latest location.
#[instrument(skip(state))]
pub async fn post_update_location(
    State(state): State<AppState>,
    Json(request): Json<LocationRequest>,
) -> Json<StatusResponse> {
    let location = request.location.map(Location::new).unwrap_or_default();
    state.controller.update_location(location).await;
    Json(StatusResponse {
        status: "location_updated",
    })
}

/// POST /call_status - Provider call-status webhook.
///
/// Form-encoded (`CallSid`, `CallStatus`, `CallDuration`); the query string
/// carries the `session_id` the call was placed for. Always answers `200` so
/// the provider does not retry events we chose to drop.
#[instrument(skip(state, form), fields(call_sid = %form.call_sid, call_status = %form.call_status))]
pub async fn post_call_status(
    State(state): State<AppState>,
    Query(query): Query<CallStatusQuery>,
    Form(form): Form<CallStatusForm>,
) -> StatusCode {
    let event = match form.call_status.parse::<CallEvent>() {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Unrecognised call status dropped");
            return StatusCode::OK;
        }
    };

    let duration_seconds = form
        .call_duration
        .as_deref()
        .and_then(|d| d.trim().parse::<u32>().ok());

    state
        .controller
        .report_call_status(CallStatusReport {
            call_sid: form.call_sid,
            session_id: query.session_id,
            event,
            duration_seconds,
        })
        .await;

    StatusCode::OK
}

/// GET /sos/status - Snapshot of the current session.
pub async fn get_session(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.controller.status().await)
}

/// GET /sos/history - Recently resolved sessions, newest first.
///
/// # Query Parameters
///
/// - `limit` (optional): Maximum number of sessions (default: 20)
#[instrument(skip(state))]
pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<SessionRecord>>, SosError> {
    Ok(Json(state.controller.history(query.limit).await?))
}
