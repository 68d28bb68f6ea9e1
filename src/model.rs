//! Data models for Raksha.
//!
//! Domain types shared by the SOS core (classifications, call events, session
//! snapshots) and the request/response bodies of the HTTP API.
//!
//! # Sensitive Data
//!
//! The user's PIN lives only in [`UserProfile`], which is never serialized
//! into a response and never logged.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Binary judgment produced by the distress classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Classification {
    Distress,
    Normal,
}

impl Classification {
    /// The label reported to API callers ("DISTRESS" or "NORMAL").
    pub fn label(self) -> &'static str {
        match self {
            Classification::Distress => "DISTRESS",
            Classification::Normal => "NORMAL",
        }
    }
}

/// A single classified text sample.
///
/// Transient: produced per inbound sample and consumed immediately by the
/// distress aggregator.
#[derive(Debug, Clone)]
pub struct DistressEvent {
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub classification: Classification,
}

/// Last reported position of the user.
///
/// Kept as the opaque string the device sends (usually `"lat,lng"`); the
/// core only embeds it in a maps link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(String);

impl Location {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.trim().is_empty() {
            Self::default()
        } else {
            Self(value)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A maps link pointing at this location, suitable for an SMS body.
    pub fn maps_link(&self) -> String {
        format!("https://maps.google.com/?q={}", urlencoding::encode(&self.0))
    }
}

impl Default for Location {
    fn default() -> Self {
        Self("unknown".to_string())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The registered user, as written by the external registration flow.
///
/// Read-only to the core except for PIN comparison during cancellation.
#[derive(Clone)]
pub struct UserProfile {
    pub phone: String,
    pub pin: String,
    /// Ordered, de-duplicated guardian phone numbers.
    pub guardians: Vec<String>,
}

impl UserProfile {
    pub fn pin_matches(&self, candidate: &str) -> bool {
        self.pin == candidate
    }
}

impl fmt::Debug for UserProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserProfile")
            .field("phone", &self.phone)
            .field("pin", &"<redacted>")
            .field("guardians", &self.guardians)
            .finish()
    }
}

/// Lifecycle state of an SOS session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SosState {
    /// No session exists.
    Idle,
    /// Confirmation window running.
    Active,
    /// Decision taken, guardian notification (if any) in flight.
    Resolving,
    /// Terminal; the slot is released right after this is recorded.
    Resolved,
}

/// Why the confirmation call did not connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    NoAnswer,
    Busy,
    Failed,
    Canceled,
    /// The call could not be placed at all (provider error or not configured).
    DispatchFailed,
}

/// Lifecycle state of the outbound confirmation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Initiated,
    Ringing,
    Answered,
    Completed,
    Failed,
}

impl CallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallStatus::Completed | CallStatus::Failed)
    }
}

/// A call-lifecycle event delivered by the telephony provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    Initiated,
    Ringing,
    Answered,
    Completed,
    Failed(FailureReason),
}

impl CallEvent {
    /// The tracker state this event moves the call into.
    pub fn target(self) -> CallStatus {
        match self {
            CallEvent::Initiated => CallStatus::Initiated,
            CallEvent::Ringing => CallStatus::Ringing,
            CallEvent::Answered => CallStatus::Answered,
            CallEvent::Completed => CallStatus::Completed,
            CallEvent::Failed(_) => CallStatus::Failed,
        }
    }
}

/// Error returned when a provider status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown call status: {0}")]
pub struct UnknownCallStatus(pub String);

impl FromStr for CallEvent {
    type Err = UnknownCallStatus;

    /// Parse a Twilio `CallStatus` value.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" | "initiated" => Ok(CallEvent::Initiated),
            "ringing" => Ok(CallEvent::Ringing),
            "in-progress" | "answered" => Ok(CallEvent::Answered),
            "completed" => Ok(CallEvent::Completed),
            "no-answer" => Ok(CallEvent::Failed(FailureReason::NoAnswer)),
            "busy" => Ok(CallEvent::Failed(FailureReason::Busy)),
            "failed" => Ok(CallEvent::Failed(FailureReason::Failed)),
            "canceled" => Ok(CallEvent::Failed(FailureReason::Canceled)),
            other => Err(UnknownCallStatus(other.to_string())),
        }
    }
}

/// What is known about the confirmation call at a point in time.
///
/// Reset with every new session; read once by the escalation timer when it
/// takes its decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallOutcome {
    pub answered: bool,
    /// Set once the call reached `Completed`.
    pub completed: bool,
    /// Reported call duration; 0 until the call completes.
    pub duration_seconds: u32,
    pub failure_reason: Option<FailureReason>,
}

impl CallOutcome {
    pub fn failed(&self) -> bool {
        self.failure_reason.is_some()
    }
}

/// Why guardians were alerted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// The call was never answered (includes busy, failed and dispatch errors).
    NoAnswer,
    /// Answered, but hung up before the confirmation duration.
    ShortDuration,
    /// Answered, but still unconfirmed when the window closed.
    AutoEndedUnconfirmed,
}

impl EscalationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EscalationReason::NoAnswer => "no_answer",
            EscalationReason::ShortDuration => "short_duration",
            EscalationReason::AutoEndedUnconfirmed => "auto_ended_unconfirmed",
        }
    }

    /// Human-readable wording used in guardian SMS.
    pub fn description(self) -> &'static str {
        match self {
            EscalationReason::NoAnswer => "No answer / failed / busy",
            EscalationReason::ShortDuration => "Answered but cut manually (short duration)",
            EscalationReason::AutoEndedUnconfirmed => {
                "Call ended automatically without confirmation"
            }
        }
    }
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one delivery attempt (SMS or voice call) to one guardian.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Delivery {
    Sent { reference: String },
    Failed { error: String },
    /// Provider not configured; nothing was attempted.
    Skipped,
}

impl Delivery {
    pub fn is_sent(&self) -> bool {
        matches!(self, Delivery::Sent { .. })
    }
}

/// Per-guardian notification result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardianOutcome {
    pub guardian: String,
    pub sms: Delivery,
    pub call: Delivery,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    /// The user entered their PIN before the decision step.
    Cancelled,
    /// The confirmation call was answered and held long enough.
    ConfirmedSafe,
    /// Guardians were (attempted to be) alerted.
    GuardiansAlerted {
        reason: EscalationReason,
        outcomes: Vec<GuardianOutcome>,
    },
}

impl Resolution {
    pub fn label(&self) -> &'static str {
        match self {
            Resolution::Cancelled => "cancelled",
            Resolution::ConfirmedSafe => "confirmed_safe",
            Resolution::GuardiansAlerted { .. } => "guardians_alerted",
        }
    }
}

/// Point-in-time view of the SOS slot.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: SosState,
    pub session_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub location: Location,
    pub call_sid: Option<String>,
    pub call_status: Option<CallStatus>,
    pub call_outcome: Option<CallOutcome>,
    pub cancel_requested: bool,
}

/// A resolved session as persisted in the history table.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub resolved_at: DateTime<Utc>,
    pub resolution: String,
    pub reason: Option<String>,
    pub location: String,
    pub guardians_notified: i64,
}

// ============================================================================
// HTTP request/response bodies
// ============================================================================

/// Request body for POST /check_distress.
#[derive(Debug, Clone, Deserialize)]
pub struct TextRequest {
    #[serde(default)]
    pub text: String,
}

/// Response for POST /check_distress.
#[derive(Debug, Clone, Serialize)]
pub struct TextResponse {
    pub result: Classification,
    pub session_triggered: bool,
}

/// Request body for POST /sos_trigger.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerRequest {
    pub location: Option<String>,
}

/// Outcome of a trigger attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started(Uuid),
    /// A session was already running; nothing new was started.
    AlreadyActive(Uuid),
}

/// Response for POST /sos_trigger.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerResponse {
    pub status: &'static str,
    pub session_id: Uuid,
}

impl From<TriggerOutcome> for TriggerResponse {
    fn from(outcome: TriggerOutcome) -> Self {
        match outcome {
            TriggerOutcome::Started(session_id) => Self {
                status: "started",
                session_id,
            },
            TriggerOutcome::AlreadyActive(session_id) => Self {
                status: "already_active",
                session_id,
            },
        }
    }
}

/// Request body for POST /cancel_sos.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub pin: Option<String>,
}

/// Request body for POST /update_location.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationRequest {
    #[serde(default)]
    pub location: Option<String>,
}

/// Simple `{"status": ...}` acknowledgement.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

/// Form body of the provider's call-status webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct CallStatusForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "CallStatus")]
    pub call_status: String,
    #[serde(rename = "CallDuration", default)]
    pub call_duration: Option<String>,
}

/// Query string of the call-status webhook; carries the session tag.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallStatusQuery {
    pub session_id: Option<Uuid>,
}

/// A call-status event after parsing, ready to be routed to a session.
#[derive(Debug, Clone)]
pub struct CallStatusReport {
    pub call_sid: String,
    pub session_id: Option<Uuid>,
    pub event: CallEvent,
    pub duration_seconds: Option<u32>,
}

/// Response for GET /.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub twilio_ready: bool,
    pub sos_active: bool,
    pub user_registered: bool,
}

/// Query parameters for GET /sos/history.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: u32,
}

fn default_history_limit() -> u32 {
    20
}
