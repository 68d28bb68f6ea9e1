//! The single SOS session slot and its synchronization point.
//!
//! Every read and write of the active session, its call outcome and its
//! cancellation flag goes through [`SessionHub`]. The hub pairs one mutex
//! with a [`Notify`] so the escalation timer can be woken early when the
//! user cancels or the confirmation call fails.

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{
    CallEvent, CallOutcome, CallStatusReport, FailureReason, Location, SessionSnapshot, SosState,
    TriggerOutcome,
};
use crate::tracker::{CallStatusTracker, Transition};

/// One trigger-to-resolution lifecycle.
#[derive(Debug, Clone)]
pub struct SosSession {
    pub id: Uuid,
    pub state: SosState,
    pub started_at: DateTime<Utc>,
    pub location: Location,
    pub call: CallStatusTracker,
    pub cancel_requested: bool,
}

/// What the escalation timer sees when it polls the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Pending,
    Cancelled,
    CallFailed,
    /// The session is no longer the active one.
    Gone,
}

/// Result of routing a provider call-status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    Applied { session_id: Uuid, transition: Transition },
    /// No session owns this call id; the event was dropped.
    Unroutable,
}

#[derive(Debug, Default)]
struct Slot {
    session: Option<SosSession>,
    latest_location: Location,
}

/// Mutex-guarded owner of the (at most one) active session.
#[derive(Debug, Default)]
pub struct SessionHub {
    slot: Mutex<Slot>,
    wake: Notify,
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn active_id(&self) -> Option<Uuid> {
        self.slot.lock().await.session.as_ref().map(|s| s.id)
    }

    /// Create a new active session unless one already exists.
    ///
    /// The check and the creation happen under one lock, so two racing
    /// triggers produce exactly one session.
    pub async fn begin(&self, location: Option<Location>) -> TriggerOutcome {
        let mut slot = self.slot.lock().await;
        if let Some(existing) = &slot.session {
            return TriggerOutcome::AlreadyActive(existing.id);
        }

        if let Some(location) = location {
            slot.latest_location = location;
        }

        let session = SosSession {
            id: Uuid::new_v4(),
            state: SosState::Active,
            started_at: Utc::now(),
            location: slot.latest_location.clone(),
            call: CallStatusTracker::new(),
            cancel_requested: false,
        };
        let id = session.id;
        slot.session = Some(session);
        TriggerOutcome::Started(id)
    }

    /// Flag the active session for cancellation and wake the timer.
    pub async fn request_cancel(&self) -> Option<Uuid> {
        let id = {
            let mut slot = self.slot.lock().await;
            let session = slot.session.as_mut()?;
            session.cancel_requested = true;
            session.id
        };
        self.wake.notify_one();
        Some(id)
    }

    pub async fn update_location(&self, location: Location) {
        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.session.as_mut() {
            session.location = location.clone();
        }
        slot.latest_location = location;
    }

    /// Attach the provider's call id to the session that placed the call.
    pub async fn bind_call(&self, session_id: Uuid, call_sid: &str) -> bool {
        let mut slot = self.slot.lock().await;
        match slot.session.as_mut() {
            Some(session) if session.id == session_id => session.call.bind(call_sid),
            _ => false,
        }
    }

    /// Mark the confirmation call as failed because it could not be placed.
    pub async fn mark_dispatch_failed(&self, session_id: Uuid) {
        {
            let mut slot = self.slot.lock().await;
            let Some(session) = slot.session.as_mut().filter(|s| s.id == session_id) else {
                return;
            };
            session
                .call
                .apply(CallEvent::Failed(FailureReason::DispatchFailed), None);
        }
        self.wake.notify_one();
    }

    /// Route a provider event to the session owning the call.
    ///
    /// Events are matched by call id. An event tagged with the active
    /// session's id may bind the call id if the call task has not done so yet.
    pub async fn route_call_event(&self, report: &CallStatusReport) -> Routing {
        let routing = {
            let mut slot = self.slot.lock().await;
            let Some(session) = slot.session.as_mut() else {
                return Routing::Unroutable;
            };

            let tagged = report.session_id == Some(session.id);
            if session.call.call_sid().is_none() && tagged {
                session.call.bind(&report.call_sid);
            }
            if !session.call.accepts(&report.call_sid) {
                return Routing::Unroutable;
            }

            let transition = session.call.apply(report.event, report.duration_seconds);
            Routing::Applied {
                session_id: session.id,
                transition,
            }
        };

        if let Routing::Applied {
            transition: Transition::Moved(status),
            ..
        } = routing
        {
            if status == crate::model::CallStatus::Failed {
                self.wake.notify_one();
            }
        }
        routing
    }

    /// Check the session on behalf of the escalation timer.
    pub async fn poll(&self, session_id: Uuid) -> Tick {
        let slot = self.slot.lock().await;
        match slot.session.as_ref() {
            Some(session) if session.id == session_id => {
                if session.cancel_requested {
                    Tick::Cancelled
                } else if session.call.outcome().failed() {
                    Tick::CallFailed
                } else {
                    Tick::Pending
                }
            }
            _ => Tick::Gone,
        }
    }

    /// Move the session to `Resolving` and snapshot what the decision needs.
    ///
    /// Cancellation is not re-checked here: a cancel that lands after the
    /// last tick is best-effort only.
    pub async fn begin_resolving(&self, session_id: Uuid) -> Option<(CallOutcome, Location)> {
        let mut slot = self.slot.lock().await;
        let session = slot.session.as_mut().filter(|s| s.id == session_id)?;
        session.state = SosState::Resolving;
        Some((session.call.outcome().clone(), session.location.clone()))
    }

    /// Mark the session resolved and release the slot back to idle.
    pub async fn finish(&self, session_id: Uuid) -> Option<SosSession> {
        let mut slot = self.slot.lock().await;
        if slot.session.as_ref().map(|s| s.id) != Some(session_id) {
            warn!(%session_id, "Teardown for a session that is not active");
            return None;
        }
        let mut session = slot.session.take()?;
        session.state = SosState::Resolved;
        info!(%session_id, "SOS state reset");
        Some(session)
    }

    /// Wait until someone wakes the escalation timer.
    pub async fn woken(&self) {
        self.wake.notified().await;
        debug!("Escalation timer woken");
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let slot = self.slot.lock().await;
        match slot.session.as_ref() {
            Some(session) => SessionSnapshot {
                state: session.state,
                session_id: Some(session.id),
                started_at: Some(session.started_at),
                location: session.location.clone(),
                call_sid: session.call.call_sid().map(str::to_string),
                call_status: session.call.status(),
                call_outcome: Some(session.call.outcome().clone()),
                cancel_requested: session.cancel_requested,
            },
            None => SessionSnapshot {
                state: SosState::Idle,
                session_id: None,
                started_at: None,
                location: slot.latest_location.clone(),
                call_sid: None,
                call_status: None,
                call_outcome: None,
                cancel_requested: false,
            },
        }
    }
}
