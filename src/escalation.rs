//! The confirmation window and the escalation decision.
//!
//! One timer runs per session. It waits up to the confirmation window in
//! ticks, stopping early when the user cancels (no alerts) or the
//! confirmation call fails (alert right away). It then decides whether the
//! user confirmed safety and tears the session down, exactly once.
//!
//! # Cancellation
//!
//! The cancel flag is read at every tick and whenever the timer is woken.
//! A cancel that arrives after the last check, while the decision is being
//! taken, is not guaranteed to stop the alerts. That window is accepted.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::SosConfig;
use crate::model::{CallOutcome, EscalationReason, Resolution, SessionRecord};
use crate::notifier::GuardianNotifier;
use crate::session::{SessionHub, Tick};
use crate::storage::SessionStore;

/// Result of the decision step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    ConfirmedSafe,
    Escalate(EscalationReason),
}

/// Decide from the call outcome whether the user confirmed safety.
///
/// An answered call held for at least `min_duration_secs` is confirmation.
/// Anything else escalates, tagged with why.
pub fn decide(outcome: &CallOutcome, min_duration_secs: u32) -> Decision {
    if outcome.answered && outcome.duration_seconds >= min_duration_secs {
        Decision::ConfirmedSafe
    } else if !outcome.answered {
        Decision::Escalate(EscalationReason::NoAnswer)
    } else if outcome.completed {
        Decision::Escalate(EscalationReason::ShortDuration)
    } else {
        Decision::Escalate(EscalationReason::AutoEndedUnconfirmed)
    }
}

enum WaitOutcome {
    Cancelled,
    Decide,
    Gone,
}

/// Single-shot task driving one session from Active to Idle.
pub struct EscalationTimer {
    hub: Arc<SessionHub>,
    store: Arc<dyn SessionStore>,
    notifier: GuardianNotifier,
    window: Duration,
    tick: Duration,
    min_confirm_duration_secs: u32,
}

impl EscalationTimer {
    pub fn new(
        hub: Arc<SessionHub>,
        store: Arc<dyn SessionStore>,
        notifier: GuardianNotifier,
        config: &SosConfig,
    ) -> Self {
        Self {
            hub,
            store,
            notifier,
            window: config.confirmation_window,
            tick: config.tick,
            min_confirm_duration_secs: config.min_confirm_duration_secs,
        }
    }

    /// Run the window, decide, notify if needed, and tear the session down.
    #[instrument(skip(self))]
    pub async fn run(self, session_id: Uuid) -> Resolution {
        let resolution = match self.wait(session_id).await {
            WaitOutcome::Cancelled => {
                info!("SOS cancelled by PIN, no alerts sent");
                Resolution::Cancelled
            }
            WaitOutcome::Gone => {
                warn!("Session disappeared before the decision, no alerts sent");
                return Resolution::Cancelled;
            }
            WaitOutcome::Decide => self.resolve(session_id).await,
        };

        self.teardown(session_id, &resolution).await;
        resolution
    }

    async fn wait(&self, session_id: Uuid) -> WaitOutcome {
        let deadline = Instant::now() + self.window;
        let mut ticker = tokio::time::interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = tokio::time::sleep_until(deadline) => {}
                _ = self.hub.woken() => {}
            }

            match self.hub.poll(session_id).await {
                Tick::Cancelled => return WaitOutcome::Cancelled,
                Tick::Gone => return WaitOutcome::Gone,
                Tick::CallFailed => {
                    warn!("Confirmation call failed, alerting without waiting out the window");
                    return WaitOutcome::Decide;
                }
                Tick::Pending => {}
            }

            if Instant::now() >= deadline {
                return WaitOutcome::Decide;
            }
        }
    }

    async fn resolve(&self, session_id: Uuid) -> Resolution {
        let Some((outcome, location)) = self.hub.begin_resolving(session_id).await else {
            warn!("Session disappeared before the decision, no alerts sent");
            return Resolution::Cancelled;
        };

        let reason = match decide(&outcome, self.min_confirm_duration_secs) {
            Decision::ConfirmedSafe => {
                info!(
                    duration_seconds = outcome.duration_seconds,
                    "User answered and stayed on the line, assumed safe"
                );
                return Resolution::ConfirmedSafe;
            }
            Decision::Escalate(reason) => reason,
        };

        warn!(%reason, ?outcome, "Safety not confirmed, alerting guardians");

        let guardians = match self.store.load_profile().await {
            Ok(Some(profile)) => profile.guardians,
            Ok(None) => {
                warn!("No registered profile at decision time");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Failed to load guardians");
                Vec::new()
            }
        };

        let outcomes = self.notifier.notify(&guardians, &location, reason).await;
        let reached = outcomes
            .iter()
            .filter(|o| o.sms.is_sent() || o.call.is_sent())
            .count();
        if reached == 0 {
            warn!(%reason, guardians = guardians.len(), "No guardians were notified");
        } else {
            info!(%reason, reached, "Guardians alerted");
        }

        Resolution::GuardiansAlerted { reason, outcomes }
    }

    async fn teardown(&self, session_id: Uuid, resolution: &Resolution) {
        let Some(session) = self.hub.finish(session_id).await else {
            return;
        };

        let (reason, guardians_notified) = match resolution {
            Resolution::GuardiansAlerted { reason, outcomes } => (
                Some(reason.as_str().to_string()),
                outcomes.iter().filter(|o| o.sms.is_sent()).count() as i64,
            ),
            _ => (None, 0),
        };

        let record = SessionRecord {
            id: session.id,
            started_at: session.started_at,
            resolved_at: Utc::now(),
            resolution: resolution.label().to_string(),
            reason,
            location: session.location.to_string(),
            guardians_notified,
        };

        if let Err(e) = self.store.record_session(&record).await {
            warn!(error = %e, "Failed to record resolved session");
        }
    }
}
