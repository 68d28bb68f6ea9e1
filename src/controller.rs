//! The SOS controller: owner of the session lifecycle.
//!
//! # Flow
//!
//! ```text
//! ObserveText ─> Classifier ─> DistressAggregator ─┐
//!                                                  ├─> Trigger
//! TriggerSos ──────────────────────────────────────┘      │
//!                          ┌──────────────────────────────┤
//!                          v                              v
//!                confirmation call task          EscalationTimer task
//!                          │                              │
//! ReportCallStatus ─> CallStatusTracker ──(outcome)──────>│
//! CancelSos ────────> cancel flag ───────────────────────>│
//!                                                         v
//!                                      GuardianNotifier (if unconfirmed)
//!                                                         v
//!                                                       Idle
//! ```
//!
//! Trigger returns as soon as both tasks are spawned. Their join handles are
//! kept so a session can be awaited with [`SosController::wait_idle`].

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::aggregation::DistressAggregator;
use crate::classifier::Classifier;
use crate::config::SosConfig;
use crate::error::SosError;
use crate::escalation::EscalationTimer;
use crate::model::{
    CallStatusReport, Classification, DistressEvent, HealthResponse, Location, Resolution,
    SessionRecord, SessionSnapshot, TextResponse, TriggerOutcome,
};
use crate::notifier::GuardianNotifier;
use crate::session::{Routing, SessionHub};
use crate::storage::SessionStore;
use crate::telephony::{Telephony, VoiceScript};
use crate::tracker::Transition;

/// Handles of the tasks spawned for one session.
struct SessionTasks {
    session_id: Uuid,
    call: JoinHandle<()>,
    escalation: JoinHandle<Resolution>,
}

struct Inner {
    hub: Arc<SessionHub>,
    aggregator: Mutex<DistressAggregator>,
    classifier: Arc<dyn Classifier>,
    telephony: Arc<dyn Telephony>,
    store: Arc<dyn SessionStore>,
    notifier: GuardianNotifier,
    config: SosConfig,
    public_url: Option<String>,
    tasks: Mutex<Option<SessionTasks>>,
}

/// Cheaply cloneable handle to the SOS core.
#[derive(Clone)]
pub struct SosController {
    inner: Arc<Inner>,
}

impl SosController {
    pub fn new(
        config: SosConfig,
        public_url: Option<String>,
        classifier: Arc<dyn Classifier>,
        telephony: Arc<dyn Telephony>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let aggregator = DistressAggregator::new(config.distress_threshold, config.debounce_window);
        Self {
            inner: Arc::new(Inner {
                hub: Arc::new(SessionHub::new()),
                aggregator: Mutex::new(aggregator),
                classifier,
                notifier: GuardianNotifier::new(telephony.clone()),
                telephony,
                store,
                config,
                public_url,
                tasks: Mutex::new(None),
            }),
        }
    }

    /// Classify a transcribed text sample and trigger SOS on a distress burst.
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    pub async fn observe_text(&self, text: &str) -> Result<TextResponse, SosError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SosError::MissingField("text"));
        }

        let classification = self.inner.classifier.classify(text).await?;
        debug!(text, label = classification.label(), "Voice text classified");

        let event = DistressEvent {
            text: text.to_string(),
            timestamp: Utc::now(),
            classification,
        };
        let fired = self.inner.aggregator.lock().await.observe_event(&event);

        let mut session_triggered = false;
        if fired {
            warn!("Distress threshold reached, triggering SOS");
            match self.trigger(None).await {
                Ok(TriggerOutcome::Started(_)) => session_triggered = true,
                Ok(TriggerOutcome::AlreadyActive(_)) => {}
                Err(e) => warn!(error = %e, "Automatic SOS trigger failed"),
            }
        } else if classification == Classification::Distress {
            let count = self.inner.aggregator.lock().await.window().count;
            info!(count, "Distress detected");
        }

        Ok(TextResponse {
            result: classification,
            session_triggered,
        })
    }

    /// Start an SOS session, or report the one already running.
    ///
    /// With no location the last reported one is used.
    #[instrument(skip(self))]
    pub async fn trigger(&self, location: Option<Location>) -> Result<TriggerOutcome, SosError> {
        if let Some(active) = self.inner.hub.active_id().await {
            info!(session_id = %active, "SOS already active, ignoring trigger");
            return Ok(TriggerOutcome::AlreadyActive(active));
        }

        let Some(profile) = self.inner.store.load_profile().await? else {
            warn!("SOS trigger failed: user not registered");
            return Err(SosError::NotRegistered);
        };

        // Held until the handles are stored; the slot always holds the newest session's tasks.
        let mut tasks = self.inner.tasks.lock().await;

        let session_id = match self.inner.hub.begin(location).await {
            TriggerOutcome::Started(id) => id,
            TriggerOutcome::AlreadyActive(active) => {
                info!(session_id = %active, "SOS already active, ignoring trigger");
                return Ok(TriggerOutcome::AlreadyActive(active));
            }
        };

        info!(%session_id, "SOS activated, starting confirmation call and escalation timer");

        let callback = self
            .inner
            .public_url
            .as_ref()
            .map(|base| format!("{}/call_status?session_id={}", base, session_id));
        let call = tokio::spawn(place_confirmation_call(
            self.inner.hub.clone(),
            self.inner.telephony.clone(),
            session_id,
            profile.phone,
            callback,
        ));

        let timer = EscalationTimer::new(
            self.inner.hub.clone(),
            self.inner.store.clone(),
            self.inner.notifier.clone(),
            &self.inner.config,
        );
        let escalation = tokio::spawn(timer.run(session_id));

        *tasks = Some(SessionTasks {
            session_id,
            call,
            escalation,
        });

        Ok(TriggerOutcome::Started(session_id))
    }

    /// Request cancellation of the active session.
    ///
    /// Only flags the session; the escalation timer observes the flag and
    /// performs the teardown.
    #[instrument(skip(self, pin))]
    pub async fn cancel(&self, pin: &str) -> Result<(), SosError> {
        if pin.is_empty() {
            return Err(SosError::MissingField("pin"));
        }

        let Some(profile) = self.inner.store.load_profile().await? else {
            return Err(SosError::NotRegistered);
        };

        if !profile.pin_matches(pin) {
            warn!("Cancel failed: invalid PIN");
            return Err(SosError::InvalidPin);
        }

        match self.inner.hub.request_cancel().await {
            Some(session_id) => {
                info!(%session_id, "PIN accepted, stopping SOS");
                Ok(())
            }
            None => {
                info!("Cancel requested with no active session");
                Err(SosError::NoActiveSession)
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn update_location(&self, location: Location) {
        info!(location = %location, "Location updated");
        self.inner.hub.update_location(location).await;
    }

    /// Feed a provider call-status event into the active session's tracker.
    ///
    /// Events for unknown or stale calls are dropped.
    #[instrument(skip(self), fields(call_sid = %report.call_sid, event = ?report.event))]
    pub async fn report_call_status(&self, report: CallStatusReport) -> Routing {
        let routing = self.inner.hub.route_call_event(&report).await;
        match routing {
            Routing::Applied {
                session_id,
                transition: Transition::Moved(status),
            } => info!(%session_id, ?status, "Call status applied"),
            Routing::Applied {
                session_id,
                transition: Transition::Amended,
            } => info!(%session_id, "Late call status amended the outcome"),
            Routing::Applied {
                transition: Transition::Ignored,
                ..
            } => debug!("Call status had no effect"),
            Routing::Unroutable => warn!("Call status for unknown call dropped"),
        }
        routing
    }

    pub async fn status(&self) -> SessionSnapshot {
        self.inner.hub.snapshot().await
    }

    pub async fn health(&self) -> HealthResponse {
        let user_registered = match self.inner.store.load_profile().await {
            Ok(profile) => profile.is_some(),
            Err(e) => {
                warn!(error = %e, "Failed to load profile for health check");
                false
            }
        };

        HealthResponse {
            status: "backend_running",
            twilio_ready: self.inner.telephony.is_ready(),
            sos_active: self.inner.hub.active_id().await.is_some(),
            user_registered,
        }
    }

    pub async fn history(&self, limit: u32) -> Result<Vec<SessionRecord>, SosError> {
        Ok(self.inner.store.recent_sessions(limit).await?)
    }

    /// Wait for the most recently started session to finish.
    ///
    /// Returns `None` if no session was started since the last call.
    pub async fn wait_idle(&self) -> Option<Resolution> {
        let tasks = self.inner.tasks.lock().await.take()?;

        if let Err(e) = tasks.call.await {
            warn!(session_id = %tasks.session_id, error = %e, "Confirmation call task failed");
        }

        match tasks.escalation.await {
            Ok(resolution) => Some(resolution),
            Err(e) => {
                warn!(session_id = %tasks.session_id, error = %e, "Escalation task failed");
                None
            }
        }
    }
}

/// Place the confirmation call and bind its id to the session.
///
/// A call that cannot be placed counts as a failed call, so the timer
/// escalates without waiting out the window.
async fn place_confirmation_call(
    hub: Arc<SessionHub>,
    telephony: Arc<dyn Telephony>,
    session_id: Uuid,
    phone: String,
    callback: Option<String>,
) {
    if !telephony.is_ready() {
        warn!(%session_id, "Confirmation call not placed: telephony provider not configured");
        hub.mark_dispatch_failed(session_id).await;
        return;
    }

    info!(%session_id, "Calling user");
    match telephony
        .place_call(&phone, VoiceScript::Confirmation, callback.as_deref())
        .await
    {
        Ok(call_sid) => {
            info!(%session_id, %call_sid, "Confirmation call created");
            if !hub.bind_call(session_id, &call_sid).await {
                warn!(%session_id, %call_sid, "Confirmation call could not be bound to the session");
            }
        }
        Err(e) => {
            warn!(%session_id, error = %e, "Confirmation call failed to dispatch");
            hub.mark_dispatch_failed(session_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::model::{CallEvent, Delivery, EscalationReason, FailureReason, SosState};
    use crate::telephony::UnconfiguredTelephony;
    use crate::testing::{KeywordClassifier, MemoryStore, MockTelephony, profile};

    struct Harness {
        controller: SosController,
        telephony: Arc<MockTelephony>,
        store: Arc<MemoryStore>,
    }

    fn harness(guardians: &[&str]) -> Harness {
        let telephony = Arc::new(MockTelephony::new());
        let store = Arc::new(MemoryStore::with_profile(profile(guardians)));
        let controller = SosController::new(
            SosConfig::default(),
            Some("https://raksha.example".to_string()),
            Arc::new(KeywordClassifier),
            telephony.clone(),
            store.clone(),
        );
        Harness {
            controller,
            telephony,
            store,
        }
    }

    /// The call id bound to the active session, once the call task ran.
    async fn bound_call_sid(controller: &SosController) -> String {
        for _ in 0..100 {
            if let Some(sid) = controller.status().await.call_sid {
                return sid;
            }
            tokio::task::yield_now().await;
        }
        panic!("confirmation call was never bound");
    }

    fn report(call_sid: &str, event: CallEvent, duration: Option<u32>) -> CallStatusReport {
        CallStatusReport {
            call_sid: call_sid.to_string(),
            session_id: None,
            event,
            duration_seconds: duration,
        }
    }

    #[test]
    fn test_handler_futures_are_send() {
        fn assert_send<T: Send>(_: &T) {}

        let h = harness(&[]);
        assert_send(&h.controller.observe_text("help"));
        assert_send(&h.controller.trigger(None));
        assert_send(&h.controller.cancel("4321"));
        assert_send(&h.controller.wait_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_is_idempotent() {
        let h = harness(&["+1555"]);

        let first = h.controller.trigger(Some(Location::new("1,2"))).await.unwrap();
        let second = h.controller.trigger(None).await.unwrap();

        let TriggerOutcome::Started(id) = first else {
            panic!("expected a new session");
        };
        assert_eq!(second, TriggerOutcome::AlreadyActive(id));

        h.controller.wait_idle().await.unwrap();
        assert_eq!(h.telephony.calls_to("+1000", VoiceScript::Confirmation), 1);
        assert_eq!(h.store.history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_call_carries_session_callback() {
        let h = harness(&[]);
        let TriggerOutcome::Started(id) = h.controller.trigger(None).await.unwrap() else {
            panic!("expected a new session");
        };
        h.controller.wait_idle().await;

        let calls = h.telephony.calls();
        assert_eq!(
            calls[0].2.as_deref(),
            Some(format!("https://raksha.example/call_status?session_id={}", id).as_str())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_decision_suppresses_alerts() {
        let h = harness(&["+1555", "+1777"]);
        h.controller.trigger(None).await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        h.controller.cancel("4321").await.unwrap();
        let cancelled_at = tokio::time::Instant::now();

        let resolution = h.controller.wait_idle().await.unwrap();
        assert_eq!(resolution, Resolution::Cancelled);
        assert!(cancelled_at.elapsed() <= SosConfig::default().tick);
        assert!(h.telephony.sms().is_empty());
        assert_eq!(h.controller.status().await.state, SosState::Idle);
        assert_eq!(h.store.history()[0].resolution, "cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_pin_has_no_effect() {
        let h = harness(&["+1555"]);
        h.controller.trigger(None).await.unwrap();

        assert!(matches!(
            h.controller.cancel("0000").await,
            Err(SosError::InvalidPin)
        ));
        assert!(!h.controller.status().await.cancel_requested);

        let resolution = h.controller.wait_idle().await.unwrap();
        assert!(matches!(resolution, Resolution::GuardiansAlerted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_without_session() {
        let h = harness(&[]);
        assert!(matches!(
            h.controller.cancel("4321").await,
            Err(SosError::NoActiveSession)
        ));
        assert!(matches!(
            h.controller.cancel("").await,
            Err(SosError::MissingField("pin"))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_answered_call_sends_no_alerts() {
        let h = harness(&["+1555"]);
        h.controller.trigger(None).await.unwrap();
        let sid = bound_call_sid(&h.controller).await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        h.controller
            .report_call_status(report(&sid, CallEvent::Answered, None))
            .await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        h.controller
            .report_call_status(report(&sid, CallEvent::Completed, Some(45)))
            .await;

        let resolution = h.controller.wait_idle().await.unwrap();
        assert_eq!(resolution, Resolution::ConfirmedSafe);
        assert!(h.telephony.sms().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_answered_arriving_after_completed_confirms_safety() {
        let h = harness(&["+1555"]);
        h.controller.trigger(None).await.unwrap();
        let sid = bound_call_sid(&h.controller).await;

        h.controller
            .report_call_status(report(&sid, CallEvent::Completed, Some(45)))
            .await;
        let routing = h
            .controller
            .report_call_status(report(&sid, CallEvent::Answered, None))
            .await;
        assert!(matches!(routing, Routing::Applied { .. }));
        assert!(h.controller.status().await.call_outcome.unwrap().answered);

        let resolution = h.controller.wait_idle().await.unwrap();
        assert_eq!(resolution, Resolution::ConfirmedSafe);
        assert!(h.telephony.sms().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_idle_follows_the_newest_session() {
        let h = harness(&["+1555"]);

        let TriggerOutcome::Started(first) = h.controller.trigger(None).await.unwrap() else {
            panic!("expected a new session");
        };
        h.controller.cancel("4321").await.unwrap();
        while h.controller.status().await.state != SosState::Idle {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let TriggerOutcome::Started(second) = h.controller.trigger(None).await.unwrap() else {
            panic!("expected a new session");
        };
        assert_ne!(first, second);

        let resolution = h.controller.wait_idle().await.unwrap();
        assert!(matches!(resolution, Resolution::GuardiansAlerted { .. }));
        assert!(h.controller.wait_idle().await.is_none());
        assert_eq!(h.store.history().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_call_alerts_guardians_early() {
        let h = harness(&["+1555", "+1777"]);
        let started = tokio::time::Instant::now();
        h.controller.trigger(None).await.unwrap();
        let sid = bound_call_sid(&h.controller).await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        h.controller
            .report_call_status(report(
                &sid,
                CallEvent::Failed(FailureReason::NoAnswer),
                None,
            ))
            .await;

        let resolution = h.controller.wait_idle().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));

        let Resolution::GuardiansAlerted { reason, outcomes } = resolution else {
            panic!("expected guardians to be alerted");
        };
        assert_eq!(reason, EscalationReason::NoAnswer);
        assert_eq!(outcomes.len(), 2);
        for guardian in ["+1555", "+1777"] {
            let sms: Vec<_> = h
                .telephony
                .sms()
                .into_iter()
                .filter(|(to, _)| to == guardian)
                .collect();
            assert_eq!(sms.len(), 1);
            assert_eq!(h.telephony.calls_to(guardian, VoiceScript::GuardianAlert), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_call_escalates_with_short_duration() {
        let h = harness(&["+1555"]);
        h.controller.trigger(None).await.unwrap();
        let sid = bound_call_sid(&h.controller).await;

        h.controller
            .report_call_status(report(&sid, CallEvent::Answered, None))
            .await;
        h.controller
            .report_call_status(report(&sid, CallEvent::Completed, Some(8)))
            .await;

        let Some(Resolution::GuardiansAlerted { reason, .. }) = h.controller.wait_idle().await
        else {
            panic!("expected guardians to be alerted");
        };
        assert_eq!(reason, EscalationReason::ShortDuration);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_without_events_alerts() {
        let h = harness(&["+1555"]);
        let started = tokio::time::Instant::now();
        h.controller.trigger(Some(Location::new("9,9"))).await.unwrap();

        let Some(Resolution::GuardiansAlerted { reason, .. }) = h.controller.wait_idle().await
        else {
            panic!("expected guardians to be alerted");
        };
        assert_eq!(reason, EscalationReason::NoAnswer);
        assert!(started.elapsed() >= Duration::from_secs(25));
        assert!(h.telephony.sms()[0].1.contains("9%2C9"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_location_update_reaches_alert() {
        let h = harness(&["+1555"]);
        h.controller.trigger(Some(Location::new("1,1"))).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        h.controller.update_location(Location::new("5,5")).await;

        h.controller.wait_idle().await.unwrap();
        assert!(h.telephony.sms()[0].1.contains("5%2C5"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_guardians_still_reaches_idle() {
        let h = harness(&[]);
        h.controller.trigger(None).await.unwrap();

        let Some(Resolution::GuardiansAlerted { outcomes, .. }) = h.controller.wait_idle().await
        else {
            panic!("expected an unconfirmed resolution");
        };
        assert!(outcomes.is_empty());
        assert_eq!(h.controller.status().await.state, SosState::Idle);
        assert!(!h.controller.health().await.sos_active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_events_after_resolution_are_dropped() {
        let h = harness(&[]);
        h.controller.trigger(None).await.unwrap();
        let sid = bound_call_sid(&h.controller).await;
        h.controller.wait_idle().await.unwrap();

        let routing = h
            .controller
            .report_call_status(report(&sid, CallEvent::Completed, Some(60)))
            .await;
        assert_eq!(routing, Routing::Unroutable);
        assert_eq!(h.controller.status().await.state, SosState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfigured_provider_still_resolves() {
        let store = Arc::new(MemoryStore::with_profile(profile(&["+1555"])));
        let controller = SosController::new(
            SosConfig::default(),
            None,
            Arc::new(KeywordClassifier),
            Arc::new(UnconfiguredTelephony),
            store.clone(),
        );

        let started = tokio::time::Instant::now();
        controller.trigger(None).await.unwrap();
        let Some(Resolution::GuardiansAlerted { reason, outcomes }) = controller.wait_idle().await
        else {
            panic!("expected an unconfirmed resolution");
        };

        assert!(started.elapsed() < Duration::from_secs(25));
        assert_eq!(reason, EscalationReason::NoAnswer);
        assert_eq!(outcomes[0].sms, Delivery::Skipped);
        assert!(!controller.health().await.twilio_ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_requires_registration() {
        let controller = SosController::new(
            SosConfig::default(),
            None,
            Arc::new(KeywordClassifier),
            Arc::new(MockTelephony::new()),
            Arc::new(MemoryStore::default()),
        );

        assert!(matches!(
            controller.trigger(None).await,
            Err(SosError::NotRegistered)
        ));
        assert_eq!(controller.status().await.state, SosState::Idle);
        assert!(controller.wait_idle().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_distress_text_triggers_session() {
        let h = harness(&["+1555"]);

        let first = h.controller.observe_text("help me").await.unwrap();
        assert_eq!(first.result, Classification::Distress);
        assert!(!first.session_triggered);

        let normal = h.controller.observe_text("all good").await.unwrap();
        assert_eq!(normal.result, Classification::Normal);

        h.controller.observe_text("please help").await.unwrap();
        let third = h.controller.observe_text("HELP").await.unwrap();
        assert!(third.session_triggered);
        assert!(h.controller.health().await.sos_active);

        assert!(matches!(
            h.controller.observe_text("   ").await,
            Err(SosError::MissingField("text"))
        ));

        h.controller.cancel("4321").await.unwrap();
        assert_eq!(
            h.controller.wait_idle().await.unwrap(),
            Resolution::Cancelled
        );
    }
}
