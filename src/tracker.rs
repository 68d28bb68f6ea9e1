//! Finite-state tracking of the outbound confirmation call.
//!
//! ```text
//! Initiated -> Ringing -> Answered -> Completed
//!     \          \
//!      `----------`-----> Failed
//! ```
//!
//! Events move the call forward only. Backward, duplicate and post-terminal
//! events are accepted and ignored, with one exception: the provider does
//! not order its callbacks, so an `answered` arriving after `completed`
//! still marks the call answered. A completed call with a non-zero duration
//! was answered as well.

use tracing::{debug, info, warn};

use crate::model::{CallEvent, CallOutcome, CallStatus};

/// What applying an event did to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The call moved into a new state.
    Moved(CallStatus),
    /// A reordered event updated the outcome without moving the call.
    Amended,
    /// The event was stale, duplicated or arrived after a terminal state.
    Ignored,
}

/// Tracks one outbound call and the outcome the escalation timer will read.
#[derive(Debug, Clone, Default)]
pub struct CallStatusTracker {
    call_sid: Option<String>,
    status: Option<CallStatus>,
    outcome: CallOutcome,
}

impl CallStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_sid(&self) -> Option<&str> {
        self.call_sid.as_deref()
    }

    pub fn status(&self) -> Option<CallStatus> {
        self.status
    }

    pub fn outcome(&self) -> &CallOutcome {
        &self.outcome
    }

    /// Bind the provider's call identifier. Only the first binding sticks.
    pub fn bind(&mut self, call_sid: &str) -> bool {
        match &self.call_sid {
            Some(existing) => existing == call_sid,
            None => {
                self.call_sid = Some(call_sid.to_string());
                true
            }
        }
    }

    /// Whether an event carrying `call_sid` belongs to this call.
    pub fn accepts(&self, call_sid: &str) -> bool {
        self.call_sid.as_deref() == Some(call_sid)
    }

    /// Apply a provider event.
    pub fn apply(&mut self, event: CallEvent, duration_seconds: Option<u32>) -> Transition {
        let target = event.target();

        if let Some(current) = self.status {
            if current == CallStatus::Completed
                && event == CallEvent::Answered
                && !self.outcome.answered
            {
                self.outcome.answered = true;
                info!(call_sid = ?self.call_sid, "Answer reported after completion");
                return Transition::Amended;
            }
            if current.is_terminal() {
                debug!(?current, ?event, "Event after terminal call state ignored");
                return Transition::Ignored;
            }
            if !Self::is_forward(current, target) {
                debug!(?current, ?event, "Out-of-order call event ignored");
                return Transition::Ignored;
            }
        }

        match event {
            CallEvent::Initiated | CallEvent::Ringing => {}
            CallEvent::Answered => {
                self.outcome.answered = true;
                info!(call_sid = ?self.call_sid, "User answered the confirmation call");
            }
            CallEvent::Completed => {
                self.outcome.completed = true;
                self.outcome.duration_seconds = duration_seconds.unwrap_or(0);
                if self.outcome.duration_seconds > 0 {
                    self.outcome.answered = true;
                }
                info!(
                    call_sid = ?self.call_sid,
                    duration_seconds = self.outcome.duration_seconds,
                    "Confirmation call completed"
                );
            }
            CallEvent::Failed(reason) => {
                self.outcome.failure_reason = Some(reason);
                warn!(call_sid = ?self.call_sid, ?reason, "Confirmation call failed");
            }
        }

        self.status = Some(target);
        Transition::Moved(target)
    }

    fn rank(status: CallStatus) -> u8 {
        match status {
            CallStatus::Initiated => 0,
            CallStatus::Ringing => 1,
            CallStatus::Answered => 2,
            CallStatus::Completed | CallStatus::Failed => 3,
        }
    }

    fn is_forward(current: CallStatus, target: CallStatus) -> bool {
        // A call that was answered cannot fail afterwards; it can only complete.
        if current == CallStatus::Answered && target == CallStatus::Failed {
            return false;
        }
        Self::rank(target) > Self::rank(current)
    }
}
