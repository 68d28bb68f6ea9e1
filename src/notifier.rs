//! Guardian alert fan-out.
//!
//! Each guardian gets an SMS with a maps link and the escalation reason,
//! followed by a voice call. Guardians are notified concurrently and
//! independently; one failure never stops the others.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use crate::model::{Delivery, EscalationReason, GuardianOutcome, Location};
use crate::telephony::{Telephony, VoiceScript};

/// Stateless sender of guardian alerts.
#[derive(Clone)]
pub struct GuardianNotifier {
    telephony: Arc<dyn Telephony>,
}

impl GuardianNotifier {
    pub fn new(telephony: Arc<dyn Telephony>) -> Self {
        Self { telephony }
    }

    /// Alert every guardian. Returns one outcome per guardian, in list order.
    pub async fn notify(
        &self,
        guardians: &[String],
        location: &Location,
        reason: EscalationReason,
    ) -> Vec<GuardianOutcome> {
        if guardians.is_empty() {
            warn!(%reason, "No guardians registered, skipping alerts");
            return Vec::new();
        }

        if !self.telephony.is_ready() {
            warn!(
                %reason,
                guardians = guardians.len(),
                "Telephony provider not configured, guardian alerts skipped"
            );
            return guardians
                .iter()
                .map(|guardian| GuardianOutcome {
                    guardian: guardian.clone(),
                    sms: Delivery::Skipped,
                    call: Delivery::Skipped,
                })
                .collect();
        }

        let message = alert_message(location, reason);
        join_all(
            guardians
                .iter()
                .map(|guardian| self.notify_one(guardian, &message)),
        )
        .await
    }

    async fn notify_one(&self, guardian: &str, message: &str) -> GuardianOutcome {
        let sms = match self.telephony.send_sms(guardian, message).await {
            Ok(sid) => {
                info!(guardian, sid = %sid, "Alert SMS sent");
                Delivery::Sent { reference: sid }
            }
            Err(e) => {
                warn!(guardian, error = %e, "Failed to send alert SMS");
                Delivery::Failed {
                    error: e.to_string(),
                }
            }
        };

        let call = match self
            .telephony
            .place_call(guardian, VoiceScript::GuardianAlert, None)
            .await
        {
            Ok(sid) => {
                info!(guardian, sid = %sid, "Guardian call started");
                Delivery::Sent { reference: sid }
            }
            Err(e) => {
                warn!(guardian, error = %e, "Failed to call guardian");
                Delivery::Failed {
                    error: e.to_string(),
                }
            }
        };

        GuardianOutcome {
            guardian: guardian.to_string(),
            sms,
            call,
        }
    }
}

/// SMS body sent to guardians.
pub fn alert_message(location: &Location, reason: EscalationReason) -> String {
    format!(
        "SOS ALERT!\nUser may be in danger.\nLive Location: {}\nReason: {}",
        location.maps_link(),
        reason.description()
    )
}
