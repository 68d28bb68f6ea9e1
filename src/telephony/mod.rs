//! Outbound voice calls and SMS.
//!
//! The SOS core only needs two capabilities from a provider: place a call
//! that plays a fixed script, and send a text message. [`Telephony`] is that
//! seam; [`TwilioClient`] is the production implementation and
//! [`UnconfiguredTelephony`] stands in when credentials are missing.
//!
//! # Providers
//!
//! - [`twilio`]: Twilio Programmable Voice and Messaging REST API

pub mod twilio;

use async_trait::async_trait;

use crate::error::TelephonyError;

pub use twilio::TwilioClient;

/// Fixed announcements the core can play on a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceScript {
    /// Played to the user: stay on the line to confirm you are safe.
    Confirmation,
    /// Played to each guardian when the user did not confirm.
    GuardianAlert,
}

#[async_trait]
pub trait Telephony: Send + Sync {
    /// Whether the provider has the credentials it needs.
    fn is_ready(&self) -> bool;

    /// Start a call to `to` and return the provider's call id.
    ///
    /// When `status_callback` is given the provider posts lifecycle events
    /// (initiated, ringing, answered, completed) there.
    async fn place_call(
        &self,
        to: &str,
        script: VoiceScript,
        status_callback: Option<&str>,
    ) -> Result<String, TelephonyError>;

    /// Send a text message and return the provider's message id.
    async fn send_sms(&self, to: &str, body: &str) -> Result<String, TelephonyError>;
}

/// Provider used when no credentials are configured.
///
/// Every dispatch fails with [`TelephonyError::NotConfigured`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredTelephony;

#[async_trait]
impl Telephony for UnconfiguredTelephony {
    fn is_ready(&self) -> bool {
        false
    }

    async fn place_call(
        &self,
        _to: &str,
        _script: VoiceScript,
        _status_callback: Option<&str>,
    ) -> Result<String, TelephonyError> {
        Err(TelephonyError::NotConfigured)
    }

    async fn send_sms(&self, _to: &str, _body: &str) -> Result<String, TelephonyError> {
        Err(TelephonyError::NotConfigured)
    }
}
