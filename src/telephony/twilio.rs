//! Twilio REST client for voice calls and SMS.
//!
//! Calls carry their TwiML inline, so no hosted voice URL is needed.
//!
//! # API Reference
//!
//! See: <https://www.twilio.com/docs/voice/api/call-resource> and
//! <https://www.twilio.com/docs/messaging/api/message-resource>

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::TwilioConfig;
use crate::error::TelephonyError;

use super::{Telephony, VoiceScript};

/// Base URL for the Twilio REST API.
const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Lifecycle events requested for status callbacks.
const STATUS_CALLBACK_EVENTS: [&str; 4] = ["initiated", "ringing", "answered", "completed"];

const CONFIRMATION_TWIML: &str = r#"<Response>
    <Say voice="Polly.Joanna" language="en-US">Emergency SOS activated. If you are safe, stay on the line for at least 30 seconds to confirm. Otherwise, help will be alerted.</Say>
    <Pause length="5"/>
    <Say voice="Polly.Joanna" language="en-US" loop="20">This is an automated emergency check. Stay connected if safe.</Say>
</Response>"#;

const GUARDIAN_ALERT_TWIML: &str = r#"<Response>
    <Say voice="Polly.Joanna" language="en-US">This is an emergency alert from Raksha. The user has triggered an SOS. Please check your SMS for their location immediately.</Say>
    <Pause length="2"/>
    <Say voice="Polly.Joanna" language="en-US">I repeat. Emergency alert. Check your SMS for location.</Say>
</Response>"#;

/// TwiML document for a voice script.
pub fn twiml(script: VoiceScript) -> &'static str {
    match script {
        VoiceScript::Confirmation => CONFIRMATION_TWIML,
        VoiceScript::GuardianAlert => GUARDIAN_ALERT_TWIML,
    }
}

/// The subset of a created Call/Message resource we read back.
#[derive(Debug, Deserialize)]
struct CreatedResource {
    sid: String,
}

/// Client for Twilio's Calls and Messages resources.
#[derive(Clone)]
pub struct TwilioClient {
    client: reqwest::Client,
    base_url: String,
    config: TwilioConfig,
}

impl TwilioClient {
    pub fn new(config: TwilioConfig) -> Self {
        Self::with_base_url(config, TWILIO_API_BASE)
    }

    /// Create a client against a custom base URL (for testing).
    pub fn with_base_url(config: TwilioConfig, base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            config,
        }
    }

    /// POST a form to `Accounts/{sid}/{resource}.json` and return the new sid.
    async fn create(
        &self,
        resource: &str,
        form: &[(&str, String)],
    ) -> Result<String, TelephonyError> {
        let url = format!(
            "{}/Accounts/{}/{}.json",
            self.base_url, self.config.account_sid, resource
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TelephonyError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let created = response.json::<CreatedResource>().await?;
        debug!(resource, sid = %created.sid, "Twilio resource created");
        Ok(created.sid)
    }
}

#[async_trait]
impl Telephony for TwilioClient {
    fn is_ready(&self) -> bool {
        true
    }

    async fn place_call(
        &self,
        to: &str,
        script: VoiceScript,
        status_callback: Option<&str>,
    ) -> Result<String, TelephonyError> {
        let mut form = vec![
            ("From", self.config.from_number.clone()),
            ("To", to.to_string()),
            ("Twiml", twiml(script).to_string()),
        ];

        if let Some(callback) = status_callback {
            form.push(("StatusCallback", callback.to_string()));
            form.push(("StatusCallbackMethod", "POST".to_string()));
            for event in STATUS_CALLBACK_EVENTS {
                form.push(("StatusCallbackEvent", event.to_string()));
            }
        }

        self.create("Calls", &form).await
    }

    async fn send_sms(&self, to: &str, body: &str) -> Result<String, TelephonyError> {
        let form = [
            ("From", self.config.from_number.clone()),
            ("To", to.to_string()),
            ("Body", body.to_string()),
        ];
        self.create("Messages", &form).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Form, Json, Router};
    use serde_json::{Value, json};

    use super::*;

    type Captured = Arc<Mutex<Vec<(String, Vec<(String, String)>)>>>;

    async fn fake_twilio(status: StatusCode) -> (String, Captured) {
        let captured: Captured = Arc::default();

        async fn create(
            State((captured, status)): State<(Captured, StatusCode)>,
            Path((_account, resource)): Path<(String, String)>,
            Form(form): Form<Vec<(String, String)>>,
        ) -> (StatusCode, Json<Value>) {
            captured.lock().unwrap().push((resource, form));
            (status, Json(json!({ "sid": "SID123" })))
        }

        let app = Router::new()
            .route("/Accounts/:account/:resource", post(create))
            .with_state((captured.clone(), status));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), captured)
    }

    fn config() -> TwilioConfig {
        TwilioConfig {
            account_sid: "AC1".to_string(),
            auth_token: "secret".to_string(),
            from_number: "+10000".to_string(),
        }
    }

    fn values<'a>(form: &'a [(String, String)], key: &str) -> Vec<&'a str> {
        form.iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_place_call_sends_twiml_and_callback() {
        let (base, captured) = fake_twilio(StatusCode::CREATED).await;
        let client = TwilioClient::with_base_url(config(), &base);

        let sid = client
            .place_call(
                "+1555",
                VoiceScript::Confirmation,
                Some("https://example.org/call_status?session_id=abc"),
            )
            .await
            .unwrap();
        assert_eq!(sid, "SID123");

        let captured = captured.lock().unwrap();
        let (resource, form) = &captured[0];
        assert_eq!(resource, "Calls.json");
        assert_eq!(values(form, "To"), vec!["+1555"]);
        assert!(values(form, "Twiml")[0].contains("stay on the line"));
        assert_eq!(values(form, "StatusCallbackEvent").len(), 4);
    }

    #[tokio::test]
    async fn test_send_sms_surfaces_provider_error() {
        let (base, _captured) = fake_twilio(StatusCode::BAD_REQUEST).await;
        let client = TwilioClient::with_base_url(config(), &base);

        let err = client.send_sms("+1555", "hello").await.unwrap_err();
        assert!(matches!(err, TelephonyError::Provider { status: 400, .. }));
    }

    #[test]
    fn test_guardian_script_mentions_sms() {
        assert!(twiml(VoiceScript::GuardianAlert).contains("check your SMS"));
    }
}
