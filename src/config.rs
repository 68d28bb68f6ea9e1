//! Runtime configuration, loaded from the environment at boot.

use std::env;
use std::time::Duration;

use crate::model::UserProfile;

/// Default port if not specified via environment variable.
const DEFAULT_PORT: u16 = 5000;

/// Default database path if not specified via environment variable.
const DEFAULT_DB_PATH: &str = "sqlite:raksha.db?mode=rwc";

/// Default endpoint of the distress model server.
const DEFAULT_CLASSIFIER_URL: &str = "http://127.0.0.1:5001/check_distress";

/// Timing and threshold parameters of the SOS state machine.
#[derive(Debug, Clone)]
pub struct SosConfig {
    /// Distress detections needed to fire a trigger.
    pub distress_threshold: u32,
    /// Maximum gap between consecutive detections before the count restarts.
    pub debounce_window: chrono::Duration,
    /// How long the user has to confirm safety on the call.
    pub confirmation_window: Duration,
    /// Polling interval of the escalation timer.
    pub tick: Duration,
    /// Minimum call duration (seconds) that counts as confirmation.
    pub min_confirm_duration_secs: u32,
}

impl Default for SosConfig {
    fn default() -> Self {
        Self {
            distress_threshold: 3,
            debounce_window: chrono::Duration::seconds(20),
            confirmation_window: Duration::from_secs(25),
            tick: Duration::from_secs(1),
            min_confirm_duration_secs: 30,
        }
    }
}

/// Twilio credentials. All three must be present for the provider to be ready.
#[derive(Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

impl std::fmt::Debug for TwilioConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwilioConfig")
            .field("account_sid", &mask(&self.account_sid))
            .field("auth_token", &"<redacted>")
            .field("from_number", &self.from_number)
            .finish()
    }
}

/// Only the last four characters of a credential are ever shown.
fn mask(value: &str) -> String {
    let tail = match value.char_indices().rev().nth(3) {
        Some((start, _)) => &value[start..],
        None => value,
    };
    format!("...{}", tail)
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    /// Public base URL the provider can reach for status callbacks.
    pub public_url: Option<String>,
    pub classifier_url: String,
    pub twilio: Option<TwilioConfig>,
    /// Optional profile written to storage at boot.
    pub seed_profile: Option<UserProfile>,
    pub sos: SosConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let port: u16 = env::var("RAKSHA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let database_url =
            env::var("RAKSHA_DATABASE_URL").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

        let classifier_url =
            env::var("RAKSHA_CLASSIFIER_URL").unwrap_or_else(|_| DEFAULT_CLASSIFIER_URL.to_string());

        let public_url = non_empty("RAKSHA_PUBLIC_URL").map(|u| u.trim_end_matches('/').to_string());

        let twilio = match (
            non_empty("TWILIO_SID"),
            non_empty("TWILIO_AUTH"),
            non_empty("TWILIO_PHONE"),
        ) {
            (Some(account_sid), Some(auth_token), Some(from_number)) => Some(TwilioConfig {
                account_sid,
                auth_token,
                from_number,
            }),
            _ => None,
        };

        let seed_profile = match (non_empty("RAKSHA_USER_PHONE"), non_empty("RAKSHA_USER_PIN")) {
            (Some(phone), Some(pin)) => Some(UserProfile {
                phone,
                pin,
                guardians: parse_guardians(&env::var("RAKSHA_GUARDIANS").unwrap_or_default()),
            }),
            _ => None,
        };

        Self {
            port,
            database_url,
            public_url,
            classifier_url,
            twilio,
            seed_profile,
            sos: SosConfig::default(),
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Split a comma-separated guardian list, dropping blanks and duplicates.
pub fn parse_guardians(raw: &str) -> Vec<String> {
    let mut guardians: Vec<String> = Vec::new();
    for phone in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if !guardians.iter().any(|g| g == phone) {
            guardians.push(phone.to_string());
        }
    }
    guardians
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_guardians_dedups_in_order() {
        assert_eq!(
            parse_guardians(" +1555, +1777,,+1555 "),
            vec!["+1555".to_string(), "+1777".to_string()]
        );
        assert!(parse_guardians("").is_empty());
    }

    #[test]
    fn test_mask_keeps_last_four() {
        assert_eq!(mask("AC1234567890"), "...7890");
        assert_eq!(mask("ab"), "...ab");
        assert_eq!(mask("AC12345678é9"), "...78é9");
    }

    #[test]
    fn test_default_timings() {
        let config = SosConfig::default();
        assert_eq!(config.distress_threshold, 3);
        assert_eq!(config.debounce_window, chrono::Duration::seconds(20));
        assert_eq!(config.confirmation_window, Duration::from_secs(25));
        assert_eq!(config.min_confirm_duration_secs, 30);
    }
}
