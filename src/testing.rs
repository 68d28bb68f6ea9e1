//! Test doubles for the SOS core's external capabilities.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::classifier::Classifier;
use crate::error::{ClassifierError, TelephonyError};
use crate::model::{Classification, SessionRecord, UserProfile};
use crate::storage::SessionStore;
use crate::telephony::{Telephony, VoiceScript};

/// Telephony that records every dispatch and never touches the network.
#[derive(Default)]
pub struct MockTelephony {
    calls: Mutex<Vec<(String, VoiceScript, Option<String>)>>,
    sms: Mutex<Vec<(String, String)>>,
    failing: HashSet<String>,
    next_sid: AtomicUsize,
}

impl MockTelephony {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every dispatch to `phone` fail.
    pub fn failing_for(mut self, phone: &str) -> Self {
        self.failing.insert(phone.to_string());
        self
    }

    pub fn calls(&self) -> Vec<(String, VoiceScript, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, phone: &str, script: VoiceScript) -> usize {
        self.calls()
            .iter()
            .filter(|(to, s, _)| to == phone && *s == script)
            .count()
    }

    pub fn sms(&self) -> Vec<(String, String)> {
        self.sms.lock().unwrap().clone()
    }

    fn sid(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.next_sid.fetch_add(1, Ordering::SeqCst))
    }

    fn check(&self, to: &str) -> Result<(), TelephonyError> {
        if self.failing.contains(to) {
            Err(TelephonyError::Provider {
                status: 400,
                body: "unreachable".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Telephony for MockTelephony {
    fn is_ready(&self) -> bool {
        true
    }

    async fn place_call(
        &self,
        to: &str,
        script: VoiceScript,
        status_callback: Option<&str>,
    ) -> Result<String, TelephonyError> {
        self.check(to)?;
        self.calls.lock().unwrap().push((
            to.to_string(),
            script,
            status_callback.map(str::to_string),
        ));
        Ok(self.sid("CA"))
    }

    async fn send_sms(&self, to: &str, body: &str) -> Result<String, TelephonyError> {
        self.check(to)?;
        self.sms
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(self.sid("SM"))
    }
}

/// Profile and history kept in memory.
#[derive(Default)]
pub struct MemoryStore {
    profile: Mutex<Option<UserProfile>>,
    history: Mutex<Vec<SessionRecord>>,
}

impl MemoryStore {
    pub fn with_profile(profile: UserProfile) -> Self {
        Self {
            profile: Mutex::new(Some(profile)),
            history: Mutex::default(),
        }
    }

    pub fn history(&self) -> Vec<SessionRecord> {
        self.history.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load_profile(&self) -> anyhow::Result<Option<UserProfile>> {
        Ok(self.profile.lock().unwrap().clone())
    }

    async fn record_session(&self, record: &SessionRecord) -> anyhow::Result<()> {
        self.history.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn recent_sessions(&self, limit: u32) -> anyhow::Result<Vec<SessionRecord>> {
        Ok(self
            .history()
            .into_iter()
            .rev()
            .take(limit as usize)
            .collect())
    }
}

/// Labels any text containing "help" as distress.
pub struct KeywordClassifier;

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError> {
        if text.to_lowercase().contains("help") {
            Ok(Classification::Distress)
        } else {
            Ok(Classification::Normal)
        }
    }
}

pub fn profile(guardians: &[&str]) -> UserProfile {
    UserProfile {
        phone: "+1000".to_string(),
        pin: "4321".to_string(),
        guardians: guardians.iter().map(|g| g.to_string()).collect(),
    }
}
