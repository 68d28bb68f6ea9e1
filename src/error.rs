//! Error types for the SOS core and its external adapters.
//!
//! None of these are fatal to the process. Provider failures are recovered
//! per call or per guardian and only ever show up inside a
//! [`GuardianOutcome`](crate::model::GuardianOutcome).

use thiserror::Error;

/// Errors surfaced synchronously to callers of the SOS controller.
#[derive(Error, Debug)]
pub enum SosError {
    /// No user has been registered yet.
    #[error("user not registered")]
    NotRegistered,

    /// The supplied PIN does not match the registered one.
    #[error("invalid PIN")]
    InvalidPin,

    /// Cancel was requested while no session is running.
    #[error("no active SOS session")]
    NoActiveSession,

    /// A required request field was missing or empty.
    #[error("{0} required")]
    MissingField(&'static str),

    /// The distress classifier could not produce a label.
    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    /// Profile store or session history failure.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Failures of the telephony provider (calls and SMS).
#[derive(Error, Debug)]
pub enum TelephonyError {
    /// Credentials are missing; every dispatch degrades to a no-op.
    #[error("telephony provider not configured")]
    NotConfigured,

    #[error("telephony request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },
}

/// Failures of the external distress classifier.
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("classifier returned unknown label: {0}")]
    UnknownLabel(String),
}
