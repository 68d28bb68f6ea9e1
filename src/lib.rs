//! Raksha - emergency SOS orchestration.
//!
//! # Overview
//!
//! Raksha turns a stream of transcribed speech into emergency escalation.
//! Repeated distress classifications fire a trigger; a trigger starts one SOS
//! session that calls the user, waits for them to confirm they are safe, and
//! alerts their guardians with a location link if they do not.
//!
//! # Modules
//!
//! - [`aggregation`]: Debouncing of distress classifications into a trigger
//! - [`tracker`]: State machine of the outbound confirmation call
//! - [`session`]: The single session slot and its synchronization point
//! - [`escalation`]: Confirmation window and escalation decision
//! - [`notifier`]: Guardian SMS and voice alerts
//! - [`controller`]: Session lifecycle (trigger, cancel, status)
//! - [`telephony`]: Call/SMS provider seam and Twilio client
//! - [`classifier`]: Distress model client
//! - [`storage`]: SQLite profile store and session history
//! - [`api`]: HTTP API handlers

pub mod aggregation;
pub mod api;
pub mod classifier;
pub mod config;
pub mod controller;
pub mod error;
pub mod escalation;
pub mod model;
pub mod notifier;
pub mod session;
pub mod storage;
pub mod telephony;
pub mod tracker;

#[cfg(test)]
mod testing;
