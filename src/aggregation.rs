//! Debouncing of distress classifications into a single escalation trigger.
//!
//! A trigger fires once `threshold` distress detections arrive with no gap
//! between consecutive detections longer than the debounce window. Normal
//! classifications neither reset nor advance the count: only recency matters.

use chrono::{DateTime, Duration, Utc};

use crate::model::{Classification, DistressEvent};

/// Rolling count of recent distress detections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistressWindow {
    pub count: u32,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Accumulates distress detections toward a trigger threshold.
#[derive(Debug, Clone)]
pub struct DistressAggregator {
    threshold: u32,
    debounce: Duration,
    window: DistressWindow,
}

impl DistressAggregator {
    pub fn new(threshold: u32, debounce: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            debounce,
            window: DistressWindow::default(),
        }
    }

    /// Observe a classified event, using its own timestamp.
    pub fn observe_event(&mut self, event: &DistressEvent) -> bool {
        self.observe_at(event.classification, event.timestamp)
    }

    /// Observe a classification at `now`.
    ///
    /// Returns `true` when this detection completes a burst. The count is
    /// reset after firing so the next burst starts fresh.
    pub fn observe_at(&mut self, classification: Classification, now: DateTime<Utc>) -> bool {
        if classification != Classification::Distress {
            return false;
        }

        if let Some(last_seen) = self.window.last_seen {
            if now - last_seen > self.debounce {
                self.window.count = 0;
            }
        }

        self.window.count += 1;
        self.window.last_seen = Some(now);

        tracing::debug!(count = self.window.count, "Distress detection counted");

        if self.window.count >= self.threshold {
            self.window.count = 0;
            true
        } else {
            false
        }
    }

    pub fn window(&self) -> &DistressWindow {
        &self.window
    }
}
