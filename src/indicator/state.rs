//! What the stand-in indicator currently shows

use std::time::{Duration, Instant};

use crate::layer::{LayerChanged, LayerTable};

/// Displayed layer plus when it was last set
#[derive(Debug)]
pub struct IndicatorState {
    current: LayerChanged,
    updated: Option<Instant>,
    stale_after: Option<Duration>,
    stale_reported: bool,
}

impl IndicatorState {
    /// Starts on the table's first entry, never updated
    pub fn new(table: &LayerTable, stale_after: Option<Duration>) -> Self {
        Self {
            current: table.entry(0).into(),
            updated: None,
            stale_after,
            stale_reported: false,
        }
    }

    pub fn set(&mut self, event: LayerChanged, now: Instant) {
        self.current = event;
        self.updated = Some(now);
        self.stale_reported = false;
    }

    pub fn current(&self) -> &LayerChanged {
        &self.current
    }

    /// Whether the shown layer has outlived the staleness window
    pub fn is_stale(&self, now: Instant) -> bool {
        match (self.updated, self.stale_after) {
            (Some(updated), Some(window)) => now.saturating_duration_since(updated) >= window,
            _ => false,
        }
    }

    /// True exactly once per update that goes stale
    pub fn take_stale(&mut self, now: Instant) -> bool {
        if self.stale_reported || !self.is_stale(now) {
            return false;
        }
        self.stale_reported = true;
        true
    }
}
