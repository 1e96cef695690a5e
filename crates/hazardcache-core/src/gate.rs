//! Per-label alert cooldown.

use std::collections::HashMap;

/// Default minimum interval between two alerts for the same label.
pub const DEFAULT_COOLDOWN_MILLIS: u64 = 5 * 60 * 1000;

/// Decides whether a qualifying proximity event is emitted or suppressed.
///
/// State is keyed by label text, so distinct records sharing a label share a
/// cooldown. Entries live for the session only.
#[derive(Debug, Clone)]
pub struct AlertGate {
    cooldown_millis: u64,
    last_alert: HashMap<String, u64>,
}

impl AlertGate {
    pub fn new(cooldown_millis: u64) -> Self {
        Self {
            cooldown_millis,
            last_alert: HashMap::new(),
        }
    }

    pub fn cooldown_millis(&self) -> u64 {
        self.cooldown_millis
    }

    /// Returns true and records `now` if `label` has never alerted or its
    /// cooldown has elapsed. Otherwise returns false and leaves state alone.
    pub fn should_alert(&mut self, label: &str, now: u64) -> bool {
        match self.last_alert.get_mut(label) {
            None => {
                self.last_alert.insert(label.to_string(), now);
                true
            }
            Some(last) => {
                // A timestamp behind the stored one never lowers the entry
                if now.saturating_sub(*last) >= self.cooldown_millis && now >= *last {
                    *last = now;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn last_alert(&self, label: &str) -> Option<u64> {
        self.last_alert.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.last_alert.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_alert.is_empty()
    }

    pub fn clear(&mut self) {
        self.last_alert.clear();
    }
}

impl Default for AlertGate {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_MILLIS)
    }
}
