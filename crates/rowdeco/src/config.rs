//! Engine tuning knobs.

use serde::{Deserialize, Serialize};

/// Timing configuration shared by every row view of one [`RowEngine`](crate::RowEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delays between readiness polls. Once exhausted the row is reported as never ready.
    pub ready_backoff_ms: Vec<u64>,
    /// Extra delay before the first readiness poll of a row that rebinds onto a pool which
    /// still holds decorations from its predecessor.
    pub rebind_settle_ms: u64,
    /// How long released decorations survive a `destroy()` before being swept, giving a
    /// successor row the chance to reclaim them.
    pub sweep_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ready_backoff_ms: vec![0, 10, 100],
            rebind_settle_ms: 0,
            sweep_grace_ms: 0,
        }
    }
}

impl EngineConfig {
    /// Total time a row may take to become ready before it is given up on.
    pub fn ready_deadline_ms(&self) -> u64 {
        self.rebind_settle_ms + self.ready_backoff_ms.iter().sum::<u64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backoff_schedule() {
        let config = EngineConfig::default();
        assert_eq!(config.ready_backoff_ms, vec![0, 10, 100]);
        assert_eq!(config.ready_deadline_ms(), 110);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{ "sweep_grace_ms": 250 }"#).unwrap();
        assert_eq!(config.sweep_grace_ms, 250);
        assert_eq!(config.ready_backoff_ms, vec![0, 10, 100]);
        assert_eq!(config.rebind_settle_ms, 0);
    }

    #[test]
    fn empty_backoff_is_allowed() {
        let config: EngineConfig = serde_json::from_str(r#"{ "ready_backoff_ms": [] }"#).unwrap();
        assert!(config.ready_backoff_ms.is_empty());
        assert_eq!(config.ready_deadline_ms(), 0);
    }
}
