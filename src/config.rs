//! Flow-level tunables, serde-derived so they can be loaded from a config
//! file or environment alongside the rest of an application's settings.

use serde::{Deserialize, Serialize};

/// Tunables that do not change the engine's semantics, only its pacing and
/// batching hints to extractors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Hint passed to extractor implementations for how many records to
    /// request per batch. The engine does not enforce this; it is advisory,
    /// mirroring how concrete extractors (CSV readers, DB cursors) size
    /// their own page/chunk requests.
    pub batch_size_hint: usize,

    /// How long the outer loop sleeps before retrying an extractor that
    /// reported no records but is not yet finished (an unbounded source,
    /// e.g. one tailing a live feed).
    pub idle_extractor_sleep_ms: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            batch_size_hint: 500,
            idle_extractor_sleep_ms: 250,
        }
    }
}

impl FlowConfig {
    pub(crate) fn idle_extractor_sleep(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.idle_extractor_sleep_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_pacing() {
        let cfg = FlowConfig::default();
        assert!(cfg.batch_size_hint > 0);
        assert!(cfg.idle_extractor_sleep_ms > 0);
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = FlowConfig {
            batch_size_hint: 10,
            idle_extractor_sleep_ms: 5,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: FlowConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
