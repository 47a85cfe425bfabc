use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event bus configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-process typed event router settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Per-subscriber bounded delivery queue capacity. On overflow the
    /// oldest undelivered event for that subscriber is dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_queue_capacity_is_256() {
        assert_eq!(EventBusConfig::default().queue_capacity, 256);
    }

    #[test]
    fn deserialize_missing_field_uses_default() {
        let cfg: EventBusConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.queue_capacity, 256);
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = EventBusConfig { queue_capacity: 64 };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: EventBusConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.queue_capacity, 64);
    }
}
