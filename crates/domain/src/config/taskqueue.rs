use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Durable task queue configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// At-most-one-lease atomic job queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskQueueConfig {
    /// Default lease duration in milliseconds when a caller doesn't
    /// specify one.
    #[serde(default = "default_lease_ms")]
    pub default_lease_ms: u64,
    /// Interval between reaper sweeps that revert expired leases to
    /// `pending` without incrementing attempts.
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
    /// Default max attempts before a task becomes terminally `failed`.
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            default_lease_ms: default_lease_ms(),
            reap_interval_secs: default_reap_interval_secs(),
            default_max_attempts: default_max_attempts(),
        }
    }
}

fn default_lease_ms() -> u64 {
    60_000
}

fn default_reap_interval_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = TaskQueueConfig::default();
        assert_eq!(cfg.default_lease_ms, 60_000);
        assert_eq!(cfg.reap_interval_secs, 60);
        assert_eq!(cfg.default_max_attempts, 3);
    }

    #[test]
    fn deserialize_missing_fields_uses_defaults() {
        let cfg: TaskQueueConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.default_lease_ms, 60_000);
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = TaskQueueConfig {
            default_lease_ms: 1000,
            reap_interval_secs: 5,
            default_max_attempts: 1,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: TaskQueueConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.default_lease_ms, 1000);
    }
}
