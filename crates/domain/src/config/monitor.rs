use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Proactive monitor configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Periodic multi-scanner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval between scan passes.
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Maximum alerts retained; oldest is evicted on overflow.
    #[serde(default = "default_max_alerts")]
    pub max_alerts: usize,
    /// Session mtime age (seconds) before a session is considered stale.
    #[serde(default = "default_stale_session_secs")]
    pub stale_session_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval_secs(),
            max_alerts: default_max_alerts(),
            stale_session_secs: default_stale_session_secs(),
        }
    }
}

fn default_scan_interval_secs() -> u64 {
    30 * 60
}

fn default_max_alerts() -> usize {
    50
}

fn default_stale_session_secs() -> u64 {
    24 * 60 * 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.scan_interval_secs, 1800);
        assert_eq!(cfg.max_alerts, 50);
    }

    #[test]
    fn deserialize_missing_fields_uses_defaults() {
        let cfg: MonitorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.max_alerts, 50);
    }
}
