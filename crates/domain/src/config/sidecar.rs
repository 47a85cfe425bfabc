use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sidecar port configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Child-process-over-stdio JSON-RPC port settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarConfig {
    /// Directories searched (in order) for the sidecar binary.
    #[serde(default)]
    pub search_path: Vec<String>,
    /// Default per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Per-method timeout overrides in milliseconds.
    #[serde(default)]
    pub method_timeouts_ms: HashMap<String, u64>,
    /// Delay before restarting a crashed port.
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    /// Maximum bytes per newline-delimited response line. Larger lines
    /// cause the request to fail with `{error: invalid}`.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            search_path: Vec::new(),
            default_timeout_ms: default_request_timeout_ms(),
            method_timeouts_ms: HashMap::new(),
            restart_delay_ms: default_restart_delay_ms(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

impl SidecarConfig {
    pub fn timeout_ms_for(&self, method: &str) -> u64 {
        self.method_timeouts_ms
            .get(method)
            .copied()
            .unwrap_or(self.default_timeout_ms)
    }
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_restart_delay_ms() -> u64 {
    5_000
}

fn default_max_line_bytes() -> usize {
    1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = SidecarConfig::default();
        assert_eq!(cfg.default_timeout_ms, 30_000);
        assert_eq!(cfg.restart_delay_ms, 5_000);
        assert_eq!(cfg.max_line_bytes, 1024 * 1024);
    }

    #[test]
    fn method_override_wins() {
        let mut cfg = SidecarConfig::default();
        cfg.method_timeouts_ms.insert("slow.method".into(), 120_000);
        assert_eq!(cfg.timeout_ms_for("slow.method"), 120_000);
        assert_eq!(cfg.timeout_ms_for("other"), 30_000);
    }

    #[test]
    fn deserialize_missing_fields_uses_defaults() {
        let cfg: SidecarConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.default_timeout_ms, 30_000);
    }
}
