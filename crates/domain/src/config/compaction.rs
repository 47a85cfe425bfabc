use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Compaction collapses old conversation history into a summary so the
/// context window doesn't overflow after many turns.
///
/// Two complementary triggers are supported: the legacy turn-count
/// threshold (`max_turns`) and the token-utilization three-tier pipeline
/// (`warn`/`aggressive`/`emergency`). The turn loop checks utilization
/// first; `max_turns` remains as a coarse backstop for providers that
/// don't report usable token counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Enable automatic compaction when turn count exceeds `max_turns`.
    #[serde(default = "d_true")]
    pub auto: bool,
    /// Maximum turns (user messages) before auto-compaction triggers.
    #[serde(default = "d_80")]
    pub max_turns: usize,
    /// Number of recent turns to keep verbatim after compaction.
    #[serde(default = "d_12")]
    pub keep_last_turns: usize,
    /// Utilization above which a `context_pressure` event is emitted
    /// but the message list is left unmutated.
    #[serde(default = "d_warn")]
    pub warn_threshold: f32,
    /// Utilization above which the oldest non-system, non-recent-N
    /// messages are dropped (tool-call/tool-result pairs preserved).
    #[serde(default = "d_aggressive")]
    pub aggressive_threshold: f32,
    /// Utilization above which the middle span is summarized into a
    /// single synthetic assistant message before dropping originals.
    #[serde(default = "d_emergency")]
    pub emergency_threshold: f32,
    /// Minimum trailing user/assistant turns always preserved verbatim.
    #[serde(default = "d_12")]
    pub preserve_last_turns: usize,
    /// Default token ceiling used when a model isn't listed in
    /// `max_tokens_by_model`.
    #[serde(default = "d_max_tokens")]
    pub default_max_tokens: u32,
    /// Per-model token ceilings (key = model name).
    #[serde(default)]
    pub max_tokens_by_model: HashMap<String, u32>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            auto: true,
            max_turns: 80,
            keep_last_turns: 12,
            warn_threshold: d_warn(),
            aggressive_threshold: d_aggressive(),
            emergency_threshold: d_emergency(),
            preserve_last_turns: 12,
            default_max_tokens: d_max_tokens(),
            max_tokens_by_model: HashMap::new(),
        }
    }
}

impl CompactionConfig {
    pub fn max_tokens_for(&self, model: &str) -> u32 {
        self.max_tokens_by_model
            .get(model)
            .copied()
            .unwrap_or(self.default_max_tokens)
    }
}

fn d_warn() -> f32 {
    0.80
}
fn d_aggressive() -> f32 {
    0.85
}
fn d_emergency() -> f32 {
    0.95
}
fn d_max_tokens() -> u32 {
    128_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Controls automatic memory capture — the always-on behaviour that
/// makes the agent feel alive across sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryLifecycleConfig {
    /// Automatically capture each turn to long-term memory.
    #[serde(default = "d_true")]
    pub auto_capture: bool,
    /// Ingest a session summary to memory when compaction runs.
    #[serde(default = "d_true")]
    pub capture_on_compaction: bool,
}

impl Default for MemoryLifecycleConfig {
    fn default() -> Self {
        Self {
            auto_capture: true,
            capture_on_compaction: true,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_80() -> usize {
    80
}
fn d_12() -> usize {
    12
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_thresholds_match_spec() {
        let cfg = CompactionConfig::default();
        assert!((cfg.warn_threshold - 0.80).abs() < f32::EPSILON);
        assert!((cfg.aggressive_threshold - 0.85).abs() < f32::EPSILON);
        assert!((cfg.emergency_threshold - 0.95).abs() < f32::EPSILON);
    }

    #[test]
    fn per_model_ceiling_overrides_default() {
        let mut cfg = CompactionConfig::default();
        cfg.max_tokens_by_model.insert("tiny-model".into(), 8_000);
        assert_eq!(cfg.max_tokens_for("tiny-model"), 8_000);
        assert_eq!(cfg.max_tokens_for("unknown"), 128_000);
    }

    #[test]
    fn deserialize_missing_fields_uses_defaults() {
        let cfg: CompactionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.default_max_tokens, 128_000);
    }
}
