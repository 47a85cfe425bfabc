use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Signal classifier configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Heuristic + optional LLM-refinement classifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Messages whose final weight falls below this threshold are
    /// filtered before reaching the LLM.
    #[serde(default = "default_noise_threshold")]
    pub noise_threshold: f32,
    /// Enable the optional LLM-refinement pass over the heuristic result.
    #[serde(default)]
    pub llm_refine: bool,
    /// Minimum input length (chars) before LLM refinement is attempted.
    #[serde(default = "default_llm_refine_min_chars")]
    pub llm_refine_min_chars: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            noise_threshold: default_noise_threshold(),
            llm_refine: false,
            llm_refine_min_chars: default_llm_refine_min_chars(),
        }
    }
}

fn default_noise_threshold() -> f32 {
    0.6
}

fn default_llm_refine_min_chars() -> usize {
    40
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = ClassifierConfig::default();
        assert!((cfg.noise_threshold - 0.6).abs() < f32::EPSILON);
        assert!(!cfg.llm_refine);
        assert_eq!(cfg.llm_refine_min_chars, 40);
    }

    #[test]
    fn deserialize_missing_fields_uses_defaults() {
        let cfg: ClassifierConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.llm_refine_min_chars, 40);
    }
}
