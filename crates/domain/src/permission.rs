//! Permission modes gating tool execution within a turn.

use serde::{Deserialize, Serialize};

/// How a turn is allowed to act on tool calls the model proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Normal dispatch; exec-like tools still go through the approval gate.
    #[default]
    Default,
    /// Edits are auto-approved; exec-like tools still require approval.
    AcceptEdits,
    /// No tool is executed. The model's proposed tool calls are returned as
    /// a plan for the caller to review.
    Plan,
    /// All tool calls run without the approval gate, including exec-like ones.
    Bypass,
    /// Every tool call is rejected without being dispatched.
    DenyAll,
}

impl PermissionMode {
    pub fn is_plan(self) -> bool {
        matches!(self, PermissionMode::Plan)
    }

    pub fn is_deny_all(self) -> bool {
        matches!(self, PermissionMode::DenyAll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mode_is_default_variant() {
        assert_eq!(PermissionMode::default(), PermissionMode::Default);
    }

    #[test]
    fn plan_and_deny_all_predicates() {
        assert!(PermissionMode::Plan.is_plan());
        assert!(!PermissionMode::Default.is_plan());
        assert!(PermissionMode::DenyAll.is_deny_all());
        assert!(!PermissionMode::Bypass.is_deny_all());
    }
}
