//! Markdown skill file discovery and execution metadata.
//!
//! A skill is a directory with a `SKILL.md` manifest plus optional
//! `references/`, `scripts/`, and `assets/` resources. This crate scans,
//! validates, and renders the skill index injected into the system prompt.

pub mod aliases;
pub mod installer;
pub mod loader;
pub mod manifest;
pub mod registry;
pub mod types;

pub use registry::SkillsRegistry;
pub use types::{RiskTier, SkillEntry};
