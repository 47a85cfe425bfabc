//! Deterministic system-prompt composer (§4.6 Context Assembler).
//!
//! Assembles the ordered, newline-delimited block list — identity,
//! bootstrap files, memory, machines, signal, tools, runtime context —
//! from pre-read inputs. Pure: never touches disk or the network itself.

pub mod builder;
pub mod injection;
pub mod report;
pub mod truncation;

pub use builder::{ContextPackBuilder, SessionMode, WorkspaceFile};
pub use report::ContextReport;
