//! Stable exit codes for toolsmith CLI commands.

use crate::core::types::TerminalState;

/// The run finished (or the command succeeded).
pub const OK: i32 = 0;
/// Invalid usage, configuration or workspace state.
pub const INVALID: i32 = 1;
/// The run ended in ordinary failure.
pub const FAILED: i32 = 2;
/// The diagnostician asked for operator action.
pub const NEEDS_HUMAN: i32 = 3;

pub fn for_state(state: &TerminalState) -> i32 {
    match state {
        TerminalState::Done => OK,
        TerminalState::Failed => FAILED,
        TerminalState::NeedsHumanAction { .. } => NEEDS_HUMAN,
    }
}
