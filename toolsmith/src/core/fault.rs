//! Typed faults raised by the engine and its collaborators.
//!
//! Faults travel inside `anyhow::Error` chains. The classifier looks for a
//! [`Fault`] anywhere in the chain, so callers are free to add context on top.

use thiserror::Error;

/// Faults the classifier knows how to route.
#[derive(Debug, Error)]
pub enum Fault {
    /// The generative backend (or a download) could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A blocking call exceeded its time budget.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A caller-supplied value was rejected (bad credential, unknown model, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The backend refused or aborted the request.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// A generated artifact exited with a nonzero status.
    #[error("script execution failed: {0}")]
    ScriptExecution(String),

    /// A structured response did not match the expected wire format.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A plan step carried a `task` tag this engine does not know.
    #[error("unknown task kind '{0}'")]
    UnknownTaskKind(String),

    /// Code for a step could not be generated or retrieved.
    #[error("Code generation or retrieval failed: {0}")]
    CodeUnavailable(String),
}

impl Fault {
    /// Stable snake_case name of the variant, used in `unknown.<kind>` fingerprints.
    pub fn kind(&self) -> &'static str {
        match self {
            Fault::Connection(_) => "connection",
            Fault::Timeout(_) => "timeout",
            Fault::InvalidArgument(_) => "invalid_argument",
            Fault::Runtime(_) => "runtime",
            Fault::ScriptExecution(_) => "script_execution",
            Fault::MalformedResponse(_) => "malformed_response",
            Fault::UnknownTaskKind(_) => "unknown_task_kind",
            Fault::CodeUnavailable(_) => "code_unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_unavailable_message_mentions_code_generation() {
        let fault = Fault::CodeUnavailable("empty response".to_string());
        assert!(fault.to_string().contains("Code generation"));
    }

    #[test]
    fn fault_survives_anyhow_context() {
        let err = anyhow::Error::from(Fault::Timeout("ask".to_string())).context("planning");
        let found = err.chain().find_map(|cause| cause.downcast_ref::<Fault>());
        assert!(matches!(found, Some(Fault::Timeout(_))));
    }
}
