//! Deterministic classification of faults into fix strategies.
//!
//! Rules are evaluated in a fixed order and the first match wins:
//!
//! | condition                                         | retry | delay | fingerprint              |
//! |---------------------------------------------------|-------|-------|--------------------------|
//! | connectivity, or transport/decryption corruption  | yes   | 5s    | `network.connection`     |
//! | timeout                                           | yes   | 10s   | `network.timeout`        |
//! | invalid argument mentioning credential or model   | no    | 0     | `config.api`             |
//! | runtime fault mentioning a blocked request        | no    | 0     | `api.blocked`            |
//! | script execution                                  | no    | 0     | `execution.script_error` |
//! | malformed structured response                     | yes   | 2s    | `llm.output.json`        |
//! | invalid argument mentioning code generation       | yes   | 2s    | `agent.code_gen`         |
//! | anything else                                     | yes   | 3s    | `unknown.<kind>`         |

use std::io;
use std::time::Duration;

use crate::core::fault::Fault;
use crate::core::types::FixStrategy;

/// Coarse class of a fault, derived from the first typed cause in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaultClass {
    Connection,
    Timeout,
    InvalidArgument,
    Runtime,
    ScriptExecution,
    MalformedResponse,
    CodeUnavailable,
    Other(&'static str),
}

/// Map a fault to the strategy the retry coordinator should follow.
pub fn classify(err: &anyhow::Error) -> FixStrategy {
    let message = format!("{err:#}");
    let lowered = message.to_lowercase();
    let class = fault_class(err);

    if class == FaultClass::Connection
        || lowered.contains("tsi_data_corrupted")
        || lowered.contains("decryption")
    {
        return strategy(
            true,
            5,
            "network.connection",
            "Connection or TLS problem. Waiting 5s before retrying.".to_string(),
        );
    }
    if class == FaultClass::Timeout {
        return strategy(
            true,
            10,
            "network.timeout",
            "Request timed out. Waiting 10s before retrying.".to_string(),
        );
    }
    if class == FaultClass::InvalidArgument
        && (lowered.contains("api key") || lowered.contains("credential") || lowered.contains("model"))
    {
        return strategy(
            false,
            0,
            "config.api",
            format!("API configuration error: {}", excerpt(&message)),
        );
    }
    if class == FaultClass::Runtime && lowered.contains("blocked") {
        return strategy(
            false,
            0,
            "api.blocked",
            format!("Request was blocked: {}", excerpt(&message)),
        );
    }
    if class == FaultClass::ScriptExecution {
        return strategy(
            false,
            0,
            "execution.script_error",
            "Script execution failed; the code needs changes, retrying will not help.".to_string(),
        );
    }
    if class == FaultClass::MalformedResponse {
        return strategy(
            true,
            2,
            "llm.output.json",
            "Model response was not valid JSON. Retrying.".to_string(),
        );
    }
    if class == FaultClass::CodeUnavailable
        || (class == FaultClass::InvalidArgument && lowered.contains("code generation"))
    {
        return strategy(
            true,
            2,
            "agent.code_gen",
            "Code generation or retrieval failed. Retrying.".to_string(),
        );
    }

    let kind = match class {
        FaultClass::Other(kind) => kind,
        FaultClass::Connection => "connection",
        FaultClass::Timeout => "timeout",
        FaultClass::InvalidArgument => "invalid_argument",
        FaultClass::Runtime => "runtime",
        FaultClass::ScriptExecution => "script_execution",
        FaultClass::MalformedResponse => "malformed_response",
        FaultClass::CodeUnavailable => "code_unavailable",
    };
    strategy(
        true,
        3,
        &format!("unknown.{kind}"),
        format!("Unexpected error: '{}'. Retrying.", excerpt(&message)),
    )
}

fn fault_class(err: &anyhow::Error) -> FaultClass {
    for cause in err.chain() {
        if let Some(fault) = cause.downcast_ref::<Fault>() {
            return match fault {
                Fault::Connection(_) => FaultClass::Connection,
                Fault::Timeout(_) => FaultClass::Timeout,
                Fault::InvalidArgument(_) => FaultClass::InvalidArgument,
                Fault::Runtime(_) => FaultClass::Runtime,
                Fault::ScriptExecution(_) => FaultClass::ScriptExecution,
                Fault::MalformedResponse(_) => FaultClass::MalformedResponse,
                Fault::CodeUnavailable(_) => FaultClass::CodeUnavailable,
                other => FaultClass::Other(other.kind()),
            };
        }
        if cause.downcast_ref::<serde_json::Error>().is_some() {
            return FaultClass::MalformedResponse;
        }
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return match io_err.kind() {
                io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected => FaultClass::Connection,
                io::ErrorKind::TimedOut => FaultClass::Timeout,
                _ => FaultClass::Other("io"),
            };
        }
    }
    FaultClass::Other("other")
}

fn strategy(should_retry: bool, delay_secs: u64, fingerprint: &str, suggestion: String) -> FixStrategy {
    FixStrategy {
        should_retry,
        retry_delay: Duration::from_secs(delay_secs),
        suggestion,
        error_fingerprint: fingerprint.to_string(),
    }
}

/// First 100 characters of a message, for suggestions.
fn excerpt(message: &str) -> String {
    let mut chars = message.chars();
    let head: String = chars.by_ref().take(100).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn classify_fault(fault: Fault) -> FixStrategy {
        classify(&anyhow::Error::from(fault))
    }

    #[test]
    fn connection_faults_retry_after_five_seconds() {
        let fix = classify_fault(Fault::Connection("dns lookup failed".to_string()));
        assert!(fix.should_retry);
        assert_eq!(fix.retry_delay, Duration::from_secs(5));
        assert_eq!(fix.error_fingerprint, "network.connection");
    }

    #[test]
    fn decryption_corruption_counts_as_connectivity() {
        let fix = classify(&anyhow!("handshake: TSI_DATA_CORRUPTED"));
        assert_eq!(fix.error_fingerprint, "network.connection");

        let fix = classify_fault(Fault::Runtime("SSL decryption failed".to_string()));
        assert_eq!(fix.error_fingerprint, "network.connection");
    }

    #[test]
    fn timeouts_retry_after_ten_seconds() {
        let fix = classify_fault(Fault::Timeout("ask".to_string()));
        assert!(fix.should_retry);
        assert_eq!(fix.retry_delay, Duration::from_secs(10));
        assert_eq!(fix.error_fingerprint, "network.timeout");
    }

    #[test]
    fn io_error_kinds_map_to_network_classes() {
        let refused = anyhow::Error::from(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(classify(&refused).error_fingerprint, "network.connection");
        let timed_out = anyhow::Error::from(io::Error::from(io::ErrorKind::TimedOut));
        assert_eq!(classify(&timed_out).error_fingerprint, "network.timeout");
        let missing = anyhow::Error::from(io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(classify(&missing).error_fingerprint, "unknown.io");
    }

    #[test]
    fn credential_and_model_errors_are_not_retried() {
        let fix = classify_fault(Fault::InvalidArgument("API Key is missing".to_string()));
        assert!(!fix.should_retry);
        assert_eq!(fix.retry_delay, Duration::ZERO);
        assert_eq!(fix.error_fingerprint, "config.api");

        let fix = classify_fault(Fault::InvalidArgument("unknown model gpt-x".to_string()));
        assert_eq!(fix.error_fingerprint, "config.api");
    }

    #[test]
    fn blocked_requests_are_not_retried() {
        let fix = classify_fault(Fault::Runtime("request blocked by policy".to_string()));
        assert!(!fix.should_retry);
        assert_eq!(fix.error_fingerprint, "api.blocked");
    }

    #[test]
    fn unblocked_runtime_faults_fall_through() {
        let fix = classify_fault(Fault::Runtime("backend exploded".to_string()));
        assert!(fix.should_retry);
        assert_eq!(fix.retry_delay, Duration::from_secs(3));
        assert_eq!(fix.error_fingerprint, "unknown.runtime");
    }

    #[test]
    fn script_failures_are_never_retried() {
        let fix = classify_fault(Fault::ScriptExecution("exit 1".to_string()));
        assert!(!fix.should_retry);
        assert_eq!(fix.error_fingerprint, "execution.script_error");
    }

    #[test]
    fn invalid_json_retries_after_two_seconds() {
        let parse_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err = anyhow::Error::from(parse_err).context("parse plan");
        let fix = classify(&err);
        assert!(fix.should_retry);
        assert_eq!(fix.retry_delay, Duration::from_secs(2));
        assert_eq!(fix.error_fingerprint, "llm.output.json");

        let fix = classify_fault(Fault::MalformedResponse("not an array".to_string()));
        assert_eq!(fix.error_fingerprint, "llm.output.json");
    }

    #[test]
    fn code_generation_failures_retry() {
        let fix = classify_fault(Fault::CodeUnavailable("empty".to_string()));
        assert!(fix.should_retry);
        assert_eq!(fix.error_fingerprint, "agent.code_gen");

        let fix = classify_fault(Fault::InvalidArgument("Code generation failed".to_string()));
        assert_eq!(fix.error_fingerprint, "agent.code_gen");
    }

    #[test]
    fn credential_rule_wins_over_code_generation_rule() {
        let fix = classify_fault(Fault::InvalidArgument(
            "Code generation failed: model not found".to_string(),
        ));
        assert_eq!(fix.error_fingerprint, "config.api");
    }

    #[test]
    fn untyped_errors_use_catch_all() {
        let fix = classify(&anyhow!("something odd"));
        assert!(fix.should_retry);
        assert_eq!(fix.retry_delay, Duration::from_secs(3));
        assert_eq!(fix.error_fingerprint, "unknown.other");

        let fix = classify_fault(Fault::UnknownTaskKind("DANCE".to_string()));
        assert_eq!(fix.error_fingerprint, "unknown.unknown_task_kind");
    }

    #[test]
    fn suggestion_excerpt_is_bounded() {
        let fix = classify(&anyhow!("x".repeat(500)));
        assert!(fix.suggestion.len() < 200);
        assert!(fix.suggestion.contains("..."));
    }
}
