// Common types for the cftunnel quick-tunnel supervisor

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Result of a start request in the shape UI frontends consume
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuickResult {
    /// Public URL, empty while it has not been assigned yet
    pub url: String,
    /// Error message, empty on success
    pub err: String,
}

impl QuickResult {
    /// Build from the outcome of `Supervisor::start`
    pub fn from_start(result: &Result<Option<String>>) -> Self {
        match result {
            Ok(url) => Self {
                url: url.clone().unwrap_or_default(),
                err: String::new(),
            },
            Err(e) => Self {
                url: String::new(),
                err: e.to_string(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.err.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Snapshot of the supervisor as seen by a caller
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuickStatus {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Process known only through the pid record, not spawned by this instance
    pub adopted: bool,
}

/// Outcome of a stop request. Stopping never fails from the caller's view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StopOutcome {
    /// No in-memory process and no pid record
    NothingToStop,
    /// A start was still spawning its process; it is abandoned and the
    /// process, if any, is killed by the start itself
    StartCancelled,
    /// Termination was requested; `confirmed` is false when the process was
    /// still visible after the stop timeout
    Stopped { pid: u32, confirmed: bool },
}

impl StopOutcome {
    pub fn was_running(&self) -> bool {
        matches!(self, StopOutcome::Stopped { .. })
    }
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOutcome::NothingToStop => write!(f, "Nothing to stop"),
            StopOutcome::StartCancelled => write!(f, "Tunnel start cancelled"),
            StopOutcome::Stopped {
                pid,
                confirmed: true,
            } => write!(f, "Tunnel stopped (pid {})", pid),
            StopOutcome::Stopped {
                pid,
                confirmed: false,
            } => write!(f, "Tunnel stop requested (pid {} may still be exiting)", pid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_quick_result_from_resolved_start() {
        let result = QuickResult::from_start(&Ok(Some(
            "https://foo-bar-baz.trycloudflare.com".to_string(),
        )));
        assert!(result.is_ok());
        assert_eq!(result.url, "https://foo-bar-baz.trycloudflare.com");
    }

    #[test]
    fn test_quick_result_from_pending_start() {
        let result = QuickResult::from_start(&Ok(None));
        assert!(result.is_ok());
        assert!(result.url.is_empty());
    }

    #[test]
    fn test_quick_result_from_error() {
        let result = QuickResult::from_start(&Err(Error::AlreadyRunning));
        assert!(!result.is_ok());
        assert!(result.err.contains("already running"));
        assert_eq!(
            result.to_json().unwrap(),
            format!("{{\"url\":\"\",\"err\":\"{}\"}}", result.err)
        );
    }

    #[test]
    fn test_stop_outcome_messages() {
        assert_eq!(StopOutcome::NothingToStop.to_string(), "Nothing to stop");
        assert_eq!(
            StopOutcome::Stopped {
                pid: 42,
                confirmed: true
            }
            .to_string(),
            "Tunnel stopped (pid 42)"
        );
        assert!(!StopOutcome::NothingToStop.was_running());
    }

    #[test]
    fn test_cancelled_start_outcome() {
        let outcome = StopOutcome::StartCancelled;
        assert_eq!(outcome.to_string(), "Tunnel start cancelled");
        assert!(!outcome.was_running());
        assert_eq!(
            serde_json::to_string(&outcome).unwrap(),
            "{\"status\":\"start_cancelled\"}"
        );
    }

    #[test]
    fn test_status_serialization_skips_empty_fields() {
        let status = QuickStatus::default();
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, "{\"running\":false,\"adopted\":false}");
    }
}
