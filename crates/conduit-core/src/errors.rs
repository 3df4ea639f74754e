use std::time::Duration;

use crate::transcript::TranscriptError;

/// Failure taxonomy for generation runs, tool discovery and terminals.
///
/// Line-level stream malformation is absorbed by the parser and never
/// reaches this type. Discovery failures are mapped to an empty tool list
/// at the client boundary; the variant exists so internal code can log it.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Previous response is still processing.")]
    LockTimeout(Duration),
    #[error("failed to launch agent: {0}")]
    LaunchFailure(String),
    #[error("agent process failed: {0}")]
    SubprocessCrash(String),
    #[error("tool discovery failed: {0}")]
    DiscoveryFailure(String),
    #[error("Maximum terminal limit exceeded")]
    TerminalCapacityExceeded { max: usize },
    #[error("terminal I/O failed: {0}")]
    TerminalIo(String),
    #[error(transparent)]
    Store(#[from] TranscriptError),
}

impl OrchestratorError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::LockTimeout(_) => "lock_timeout",
            Self::LaunchFailure(_) => "launch_failure",
            Self::SubprocessCrash(_) => "subprocess_crash",
            Self::DiscoveryFailure(_) => "discovery_failure",
            Self::TerminalCapacityExceeded { .. } => "terminal_capacity_exceeded",
            Self::TerminalIo(_) => "terminal_io",
            Self::Store(_) => "store",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_reads_as_busy() {
        let e = OrchestratorError::LockTimeout(Duration::from_secs(120));
        assert_eq!(e.to_string(), "Previous response is still processing.");
        assert_eq!(e.error_kind(), "lock_timeout");
    }

    #[test]
    fn store_errors_convert() {
        let e: OrchestratorError = TranscriptError::new("disk full").into();
        assert_eq!(e.error_kind(), "store");
        assert!(e.to_string().contains("disk full"));
    }
}
