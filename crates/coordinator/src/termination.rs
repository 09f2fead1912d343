use nix::sys::signal::Signal;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use worker::{EXIT_ATTACH_FAILED, EXIT_OK, EXIT_RUNTIME_FAILURE};

/// Why a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Exited(i32),
    Signaled(Signal),
    Unknown,
}

impl TerminationReason {
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }
        match status.signal().map(Signal::try_from) {
            Some(Ok(signal)) => Self::Signaled(signal),
            _ => Self::Unknown,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(EXIT_OK))
    }

    /// Anything other than a clean drain. Logged, never fatal to the run.
    pub fn is_abnormal(&self) -> bool {
        !self.is_success()
    }

    pub fn description(&self) -> String {
        match self {
            Self::Exited(EXIT_OK) => "exited normally".to_string(),
            Self::Exited(EXIT_ATTACH_FAILED) => {
                format!("exited with code {EXIT_ATTACH_FAILED} (could not attach to shared resources)")
            }
            Self::Exited(EXIT_RUNTIME_FAILURE) => {
                format!("exited with code {EXIT_RUNTIME_FAILURE} (statistics region failure)")
            }
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled(signal) => format!("killed by signal {}", signal.as_str()),
            Self::Unknown => "unknown reason".to_string(),
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}
