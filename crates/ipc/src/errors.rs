use crate::semaphore::SemaphoreError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("System call failed: {0}")]
    Sys(#[from] nix::errno::Errno),

    #[error("Semaphore error: {0}")]
    Semaphore(#[from] SemaphoreError),

    #[error("Invalid resource name: {0:?}")]
    InvalidName(String),

    #[error("Task queue is full")]
    WouldBlock,

    #[error("Malformed task message: {0}")]
    MalformedMessage(String),

    #[error("Shared region {0} is missing or not initialized")]
    Uninitialized(String),

    #[error("Worker slot {slot} out of range (pool size {pool_size})")]
    SlotOutOfRange { slot: usize, pool_size: usize },

    #[error("Statistics invariant violated: {0}")]
    InvariantViolation(&'static str),

    #[error("Another instance holds {0}")]
    InstanceLocked(String),
}

impl IpcError {
    /// Errors a blocked caller may simply retry (interrupted or would-block).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IpcError::WouldBlock
                | IpcError::Sys(nix::errno::Errno::EINTR)
                | IpcError::Sys(nix::errno::Errno::EAGAIN)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_formatting() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        assert_eq!(
            IpcError::IoError(io_err).to_string(),
            "IO error: file not found",
            "IoError should display with 'IO error:' prefix"
        );

        assert_eq!(
            IpcError::SlotOutOfRange {
                slot: 4,
                pool_size: 2
            }
            .to_string(),
            "Worker slot 4 out of range (pool size 2)"
        );

        assert_eq!(
            IpcError::InvalidName("queue".to_string()).to_string(),
            "Invalid resource name: \"queue\""
        );

        assert_eq!(IpcError::WouldBlock.to_string(), "Task queue is full");
    }

    #[test]
    fn test_error_conversion_from_errno() {
        fn fails() -> Result<(), nix::errno::Errno> {
            Err(nix::errno::Errno::ENOENT)
        }

        fn uses_question_mark() -> Result<(), IpcError> {
            fails()?;
            Ok(())
        }

        match uses_question_mark() {
            Err(IpcError::Sys(errno)) => assert_eq!(errno, nix::errno::Errno::ENOENT),
            other => panic!("Expected Sys variant, got {:?}", other),
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(IpcError::WouldBlock.is_transient());
        assert!(IpcError::Sys(nix::errno::Errno::EINTR).is_transient());
        assert!(!IpcError::Sys(nix::errno::Errno::EBADF).is_transient());
        assert!(!IpcError::InvariantViolation("x").is_transient());
    }
}
