use filters::CodecError;
use ipc::{IpcError, SemaphoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to attach to {resource}: {source}")]
    Attach {
        resource: &'static str,
        #[source]
        source: IpcError,
    },

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Admission semaphore error: {0}")]
    Admission(#[from] SemaphoreError),

    #[error("Decode failed: {0}")]
    Decode(#[from] CodecError),

    #[error("{failed} of {total} filters failed")]
    FanOut { failed: usize, total: usize },
}

impl WorkerError {
    pub fn attach(resource: &'static str) -> impl FnOnce(IpcError) -> Self {
        move |source| WorkerError::Attach { resource, source }
    }
}
