//! Centralized IPC naming
//!
//! Every run derives its queue, statistics region and semaphore names from a
//! single prefix, so the coordinator and workers only need to agree on that
//! prefix. Concurrent instances must use distinct prefixes.

use crate::errors::IpcError;
use std::path::{Path, PathBuf};

/// Default prefix for all named resources of a run
pub const DEFAULT_PREFIX: &str = "/imgpool";

/// Where POSIX shared memory objects live on Linux
pub const SHM_ROOT: &str = "/dev/shm";

/// Maximum filename bytes carried by a task message or a status slot
pub const MAX_FILENAME: usize = 256;

/// Default bound on in-flight task messages (Linux default `msg_max`)
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Names of the three shared resources of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    pub prefix: String,
    pub queue: String,
    pub stats: String,
    pub semaphore: String,
}

impl ResourceNames {
    pub fn with_prefix(prefix: &str) -> Result<Self, IpcError> {
        validate_name(prefix)?;
        Ok(Self {
            prefix: prefix.to_string(),
            queue: format!("{prefix}_queue"),
            stats: format!("{prefix}_stats"),
            semaphore: format!("{prefix}_io"),
        })
    }

    /// Advisory lock file guarding this prefix against a concurrent instance.
    pub fn lock_path(&self) -> PathBuf {
        shm_path(&format!("{}.lock", self.prefix))
    }
}

impl Default for ResourceNames {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            queue: format!("{DEFAULT_PREFIX}_queue"),
            stats: format!("{DEFAULT_PREFIX}_stats"),
            semaphore: format!("{DEFAULT_PREFIX}_io"),
        }
    }
}

/// POSIX IPC names: a leading slash, no other slash, short enough for NAME_MAX
/// once suffixed.
pub fn validate_name(name: &str) -> Result<(), IpcError> {
    let valid = name.len() > 1
        && name.len() <= 200
        && name.starts_with('/')
        && !name[1..].contains('/')
        && !name.contains('\0');
    if valid {
        Ok(())
    } else {
        Err(IpcError::InvalidName(name.to_string()))
    }
}

/// Backing file of a named shared memory object.
pub fn shm_path(name: &str) -> PathBuf {
    Path::new(SHM_ROOT).join(name.trim_start_matches('/'))
}
