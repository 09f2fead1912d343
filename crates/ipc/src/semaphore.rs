use nix::errno::Errno;
use std::ffi::CString;
use std::os::raw::c_int;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SemaphoreError {
    #[error("Semaphore call failed: {0}")]
    Os(#[from] Errno),
    #[error("Invalid semaphore name")]
    InvalidName,
}

/// Named POSIX counting semaphore.
///
/// Bounds how many decodes run at once across the whole worker pool.
pub struct Semaphore {
    sem: *mut libc::sem_t,
    name: String,
}

impl Semaphore {
    /// Create a fresh semaphore, unlinking any stale one left by an earlier run.
    pub fn create(name: &str, initial_value: u32) -> Result<Self, SemaphoreError> {
        let c_name = CString::new(name).map_err(|_| SemaphoreError::InvalidName)?;

        match Self::unlink(name) {
            Ok(()) => tracing::debug!(name, "Removed stale semaphore"),
            Err(SemaphoreError::Os(Errno::ENOENT)) => {}
            Err(e) => return Err(e),
        }

        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o600 as libc::c_uint,
                initial_value as libc::c_uint,
            )
        };

        if sem == libc::SEM_FAILED {
            return Err(SemaphoreError::Os(Errno::last()));
        }

        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    pub fn open(name: &str) -> Result<Self, SemaphoreError> {
        let c_name = CString::new(name).map_err(|_| SemaphoreError::InvalidName)?;

        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };

        if sem == libc::SEM_FAILED {
            return Err(SemaphoreError::Os(Errno::last()));
        }

        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until a permit is available.
    pub fn acquire(&self) -> Result<(), SemaphoreError> {
        loop {
            let ret = unsafe { libc::sem_wait(self.sem) };
            if ret == 0 {
                return Ok(());
            }
            match Errno::last() {
                Errno::EINTR => continue,
                errno => return Err(SemaphoreError::Os(errno)),
            }
        }
    }

    pub fn try_acquire(&self) -> Result<bool, SemaphoreError> {
        let ret = unsafe { libc::sem_trywait(self.sem) };
        if ret == 0 {
            Ok(true)
        } else {
            let errno = Errno::last();
            if errno == Errno::EAGAIN {
                Ok(false)
            } else {
                Err(SemaphoreError::Os(errno))
            }
        }
    }

    pub fn release(&self) -> Result<(), SemaphoreError> {
        let ret = unsafe { libc::sem_post(self.sem) };
        if ret != 0 {
            return Err(SemaphoreError::Os(Errno::last()));
        }
        Ok(())
    }

    /// Acquire a permit that is released when the returned guard drops,
    /// whatever path the holder leaves by.
    pub fn permit(&self) -> Result<Permit<'_>, SemaphoreError> {
        self.acquire()?;
        Ok(Permit { semaphore: self })
    }

    pub fn value(&self) -> Result<i32, SemaphoreError> {
        let mut val: c_int = 0;
        let ret = unsafe { libc::sem_getvalue(self.sem, &mut val) };
        if ret != 0 {
            return Err(SemaphoreError::Os(Errno::last()));
        }
        Ok(val)
    }

    pub fn unlink(name: &str) -> Result<(), SemaphoreError> {
        let c_name = CString::new(name).map_err(|_| SemaphoreError::InvalidName)?;
        let ret = unsafe { libc::sem_unlink(c_name.as_ptr()) };
        if ret != 0 {
            return Err(SemaphoreError::Os(Errno::last()));
        }
        Ok(())
    }

    /// Close this handle and remove the name.
    pub fn destroy(self) -> Result<(), SemaphoreError> {
        let name = self.name.clone();
        drop(self);
        Self::unlink(&name)
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

/// One admission permit, returned to the semaphore on drop.
#[must_use = "dropping the permit releases it immediately"]
pub struct Permit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.semaphore.release() {
            tracing::error!(semaphore = %self.semaphore.name, error = %e, "Failed to release permit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn unique_name(tag: &str) -> String {
        format!(
            "/imgpool_test_sem_{}_{}_{}",
            tag,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn test_create_open_and_count() {
        let name = unique_name("count");
        let created = Semaphore::create(&name, 2).unwrap();
        let opened = Semaphore::open(&name).unwrap();

        assert_eq!(created.value().unwrap(), 2);
        opened.acquire().unwrap();
        assert_eq!(created.value().unwrap(), 1, "Both handles see one counter");
        opened.release().unwrap();
        assert_eq!(created.value().unwrap(), 2);

        drop(opened);
        created.destroy().unwrap();
        assert!(Semaphore::open(&name).is_err(), "Name should be gone");
    }

    #[test]
    fn test_create_replaces_stale_semaphore() {
        let name = unique_name("stale");
        let stale = Semaphore::create(&name, 0).unwrap();
        drop(stale);

        let fresh = Semaphore::create(&name, 3).unwrap();
        assert_eq!(fresh.value().unwrap(), 3, "Stale count must not leak in");
        fresh.destroy().unwrap();
    }

    #[test]
    fn test_try_acquire_exhausts() {
        let name = unique_name("try");
        let sem = Semaphore::create(&name, 1).unwrap();

        assert!(sem.try_acquire().unwrap());
        assert!(!sem.try_acquire().unwrap(), "No permits left");
        sem.release().unwrap();
        assert!(sem.try_acquire().unwrap());
        sem.release().unwrap();

        sem.destroy().unwrap();
    }

    #[test]
    fn test_permit_released_on_error_path() {
        let name = unique_name("permit");
        let sem = Semaphore::create(&name, 2).unwrap();

        fn decode_under_permit(sem: &Semaphore) -> Result<(), String> {
            let _permit = sem.permit().map_err(|e| e.to_string())?;
            Err("corrupt image".to_string())
        }

        for _ in 0..5 {
            assert!(decode_under_permit(&sem).is_err());
            assert_eq!(sem.value().unwrap(), 2, "Failed decode must not leak a permit");
        }

        {
            let _a = sem.permit().unwrap();
            let _b = sem.permit().unwrap();
            assert_eq!(sem.value().unwrap(), 0);
        }
        assert_eq!(sem.value().unwrap(), 2, "Count never exceeds its initial value");

        sem.destroy().unwrap();
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let name = unique_name("block");
        let sem = Arc::new(Semaphore::create(&name, 1).unwrap());
        let holder = sem.permit().unwrap();

        let acquired = Arc::new(AtomicUsize::new(0));
        let waiter = {
            let sem = Arc::clone(&sem);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _permit = sem.permit().unwrap();
                acquired.store(1, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert_eq!(acquired.load(Ordering::SeqCst), 0, "Waiter must block");

        drop(holder);
        waiter.join().unwrap();
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
        assert_eq!(sem.value().unwrap(), 1);

        Semaphore::unlink(&name).unwrap();
    }
}
