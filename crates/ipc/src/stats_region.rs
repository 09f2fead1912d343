//! Shared statistics region.
//!
//! A `/dev/shm` file holding run counters and per-worker status slots,
//! guarded by a process-shared robust mutex and a condition variable. The
//! coordinator creates it; every worker maps the same file.
//!
//! Layout:
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ RegionHeader                             │
//! │   pthread_mutex_t  (pshared, robust)     │
//! │   pthread_cond_t   (pshared, monotonic)  │
//! │   magic: AtomicU64 (written last)        │
//! │   slot_count: u32                        │
//! │   counters: StatsCounters                │
//! ├──────────────────────────────────────────┤
//! │ StatusSlot × slot_count                  │
//! └──────────────────────────────────────────┘
//! ```

use crate::errors::IpcError;
use crate::names::{MAX_FILENAME, shm_path, validate_name};
use memmap2::MmapRaw;
use nix::errno::Errno;
use nix::sys::time::TimeSpec;
use nix::time::{ClockId, clock_gettime};
use std::fs::{self, OpenOptions};
use std::io;
use std::mem::{self, MaybeUninit};
use std::os::unix::fs::OpenOptionsExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const MAGIC: u64 = 0x494d_4750_4f4f_4c31;

/// Status slot value of a worker with no task in hand.
pub const IDLE_MARKER: &str = "idle";

/// Run counters. Every read and write happens under the region mutex.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsCounters {
    pub total: u64,
    pub processed: u64,
    pub failed: u64,
    /// Summed per-task seconds, not wall-clock.
    pub total_processing_secs: f64,
    pub workers_active: u32,
    pub workers_done: u32,
    /// Bumped on every mutation so waiters can tell that something changed.
    pub generation: u64,
}

impl StatsCounters {
    pub fn completed(&self) -> u64 {
        self.processed + self.failed
    }

    /// Mean task time over processed tasks.
    pub fn average_secs(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.total_processing_secs / self.processed as f64
        }
    }
}

#[repr(C)]
struct RegionHeader {
    mutex: libc::pthread_mutex_t,
    cond: libc::pthread_cond_t,
    magic: AtomicU64,
    slot_count: u32,
    _reserved: u32,
    counters: StatsCounters,
}

#[repr(C)]
struct StatusSlot {
    len: u32,
    bytes: [u8; MAX_FILENAME],
}

impl StatusSlot {
    fn set(&mut self, value: &str) {
        let mut end = value.len().min(MAX_FILENAME);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.bytes[..end].copy_from_slice(&value.as_bytes()[..end]);
        self.len = end as u32;
    }

    fn get(&self) -> String {
        let len = (self.len as usize).min(MAX_FILENAME);
        String::from_utf8_lossy(&self.bytes[..len]).into_owned()
    }
}

fn region_size(slot_count: usize) -> usize {
    mem::size_of::<RegionHeader>() + slot_count * mem::size_of::<StatusSlot>()
}

fn check(ret: libc::c_int) -> Result<(), IpcError> {
    if ret == 0 {
        Ok(())
    } else {
        Err(IpcError::Sys(Errno::from_raw(ret)))
    }
}

/// Point-in-time copy of the region, taken under the mutex.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub counters: StatsCounters,
    pub current_files: Vec<String>,
}

/// Handle to a mapped statistics region.
pub struct SharedStats {
    name: String,
    map: MmapRaw,
    slot_count: usize,
}

impl SharedStats {
    /// Create and initialize a fresh region for `pool_size` workers, removing
    /// a stale region of the same name first.
    pub fn create(name: &str, pool_size: usize) -> Result<Self, IpcError> {
        validate_name(name)?;
        if pool_size == 0 {
            return Err(IpcError::SlotOutOfRange {
                slot: 0,
                pool_size,
            });
        }

        let path = shm_path(name);
        match fs::remove_file(&path) {
            Ok(()) => tracing::debug!(name, "Removed stale statistics region"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)?;
        file.set_len(region_size(pool_size) as u64)?;

        let map = MmapRaw::map_raw(&file)?;
        let stats = Self {
            name: name.to_string(),
            map,
            slot_count: pool_size,
        };

        // SAFETY: the file was just created with `create_new` and sized for
        // `pool_size` slots, so no other process maps it yet. `magic` is
        // published with Release only after the header and slots are written.
        unsafe { stats.init_header(pool_size)? };
        for slot in 0..pool_size {
            unsafe { (*stats.slot_ptr(slot)).set(IDLE_MARKER) };
        }
        stats.header().magic.store(MAGIC, Ordering::Release);

        tracing::debug!(name, pool_size, "Statistics region created");
        Ok(stats)
    }

    /// Map a region created by the coordinator.
    pub fn open(name: &str) -> Result<Self, IpcError> {
        validate_name(name)?;
        let path = shm_path(name);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let len = file.metadata()?.len() as usize;
        if len < mem::size_of::<RegionHeader>() {
            return Err(IpcError::Uninitialized(name.to_string()));
        }

        let map = MmapRaw::map_raw(&file)?;
        // SAFETY: the length check above covers the header. Only the atomic
        // `magic` is read before it is known to be initialized.
        let header = unsafe { &*(map.as_ptr() as *const RegionHeader) };
        if header.magic.load(Ordering::Acquire) != MAGIC {
            return Err(IpcError::Uninitialized(name.to_string()));
        }

        let slot_count = header.slot_count as usize;
        if len < region_size(slot_count) {
            return Err(IpcError::Uninitialized(name.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            map,
            slot_count,
        })
    }

    /// # Safety
    ///
    /// No other handle may use the region until `magic` is published.
    unsafe fn init_header(&self, slot_count: usize) -> Result<(), IpcError> {
        let header = self.header_ptr();
        unsafe {
            std::ptr::write_bytes(header as *mut u8, 0, mem::size_of::<RegionHeader>());

            let mut mattr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
            check(libc::pthread_mutexattr_init(mattr.as_mut_ptr()))?;
            let result = check(libc::pthread_mutexattr_setpshared(
                mattr.as_mut_ptr(),
                libc::PTHREAD_PROCESS_SHARED,
            ))
            .and_then(|_| {
                check(libc::pthread_mutexattr_setrobust(
                    mattr.as_mut_ptr(),
                    libc::PTHREAD_MUTEX_ROBUST,
                ))
            })
            .and_then(|_| {
                check(libc::pthread_mutex_init(
                    &raw mut (*header).mutex,
                    mattr.as_ptr(),
                ))
            });
            libc::pthread_mutexattr_destroy(mattr.as_mut_ptr());
            result?;

            let mut cattr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
            check(libc::pthread_condattr_init(cattr.as_mut_ptr()))?;
            let result = check(libc::pthread_condattr_setpshared(
                cattr.as_mut_ptr(),
                libc::PTHREAD_PROCESS_SHARED,
            ))
            .and_then(|_| {
                check(libc::pthread_condattr_setclock(
                    cattr.as_mut_ptr(),
                    libc::CLOCK_MONOTONIC,
                ))
            })
            .and_then(|_| {
                check(libc::pthread_cond_init(
                    &raw mut (*header).cond,
                    cattr.as_ptr(),
                ))
            });
            libc::pthread_condattr_destroy(cattr.as_mut_ptr());
            result?;

            (*header).slot_count = slot_count as u32;
        }
        Ok(())
    }

    fn header_ptr(&self) -> *mut RegionHeader {
        self.map.as_mut_ptr() as *mut RegionHeader
    }

    fn header(&self) -> &RegionHeader {
        // SAFETY: the map is at least one header long and lives as long as `self`.
        unsafe { &*self.header_ptr() }
    }

    fn slot_ptr(&self, slot: usize) -> *mut StatusSlot {
        // SAFETY: callers pass `slot < slot_count`, and the map was checked to
        // hold `region_size(slot_count)` bytes.
        unsafe {
            self.map
                .as_mut_ptr()
                .add(mem::size_of::<RegionHeader>())
                .cast::<StatusSlot>()
                .add(slot)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Take the region mutex.
    ///
    /// If a previous holder died with the lock held, the mutex is marked
    /// consistent and the counters are used as they stand.
    pub fn lock(&self) -> Result<StatsGuard<'_>, IpcError> {
        // SAFETY: the mutex was initialized process-shared before `magic` was
        // published, and is destroyed only by `destroy`, which consumes `self`.
        let mutex = unsafe { &raw mut (*self.header_ptr()).mutex };
        let ret = unsafe { libc::pthread_mutex_lock(mutex) };
        match ret {
            0 => {}
            libc::EOWNERDEAD => self.recover(mutex)?,
            err => return Err(IpcError::Sys(Errno::from_raw(err))),
        }
        Ok(StatsGuard { stats: self })
    }

    fn recover(&self, mutex: *mut libc::pthread_mutex_t) -> Result<(), IpcError> {
        tracing::warn!(region = %self.name, "Previous lock holder died, recovering statistics mutex");
        check(unsafe { libc::pthread_mutex_consistent(mutex) })
    }

    pub fn set_total(&self, total: u64) -> Result<(), IpcError> {
        let mut guard = self.lock()?;
        let counters = guard.counters_mut();
        if counters.completed() > total {
            return Err(IpcError::InvariantViolation(
                "total below already completed tasks",
            ));
        }
        counters.total = total;
        counters.generation += 1;
        guard.broadcast()
    }

    /// Count one finished task. Called once per task, after the fan-out join.
    pub fn record_completion(&self, success: bool, elapsed: Duration) -> Result<(), IpcError> {
        let mut guard = self.lock()?;
        let counters = guard.counters_mut();
        if counters.completed() >= counters.total {
            return Err(IpcError::InvariantViolation(
                "completion would exceed total",
            ));
        }
        if success {
            counters.processed += 1;
        } else {
            counters.failed += 1;
        }
        counters.total_processing_secs += elapsed.as_secs_f64();
        counters.generation += 1;
        guard.broadcast()
    }

    pub fn mark_worker_active(&self) -> Result<(), IpcError> {
        let mut guard = self.lock()?;
        let slot_count = self.slot_count as u32;
        let counters = guard.counters_mut();
        if counters.workers_active + counters.workers_done >= slot_count {
            return Err(IpcError::InvariantViolation(
                "more active workers than slots",
            ));
        }
        counters.workers_active += 1;
        counters.generation += 1;
        guard.broadcast()
    }

    /// The last mutation a worker makes to the region.
    pub fn mark_worker_done(&self) -> Result<(), IpcError> {
        let mut guard = self.lock()?;
        let slot_count = self.slot_count as u32;
        let counters = guard.counters_mut();
        if counters.workers_done >= slot_count {
            return Err(IpcError::InvariantViolation(
                "workers_done would exceed pool size",
            ));
        }
        counters.workers_active = counters.workers_active.saturating_sub(1);
        counters.workers_done += 1;
        counters.generation += 1;
        guard.broadcast()
    }

    /// Advisory status for `slot`: a filename or `None` for idle.
    pub fn set_current_file(&self, slot: usize, file: Option<&str>) -> Result<(), IpcError> {
        if slot >= self.slot_count {
            return Err(IpcError::SlotOutOfRange {
                slot,
                pool_size: self.slot_count,
            });
        }
        let _guard = self.lock()?;
        // SAFETY: `slot` is in range and the mutex is held.
        unsafe { (*self.slot_ptr(slot)).set(file.unwrap_or(IDLE_MARKER)) };
        Ok(())
    }

    pub fn snapshot(&self) -> Result<StatsSnapshot, IpcError> {
        let guard = self.lock()?;
        Ok(guard.snapshot())
    }

    /// Block until the region changes past `last_generation` or `timeout`
    /// elapses, then return a snapshot either way.
    pub fn wait_for_change(
        &self,
        last_generation: u64,
        timeout: Duration,
    ) -> Result<StatsSnapshot, IpcError> {
        let deadline = clock_gettime(ClockId::CLOCK_MONOTONIC)? + TimeSpec::from_duration(timeout);
        let mut guard = self.lock()?;
        while guard.counters().generation == last_generation {
            if !guard.wait_until(&deadline)? {
                break;
            }
        }
        Ok(guard.snapshot())
    }

    pub fn unlink(name: &str) -> Result<(), IpcError> {
        fs::remove_file(shm_path(name))?;
        Ok(())
    }

    /// Tear down the synchronization objects and remove the backing file.
    ///
    /// Only valid once no worker holds a mapping.
    pub fn destroy(self) -> Result<(), IpcError> {
        let header = self.header_ptr();
        // SAFETY: taking `self` by value means no guard from this handle is alive.
        unsafe {
            libc::pthread_cond_destroy(&raw mut (*header).cond);
            libc::pthread_mutex_destroy(&raw mut (*header).mutex);
        }
        let name = self.name.clone();
        drop(self);
        Self::unlink(&name)
    }
}

/// Held region mutex. Unlocks on drop.
pub struct StatsGuard<'a> {
    stats: &'a SharedStats,
}

// SAFETY: a guard exists only while its handle holds the region mutex, so
// the counters and slots it reaches are not touched by any other holder.
impl StatsGuard<'_> {
    pub fn counters(&self) -> &StatsCounters {
        unsafe { &(*self.stats.header_ptr()).counters }
    }

    fn counters_mut(&mut self) -> &mut StatsCounters {
        unsafe { &mut (*self.stats.header_ptr()).counters }
    }

    pub fn current_file(&self, slot: usize) -> Option<String> {
        (slot < self.stats.slot_count).then(|| unsafe { (*self.stats.slot_ptr(slot)).get() })
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            counters: *self.counters(),
            current_files: (0..self.stats.slot_count)
                .filter_map(|slot| self.current_file(slot))
                .collect(),
        }
    }

    fn broadcast(&self) -> Result<(), IpcError> {
        check(unsafe { libc::pthread_cond_broadcast(&raw mut (*self.stats.header_ptr()).cond) })
    }

    /// Wait on the condition variable. Returns `false` once `deadline` passed.
    fn wait_until(&mut self, deadline: &TimeSpec) -> Result<bool, IpcError> {
        let header = self.stats.header_ptr();
        let ret = unsafe {
            libc::pthread_cond_timedwait(
                &raw mut (*header).cond,
                &raw mut (*header).mutex,
                deadline.as_ref(),
            )
        };
        match ret {
            0 => Ok(true),
            libc::ETIMEDOUT => Ok(false),
            libc::EOWNERDEAD => {
                self.stats.recover(unsafe { &raw mut (*header).mutex })?;
                Ok(true)
            }
            err => Err(IpcError::Sys(Errno::from_raw(err))),
        }
    }
}

impl Drop for StatsGuard<'_> {
    fn drop(&mut self) {
        let ret =
            unsafe { libc::pthread_mutex_unlock(&raw mut (*self.stats.header_ptr()).mutex) };
        if ret != 0 {
            tracing::error!(
                region = %self.stats.name,
                error = %Errno::from_raw(ret),
                "Failed to unlock statistics mutex"
            );
        }
    }
}
