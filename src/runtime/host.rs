//! Host-only runtime built on POSIX page locking.
//!
//! Page-locked allocation is an anonymous private mapping pinned with
//! `mlock`; registration pins an existing mapping the same way. Memory info
//! reports physical and available pages from `sysconf`.

use std::ptr::{self, NonNull};

use super::{DeviceRuntime, MemoryInfo, RegisterFlags, RuntimeBackend, RuntimeError};
use crate::util::page::{page_size, round_to_pages};
use crate::util::size::format_bytes;

/// What to do when `mlock` refuses a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockPolicy {
    /// A failed lock fails the allocation or registration.
    #[default]
    Required,
    /// A failed lock emits SA301 and the memory is used unlocked.
    BestEffort,
    /// Never lock.
    Disabled,
}

/// Runtime backed directly by the host OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostRuntime {
    lock_policy: LockPolicy,
}

impl HostRuntime {
    /// Create a runtime that requires page locking to succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: set the lock policy.
    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    pub fn lock_policy(&self) -> LockPolicy {
        self.lock_policy
    }

    fn lock(&self, ptr: NonNull<u8>, bytes: usize) -> Result<(), RuntimeError> {
        if self.lock_policy == LockPolicy::Disabled {
            return Ok(());
        }

        // SAFETY: the caller owns a live mapping covering ptr..ptr + bytes.
        let rc = unsafe { libc::mlock(ptr.as_ptr().cast(), bytes) };
        if rc == 0 {
            return Ok(());
        }

        let err = RuntimeError::last_os("mlock");
        match self.lock_policy {
            LockPolicy::BestEffort => {
                crate::sa_emit_ctx!(SA301, "{} at {:p}: {}", format_bytes(bytes), ptr, err);
                Ok(())
            }
            _ => Err(err),
        }
    }

    fn unlock(&self, ptr: NonNull<u8>, bytes: usize) -> Result<(), RuntimeError> {
        if self.lock_policy == LockPolicy::Disabled {
            return Ok(());
        }

        // SAFETY: munlock only changes residency of a range the caller owns.
        let rc = unsafe { libc::munlock(ptr.as_ptr().cast(), bytes) };
        if rc == 0 || self.lock_policy == LockPolicy::BestEffort {
            // Best-effort ranges may never have been locked.
            Ok(())
        } else {
            Err(RuntimeError::last_os("munlock"))
        }
    }
}

unsafe impl DeviceRuntime for HostRuntime {
    fn backend(&self) -> RuntimeBackend {
        RuntimeBackend::Host
    }

    fn host_alloc(&self, bytes: usize) -> Result<NonNull<u8>, RuntimeError> {
        let len = round_to_pages(bytes).ok_or(RuntimeError::OutOfMemory { bytes })?;

        // SAFETY: anonymous mapping with no address hint.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(RuntimeError::last_os("mmap"));
        }
        let ptr = NonNull::new(addr.cast::<u8>()).ok_or(RuntimeError::OutOfMemory { bytes })?;

        if let Err(err) = self.lock(ptr, len) {
            // SAFETY: the mapping was created above and is not shared yet.
            unsafe { libc::munmap(addr, len) };
            return Err(err);
        }

        Ok(ptr)
    }

    unsafe fn host_free(&self, ptr: NonNull<u8>, bytes: usize) -> Result<(), RuntimeError> {
        let len = round_to_pages(bytes).ok_or(RuntimeError::OutOfMemory { bytes })?;
        // munmap drops any lock along with the mapping.
        if libc::munmap(ptr.as_ptr().cast(), len) != 0 {
            return Err(RuntimeError::last_os("munmap"));
        }
        Ok(())
    }

    unsafe fn host_register(
        &self,
        ptr: NonNull<u8>,
        bytes: usize,
        _flags: RegisterFlags,
    ) -> Result<(), RuntimeError> {
        // Locks are per-process on the host, so PORTABLE is implied.
        self.lock(ptr, bytes)
    }

    unsafe fn host_unregister(&self, ptr: NonNull<u8>, bytes: usize) -> Result<(), RuntimeError> {
        self.unlock(ptr, bytes)
    }

    #[cfg(target_os = "linux")]
    fn mem_info(&self) -> Result<MemoryInfo, RuntimeError> {
        let page = page_size();
        // SAFETY: sysconf has no preconditions.
        let (total, avail) = unsafe {
            (
                libc::sysconf(libc::_SC_PHYS_PAGES),
                libc::sysconf(libc::_SC_AVPHYS_PAGES),
            )
        };
        if total < 0 || avail < 0 {
            return Err(RuntimeError::last_os("sysconf"));
        }

        let total = (total as usize).saturating_mul(page);
        let free = (avail as usize).saturating_mul(page).min(total);
        Ok(MemoryInfo::new(free, total))
    }

    #[cfg(not(target_os = "linux"))]
    fn mem_info(&self) -> Result<MemoryInfo, RuntimeError> {
        let page = page_size();
        // SAFETY: sysconf has no preconditions.
        let total = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
        if total < 0 {
            return Err(RuntimeError::last_os("sysconf"));
        }
        // No portable "available pages" query; report everything as free.
        let total = (total as usize).saturating_mul(page);
        Ok(MemoryInfo::new(total, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlocked_alloc_is_usable() {
        let runtime = HostRuntime::new().with_lock_policy(LockPolicy::Disabled);

        let ptr = runtime.host_alloc(100).unwrap();
        unsafe {
            ptr.as_ptr().write_bytes(0x5A, 100);
            assert_eq!(*ptr.as_ptr().add(99), 0x5A);
            runtime.host_free(ptr, 100).unwrap();
        }
    }

    #[test]
    fn test_best_effort_alloc_succeeds() {
        let runtime = HostRuntime::new().with_lock_policy(LockPolicy::BestEffort);

        let ptr = runtime.host_alloc(page_size()).unwrap();
        unsafe { runtime.host_free(ptr, page_size()).unwrap() };
    }

    #[test]
    fn test_register_existing_mapping() {
        let runtime = HostRuntime::new().with_lock_policy(LockPolicy::BestEffort);
        let backing = HostRuntime::new()
            .with_lock_policy(LockPolicy::Disabled)
            .host_alloc(page_size())
            .unwrap();

        unsafe {
            runtime
                .host_register(backing, page_size(), RegisterFlags::PORTABLE)
                .unwrap();
            runtime.host_unregister(backing, page_size()).unwrap();
            runtime.host_free(backing, page_size()).unwrap();
        }
    }

    #[test]
    fn test_mem_info_is_consistent() {
        let info = HostRuntime::new().mem_info().unwrap();
        assert!(info.total_bytes > 0);
        assert!(info.free_bytes <= info.total_bytes);
    }

    #[test]
    fn test_default_policy_is_required() {
        assert_eq!(HostRuntime::new().lock_policy(), LockPolicy::Required);
    }
}
