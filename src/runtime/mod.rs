//! Device runtime seam.
//!
//! The memory resources never talk to a driver directly. They go through a
//! [`DeviceRuntime`], which provides the five primitives a GPU runtime exposes
//! for host memory: page-locked allocation and release, registration of an
//! existing range, and a free/total memory query.
//!
//! ## Backends
//! - [`HostRuntime`]: page locking through `mlock`, memory info from `sysconf`
//! - [`DummyRuntime`]: heap-backed, call-counting test double (always available)

use std::fmt;
use std::io;
use std::ptr::NonNull;

use thiserror::Error;

pub mod dummy;
pub mod host;

pub use dummy::{DummyRuntime, RuntimeOp};
pub use host::{HostRuntime, LockPolicy};

/// Errors reported by a device runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// An OS call failed.
    #[error("{op} failed: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// The request cannot be satisfied.
    #[error("out of host memory ({bytes} bytes requested)")]
    OutOfMemory { bytes: usize },

    /// The range was never registered.
    #[error("host memory range is not registered")]
    NotRegistered,

    /// A failure injected by a test double.
    #[error("injected failure in {op}")]
    Injected { op: RuntimeOp },
}

impl RuntimeError {
    /// Capture `errno` for a failed OS call.
    pub(crate) fn last_os(op: &'static str) -> Self {
        RuntimeError::Os {
            op,
            source: io::Error::last_os_error(),
        }
    }
}

/// Identifies which runtime implementation backs a resource.
///
/// Two resources are only interchangeable if they share a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeBackend {
    Host,
    Dummy,
}

impl fmt::Display for RuntimeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeBackend::Host => write!(f, "host"),
            RuntimeBackend::Dummy => write!(f, "dummy"),
        }
    }
}

/// Flags for [`DeviceRuntime::host_register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterFlags {
    pub bits: u32,
}

impl RegisterFlags {
    pub const DEFAULT: Self = Self { bits: 0x00 };
    /// Registered memory is pinned for every device context, not just the
    /// current one.
    pub const PORTABLE: Self = Self { bits: 0x01 };
    pub const MAPPED: Self = Self { bits: 0x02 };

    pub const fn contains(self, other: Self) -> bool {
        self.bits & other.bits == other.bits
    }
}

impl std::ops::BitOr for RegisterFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self { bits: self.bits | rhs.bits }
    }
}

/// Free and total memory as reported by a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryInfo {
    pub free_bytes: usize,
    pub total_bytes: usize,
}

impl MemoryInfo {
    pub const fn new(free_bytes: usize, total_bytes: usize) -> Self {
        Self {
            free_bytes,
            total_bytes,
        }
    }

    /// `(free_bytes, total_bytes)`
    pub const fn as_pair(self) -> (usize, usize) {
        (self.free_bytes, self.total_bytes)
    }
}

impl From<MemoryInfo> for (usize, usize) {
    fn from(info: MemoryInfo) -> Self {
        info.as_pair()
    }
}

/// Host-memory primitives of a device runtime.
///
/// # Safety
///
/// Implementors must ensure that:
/// - `host_alloc` returns memory valid for reads and writes of `bytes` bytes
///   until it is passed to `host_free`
/// - `host_register` leaves the range's contents and mapping untouched
/// - `mem_info` reports `free_bytes <= total_bytes`
pub unsafe trait DeviceRuntime: Send + Sync {
    /// Which backend this is.
    fn backend(&self) -> RuntimeBackend;

    /// Allocate `bytes` (non-zero) of page-locked host memory.
    fn host_alloc(&self, bytes: usize) -> Result<NonNull<u8>, RuntimeError>;

    /// Release memory returned by `host_alloc`.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `host_alloc` on this backend with the same `bytes`,
    /// and must not be used afterwards.
    unsafe fn host_free(&self, ptr: NonNull<u8>, bytes: usize) -> Result<(), RuntimeError>;

    /// Page-lock an existing mapped range so the device can use it directly.
    ///
    /// # Safety
    ///
    /// `ptr..ptr + bytes` must be a live mapping owned by the caller.
    unsafe fn host_register(
        &self,
        ptr: NonNull<u8>,
        bytes: usize,
        flags: RegisterFlags,
    ) -> Result<(), RuntimeError>;

    /// Undo `host_register`.
    ///
    /// # Safety
    ///
    /// The range must have been registered with the same `ptr` and `bytes`.
    unsafe fn host_unregister(&self, ptr: NonNull<u8>, bytes: usize) -> Result<(), RuntimeError>;

    /// Aggregate free and total memory.
    fn mem_info(&self) -> Result<MemoryInfo, RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_flags() {
        let flags = RegisterFlags::PORTABLE | RegisterFlags::MAPPED;
        assert!(flags.contains(RegisterFlags::PORTABLE));
        assert!(flags.contains(RegisterFlags::MAPPED));
        assert!(!RegisterFlags::DEFAULT.contains(RegisterFlags::PORTABLE));
    }

    #[test]
    fn test_memory_info_pair() {
        let info = MemoryInfo::new(10, 20);
        let (free, total): (usize, usize) = info.into();
        assert_eq!((free, total), (10, 20));
    }

    #[test]
    fn test_runtime_error_display() {
        let err = RuntimeError::OutOfMemory { bytes: 64 };
        assert_eq!(err.to_string(), "out of host memory (64 bytes requested)");

        let err = RuntimeError::Injected {
            op: RuntimeOp::HostRegister,
        };
        assert_eq!(err.to_string(), "injected failure in host_register");
    }
}
