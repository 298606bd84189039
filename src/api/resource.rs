//! The memory resource interface.
//!
//! This module defines the interface WITHOUT committing to an allocation
//! technique, so pools and arenas can depend on the trait, not on a strategy.

use std::fmt;
use std::ptr::NonNull;

use super::error::{AllocError, QueryError};
use super::stats::ResourceStats;
use crate::runtime::{MemoryInfo, RuntimeBackend};

/// Opaque execution-context (stream) token.
///
/// Resources accept it everywhere for interface compatibility with
/// stream-ordered allocators, but every operation is synchronous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamRef(usize);

impl StreamRef {
    /// The default (null) stream.
    pub const DEFAULT: Self = Self(0);

    /// Wrap a raw stream handle.
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }

    pub const fn is_default(self) -> bool {
        self.0 == 0
    }
}

/// Allocation strategy tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Page-locked host memory from the runtime's host allocator.
    Pinned,
    /// Named OS shared segment, registered with the runtime.
    Shared,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Pinned => write!(f, "pinned"),
            ResourceKind::Shared => write!(f, "shared"),
        }
    }
}

/// Core memory resource trait - every strategy implements this.
///
/// This trait is object-safe for use with `&dyn MemoryResource`.
pub trait MemoryResource: Send + Sync {
    /// Which strategy this is.
    fn kind(&self) -> ResourceKind;

    /// Which runtime backend serves this resource.
    fn backend(&self) -> RuntimeBackend;

    /// Allocate `bytes` bytes.
    ///
    /// Returns `Ok(None)` for `bytes == 0` without touching the OS or the
    /// runtime. Any failure is an `Err`, never `Ok(None)`.
    fn allocate(&self, bytes: usize, stream: StreamRef) -> Result<Option<NonNull<u8>>, AllocError>;

    /// Release a block returned by [`allocate`](Self::allocate).
    ///
    /// Runtime failures here abort the process.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on a resource that
    /// [`is_equal`](Self::is_equal) to this one, `bytes` must be the length
    /// passed to that call, and the block must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize, stream: StreamRef);

    /// Whether `other` can release this resource's allocations and vice versa.
    ///
    /// Equality is by strategy and backend, never by instance. Two resources
    /// of the same [`ResourceKind`] are *not* equal when their runtimes report
    /// different [`RuntimeBackend`]s: a block from a `DummyRuntime` cannot be
    /// freed through a `HostRuntime`. Pools that compare resources to decide
    /// whether blocks may migrate between them must account for this.
    /// Shared resources compare equal regardless of rank.
    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        self.kind() == other.kind() && self.backend() == other.backend()
    }

    /// Whether non-default streams are honored.
    fn supports_streams(&self) -> bool;

    /// Whether [`mem_info`](Self::mem_info) is available.
    fn supports_mem_info(&self) -> bool;

    /// Free and total memory as reported by the runtime.
    fn mem_info(&self, stream: StreamRef) -> Result<MemoryInfo, QueryError>;

    /// Snapshot of this instance's counters.
    fn stats(&self) -> ResourceStats;
}

impl PartialEq for dyn MemoryResource + '_ {
    fn eq(&self, other: &Self) -> bool {
        self.is_equal(other)
    }
}

impl fmt::Debug for dyn MemoryResource + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryResource")
            .field("kind", &self.kind())
            .field("backend", &self.backend())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_ref() {
        assert!(StreamRef::DEFAULT.is_default());
        assert!(StreamRef::default().is_default());
        let stream = StreamRef::from_raw(0xdead);
        assert!(!stream.is_default());
        assert_eq!(stream.as_raw(), 0xdead);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ResourceKind::Pinned.to_string(), "pinned");
        assert_eq!(ResourceKind::Shared.to_string(), "shared");
    }
}
