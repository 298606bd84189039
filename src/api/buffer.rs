//! RAII wrapper for resource allocations.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use super::error::AllocError;
use super::resource::{MemoryResource, StreamRef};

/// A byte buffer that returns itself to its resource when dropped.
///
/// Remembers the length so callers cannot pass a mismatched size to
/// `deallocate`. An empty buffer owns no memory.
///
/// # Example
///
/// ```rust,no_run
/// use stagealloc::{HostRuntime, PinnedMemoryResource, StagingBuffer, StreamRef};
/// use std::sync::Arc;
///
/// let pinned = PinnedMemoryResource::new(Arc::new(HostRuntime::new()));
/// let mut buf = StagingBuffer::new(&pinned, 4096, StreamRef::DEFAULT).unwrap();
/// buf[0] = 7;
/// ```
pub struct StagingBuffer<'r> {
    ptr: Option<NonNull<u8>>,
    len: usize,
    stream: StreamRef,
    resource: &'r dyn MemoryResource,
}

impl<'r> StagingBuffer<'r> {
    /// Allocate `len` bytes from `resource`.
    pub fn new(
        resource: &'r dyn MemoryResource,
        len: usize,
        stream: StreamRef,
    ) -> Result<Self, AllocError> {
        let ptr = resource.allocate(len, stream)?;
        Ok(Self {
            ptr,
            len,
            stream,
            resource,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the raw pointer (null for an empty buffer).
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.map_or(std::ptr::null(), |p| p.as_ptr() as *const u8)
    }

    /// Get the raw mutable pointer (null for an empty buffer).
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.map_or(std::ptr::null_mut(), NonNull::as_ptr)
    }

    /// Give up ownership, returning the pointer and length.
    ///
    /// The caller becomes responsible for calling `deallocate`.
    pub fn into_raw(self) -> (Option<NonNull<u8>>, usize) {
        let parts = (self.ptr, self.len);
        std::mem::forget(self);
        parts
    }
}

impl Deref for StagingBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self.ptr {
            // SAFETY: the block is live, `len` bytes long, and owned by self.
            Some(ptr) => unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.len) },
            None => &[],
        }
    }
}

impl DerefMut for StagingBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self.ptr {
            // SAFETY: as above, and &mut self gives exclusive access in-process.
            Some(ptr) => unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.len) },
            None => &mut [],
        }
    }
}

impl Drop for StagingBuffer<'_> {
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            // SAFETY: allocated by `resource` with exactly `len` bytes.
            unsafe { self.resource.deallocate(ptr, self.len, self.stream) };
        }
    }
}

impl fmt::Debug for StagingBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingBuffer")
            .field("ptr", &self.as_ptr())
            .field("len", &self.len)
            .field("kind", &self.resource.kind())
            .finish()
    }
}

// SAFETY: the buffer exclusively owns its block; the resource is Sync.
unsafe impl Send for StagingBuffer<'_> {}
unsafe impl Sync for StagingBuffer<'_> {}
