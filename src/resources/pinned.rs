//! Page-locked host memory from the runtime's host allocator.

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::api::error::{AllocError, QueryError};
use crate::api::resource::{MemoryResource, ResourceKind, StreamRef};
use crate::api::stats::{ResourceStats, StatsRecorder};
use crate::runtime::{DeviceRuntime, MemoryInfo, RuntimeBackend};
use crate::util::size::format_bytes;

/// Memory resource that hands out pinned host memory.
///
/// All operations are synchronous; stream arguments are ignored.
pub struct PinnedMemoryResource {
    runtime: Arc<dyn DeviceRuntime>,
    stats: StatsRecorder,
}

impl PinnedMemoryResource {
    pub fn new(runtime: Arc<dyn DeviceRuntime>) -> Self {
        Self {
            runtime,
            stats: StatsRecorder::new(),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn DeviceRuntime> {
        &self.runtime
    }
}

impl Default for PinnedMemoryResource {
    /// A resource over [`HostRuntime`](crate::HostRuntime) with default locking.
    fn default() -> Self {
        Self::new(Arc::new(crate::runtime::HostRuntime::new()))
    }
}

impl MemoryResource for PinnedMemoryResource {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Pinned
    }

    fn backend(&self) -> RuntimeBackend {
        self.runtime.backend()
    }

    fn allocate(&self, bytes: usize, _stream: StreamRef) -> Result<Option<NonNull<u8>>, AllocError> {
        // don't allocate anything if the user requested zero bytes
        if bytes == 0 {
            return Ok(None);
        }

        match self.runtime.host_alloc(bytes) {
            Ok(ptr) => {
                self.stats.record_alloc(bytes);
                crate::sa_trace!("pinned alloc {} at {:p}", format_bytes(bytes), ptr);
                Ok(Some(ptr))
            }
            Err(source) => {
                self.stats.record_failure();
                Err(AllocError::runtime("host_alloc", source))
            }
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize, _stream: StreamRef) {
        if let Err(err) = self.runtime.host_free(ptr, bytes) {
            crate::sa_fatal!(SA902, "{:p} ({}): {}", ptr, format_bytes(bytes), err);
        }
        self.stats.record_dealloc(bytes);
    }

    fn supports_streams(&self) -> bool {
        false
    }

    fn supports_mem_info(&self) -> bool {
        true
    }

    fn mem_info(&self, _stream: StreamRef) -> Result<MemoryInfo, QueryError> {
        Ok(self.runtime.mem_info()?)
    }

    fn stats(&self) -> ResourceStats {
        self.stats.snapshot()
    }
}

/// Clones share the runtime but start with fresh counters.
impl Clone for PinnedMemoryResource {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.runtime))
    }
}

impl fmt::Debug for PinnedMemoryResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedMemoryResource")
            .field("backend", &self.runtime.backend())
            .finish()
    }
}
