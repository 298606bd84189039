//! Page-locked memory shared across a group of processes.
//!
//! Rank 0 creates a named segment, sizes it, maps it, registers it with the
//! runtime and only then publishes it through the segment's control header.
//! Every other rank polls for the published segment, maps it and registers
//! its own mapping. All ranks see the same physical memory.
//!
//! Teardown runs per rank: unregister, detach, unmap. Rank 0 additionally
//! waits for the group to detach (bounded by `teardown_timeout`) and then
//! removes the name.
//!
//! Diagnostics are emitted only after a failed step has been undone, so a
//! strict-mode panic never leaves a segment behind.

use std::fmt;
use std::io;
use std::ptr::NonNull;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use super::segment::{self, header_len, ControlHeader, Mapping};
use crate::api::config::{SegmentName, SharedConfig};
use crate::api::error::{AllocError, QueryError};
use crate::api::resource::{MemoryResource, ResourceKind, StreamRef};
use crate::api::stats::{ResourceStats, StatsRecorder};
use crate::diagnostics::{self, Diagnostic};
use crate::runtime::{DeviceRuntime, MemoryInfo, RegisterFlags, RuntimeBackend};
use crate::util::size::format_bytes;

/// Memory resource backed by a named shared segment.
///
/// # Example
///
/// ```rust,no_run
/// use stagealloc::{HostRuntime, MemoryResource, SegmentName, SharedConfig,
///                  SharedMemoryResource, StreamRef};
/// use std::sync::Arc;
///
/// let rank = 0; // from the launcher
/// let config = SharedConfig::new(SegmentName::for_session("job-42").unwrap()).with_rank(rank);
/// let shared = SharedMemoryResource::new(Arc::new(HostRuntime::new()), config);
///
/// let ptr = shared.allocate(1 << 20, StreamRef::DEFAULT).unwrap().unwrap();
/// // ... every rank sees the same 1 MiB ...
/// unsafe { shared.deallocate(ptr, 1 << 20, StreamRef::DEFAULT) };
/// ```
pub struct SharedMemoryResource {
    runtime: Arc<dyn DeviceRuntime>,
    config: SharedConfig,
    stats: StatsRecorder,
}

/// Undoes a half-finished attach unless disarmed: rank 0 unlinks its
/// unpublished segment, a follower leaves the live count. Runs on unwind too.
struct Rollback<'a> {
    resource: &'a SharedMemoryResource,
    header: &'a ControlHeader,
    armed: bool,
}

impl<'a> Rollback<'a> {
    fn new(resource: &'a SharedMemoryResource, header: &'a ControlHeader) -> Self {
        Self {
            resource,
            header,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.resource.config.is_leader() {
            // Never published, so no follower can be attached.
            let _ = segment::unlink(&self.resource.config.segment);
        } else {
            self.header.leave();
        }
    }
}

impl SharedMemoryResource {
    /// Create a resource for one rank of a group.
    pub fn new(runtime: Arc<dyn DeviceRuntime>, config: SharedConfig) -> Self {
        Self {
            runtime,
            config,
            stats: StatsRecorder::new(),
        }
    }

    pub fn rank(&self) -> u32 {
        self.config.rank
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn segment(&self) -> &SegmentName {
        &self.config.segment
    }

    pub fn runtime(&self) -> &Arc<dyn DeviceRuntime> {
        &self.runtime
    }

    fn attach(&self, bytes: usize) -> Result<NonNull<u8>, AllocError> {
        let total = header_len()
            .checked_add(bytes)
            .ok_or(AllocError::SizeOverflow { bytes })?;

        let mapping = if self.config.is_leader() {
            self.create(total)?
        } else {
            self.join(bytes, total)?
        };

        let rollback = Rollback::new(self, mapping.header());
        let payload = mapping.payload();
        // SAFETY: payload..payload + bytes lies inside the live mapping.
        let registered =
            unsafe { self.runtime.host_register(payload, bytes, RegisterFlags::PORTABLE) };
        registered.map_err(|source| AllocError::runtime("host_register", source))?;
        rollback.disarm();

        if self.config.is_leader() {
            mapping.header().publish(bytes);
        }

        crate::sa_trace!(
            "rank {} attached {} ({} mapped) of segment {}",
            self.config.rank,
            format_bytes(bytes),
            format_bytes(mapping.len()),
            self.config.segment
        );
        Ok(mapping.into_payload())
    }

    /// Rank 0: create, size and map an unpublished segment.
    fn create(&self, total: usize) -> Result<Mapping, AllocError> {
        let name = &self.config.segment;

        if self.config.reclaim_stale {
            self.reclaim()?;
        }

        let fd = segment::create_exclusive(name, self.config.mode).map_err(|source| {
            if source.kind() == io::ErrorKind::AlreadyExists {
                AllocError::SegmentExists { name: name.clone() }
            } else {
                AllocError::SegmentCreate {
                    name: name.clone(),
                    source,
                }
            }
        })?;

        let mapped = segment::resize(&fd, total)
            .map_err(|source| AllocError::SegmentResize {
                name: name.clone(),
                bytes: total,
                source,
            })
            .and_then(|()| {
                segment::map(&fd, total).map_err(|source| AllocError::SegmentMap {
                    name: name.clone(),
                    bytes: total,
                    source,
                })
            });

        match mapped {
            Ok(mapping) => {
                mapping.header().claim(std::process::id());
                Ok(mapping)
            }
            Err(err) => {
                let _ = segment::unlink(name);
                Err(err)
            }
        }
    }

    /// Rank 0 with `reclaim_stale`: remove a leftover segment whose creator
    /// has exited. A segment owned by a live process is left alone.
    fn reclaim(&self) -> Result<(), AllocError> {
        let name = &self.config.segment;
        let fd = match segment::open_existing(name) {
            Ok(fd) => fd,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(AllocError::SegmentOpen {
                    name: name.clone(),
                    source,
                })
            }
        };

        let len = segment::file_len(&fd).map_err(|source| AllocError::SegmentOpen {
            name: name.clone(),
            source,
        })?;

        // Shorter than a header: its creator died before claiming it.
        if len >= header_len() {
            let mapping = segment::map(&fd, header_len()).map_err(|source| {
                AllocError::SegmentMap {
                    name: name.clone(),
                    bytes: header_len(),
                    source,
                }
            })?;
            let header = mapping.header();
            if header.owner_alive() {
                return Err(AllocError::SegmentExists { name: name.clone() });
            }
            // Followers that mapped the old segment but have not joined yet
            // will now refuse it.
            header.retire();
        }

        if segment::unlink(name).is_ok() {
            crate::sa_emit_ctx!(SA107, "segment {}", name);
        }
        Ok(())
    }

    /// Rank > 0: wait for rank 0 to publish, then attach.
    fn join(&self, bytes: usize, total: usize) -> Result<Mapping, AllocError> {
        let started = Instant::now();
        let deadline = started + self.config.bootstrap_timeout;

        loop {
            if let Some(mapping) = self.try_join(bytes, total)? {
                return Ok(mapping);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(AllocError::BootstrapTimeout {
                    name: self.config.segment.clone(),
                    waited: now - started,
                });
            }
            thread::sleep(self.config.poll_interval.min(deadline - now));
        }
    }

    /// One bootstrap attempt. `Ok(None)` means there is no live, published
    /// segment under the name yet.
    fn try_join(&self, bytes: usize, total: usize) -> Result<Option<Mapping>, AllocError> {
        let name = &self.config.segment;
        let open_error = |source| AllocError::SegmentOpen {
            name: name.clone(),
            source,
        };

        let fd = match segment::open_existing(name) {
            Ok(fd) => fd,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(open_error(source)),
        };

        // Rank 0 sizes the segment before publishing, so a short file only
        // means it is still being set up.
        let len = segment::file_len(&fd).map_err(open_error)?;
        if len < header_len() {
            return Ok(None);
        }

        let mapping = segment::map(&fd, len).map_err(|source| AllocError::SegmentMap {
            name: name.clone(),
            bytes: len,
            source,
        })?;

        let header = mapping.header();
        if !header.is_ready() {
            return Ok(None);
        }
        // Left behind by a crashed leader; wait for a new one to replace it.
        if !header.owner_alive() {
            return Ok(None);
        }

        let found = usize::try_from(header.bytes()).unwrap_or(usize::MAX);
        if found != bytes || len != total {
            return Err(AllocError::SizeMismatch {
                name: name.clone(),
                expected: bytes,
                found,
            });
        }

        if !header.join() {
            return Ok(None);
        }
        Ok(Some(mapping))
    }

    /// Emit the diagnostic for a failed allocation.
    fn report(&self, err: &AllocError) {
        let diag: &Diagnostic = match err {
            AllocError::SegmentCreate { .. } => &diagnostics::SA101,
            AllocError::SegmentResize { .. } => &diagnostics::SA102,
            AllocError::SegmentMap { .. } => &diagnostics::SA103,
            AllocError::Runtime { .. } => &diagnostics::SA104,
            AllocError::BootstrapTimeout { .. } => &diagnostics::SA105,
            AllocError::SizeMismatch { .. } => &diagnostics::SA106,
            AllocError::SegmentExists { .. } => &diagnostics::SA108,
            AllocError::SegmentOpen { .. } => &diagnostics::SA109,
            AllocError::SizeOverflow { .. } => return,
        };
        diagnostics::emit_with_context(diag, &format!("rank {}: {}", self.config.rank, err));
    }

    /// Rank 0: wait until every participant joined and all followers left.
    ///
    /// Returns the SA201 context if the wait timed out.
    fn teardown_barrier(&self, header: &ControlHeader) -> Option<String> {
        let timeout = self.config.teardown_timeout;
        if timeout.is_zero() {
            return None;
        }

        let expected = self.config.participants.unwrap_or(1);
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            let (joined, live) = header.attendance();
            if live <= 1 && joined >= expected {
                return None;
            }

            let now = Instant::now();
            if now >= deadline {
                return Some(format!(
                    "segment {}: {} of {} joined, {} follower(s) attached after {:?}",
                    self.config.segment,
                    joined,
                    expected,
                    live.saturating_sub(1),
                    now - started
                ));
            }
            thread::sleep(self.config.poll_interval.min(deadline - now));
        }
    }
}

impl MemoryResource for SharedMemoryResource {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Shared
    }

    fn backend(&self) -> RuntimeBackend {
        self.runtime.backend()
    }

    /// Allocate shared page-locked memory of `bytes` bytes.
    ///
    /// Every rank of the group must request the same length. Rank 0 returns
    /// once the segment is published; other ranks block until they attach or
    /// `bootstrap_timeout` expires. The stream is ignored.
    fn allocate(&self, bytes: usize, _stream: StreamRef) -> Result<Option<NonNull<u8>>, AllocError> {
        if bytes == 0 {
            return Ok(None);
        }

        match self.attach(bytes) {
            Ok(ptr) => {
                self.stats.record_alloc(bytes);
                Ok(Some(ptr))
            }
            Err(err) => {
                self.stats.record_failure();
                self.report(&err);
                Err(err)
            }
        }
    }

    /// Release this rank's view of the segment.
    ///
    /// Rank 0 blocks on the teardown barrier and then unlinks the name.
    /// The block should be released by a resource with the same rank and
    /// segment as the one that allocated it.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize, _stream: StreamRef) {
        if let Err(err) = self.runtime.host_unregister(ptr, bytes) {
            crate::sa_fatal!(
                SA901,
                "segment {} rank {} at {:p} ({}): {}",
                self.config.segment,
                self.config.rank,
                ptr,
                format_bytes(bytes),
                err
            );
        }

        let mapping = Mapping::from_payload(ptr, bytes);
        let (straggled, unlinked) = if self.config.is_leader() {
            let straggled = self.teardown_barrier(mapping.header());
            mapping.header().retire();
            (straggled, segment::unlink(&self.config.segment))
        } else {
            (None, Ok(()))
        };
        mapping.header().leave();
        drop(mapping);
        self.stats.record_dealloc(bytes);

        if let Some(context) = straggled {
            crate::sa_emit_ctx!(SA201, "{}", context);
        }
        if let Err(err) = unlinked {
            crate::sa_emit_ctx!(SA202, "segment {}: {}", self.config.segment, err);
        }
        crate::sa_trace!(
            "rank {} released {} of segment {}",
            self.config.rank,
            format_bytes(bytes),
            self.config.segment
        );
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

/// Clones share the runtime and config but start with fresh counters.
impl Clone for SharedMemoryResource {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.runtime), self.config.clone())
    }
}

impl fmt::Debug for SharedMemoryResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMemoryResource")
            .field("backend", &self.runtime.backend())
            .field("segment", &self.config.segment)
            .field("rank", &self.config.rank)
            .finish()
    }
}
