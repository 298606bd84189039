//! # stagealloc
//!
//! Page-locked host memory resources for GPU staging buffers.
//!
//! ## Features
//!
//! - One [`MemoryResource`] interface, interchangeable strategies
//! - [`PinnedMemoryResource`]: page-locked host memory from the device runtime
//! - [`SharedMemoryResource`]: page-locked memory shared by a group of
//!   processes through a named POSIX segment, with a bounded bootstrap and a
//!   teardown barrier
//! - Pluggable [`DeviceRuntime`] backends, including a call-counting
//!   [`DummyRuntime`] for tests
//! - Coded diagnostics with pluggable sinks and an optional `log` bridge
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stagealloc::{MemoryResource, PinnedMemoryResource, StreamRef};
//!
//! let pinned = PinnedMemoryResource::default();
//!
//! let ptr = pinned.allocate(1 << 20, StreamRef::DEFAULT).unwrap().unwrap();
//! // ... stage data for the device ...
//! unsafe { pinned.deallocate(ptr, 1 << 20, StreamRef::DEFAULT) };
//! ```
//!
//! A zero-byte request returns `Ok(None)` without touching the OS; every
//! failure is an `Err`.

#[cfg(not(unix))]
compile_error!("stagealloc requires a unix target (POSIX shared memory and mlock)");

pub mod api;
pub mod diagnostics;
pub mod resources;
pub mod runtime;

mod sync;
mod util;

// Re-export public API at crate root for convenience
pub use api::buffer::StagingBuffer;
pub use api::config::{SegmentName, SharedConfig};
pub use api::error::{AllocError, ConfigError, QueryError};
pub use api::resource::{MemoryResource, ResourceKind, StreamRef};
pub use api::stats::ResourceStats;

pub use resources::{PinnedMemoryResource, SharedMemoryResource};

pub use runtime::{
    DeviceRuntime, DummyRuntime, HostRuntime, LockPolicy, MemoryInfo, RegisterFlags,
    RuntimeBackend, RuntimeError, RuntimeOp,
};

pub use util::size::{format_bytes, kib, mib};
