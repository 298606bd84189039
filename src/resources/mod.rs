//! Memory resource strategies.
//!
//! - [`PinnedMemoryResource`]: page-locked host memory, one process
//! - [`SharedMemoryResource`]: page-locked memory shared by a process group

pub mod pinned;
pub(crate) mod segment;
pub mod shared;

pub use pinned::PinnedMemoryResource;
pub use shared::SharedMemoryResource;
