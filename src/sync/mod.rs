//! Synchronization primitives.
//!
//! Thin wrappers over std or parking_lot mutexes, plus relaxed counters used
//! by resource statistics and the dummy runtime.

pub(crate) mod atomics;
pub(crate) mod mutex;
