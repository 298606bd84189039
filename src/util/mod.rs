//! Small helpers shared across the crate.

pub mod page;
pub mod size;
