//! Public API surface: the resource interface, its errors, configuration and
//! statistics.

pub mod buffer;
pub mod config;
pub mod error;
pub mod resource;
pub mod stats;
