//! Diagnostics and logging.
//!
//! This module provides:
//! - **Runtime diagnostics**: resource-aware error messages with codes
//! - **Sinks**: route diagnostics into an application's own logger
//! - **Strict mode**: optional panic-on-error for CI
//!
//! ## Diagnostic Codes
//!
//! | Code  | Meaning                        |
//! |-------|--------------------------------|
//! | SA1xx | Shared segment lifecycle       |
//! | SA2xx | Teardown                       |
//! | SA3xx | Page locking                   |
//! | SA9xx | Fatal runtime failures         |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stagealloc::diagnostics::{set_sink, CollectingSink};
//!
//! let sink = Arc::new(CollectingSink::new());
//! set_sink(sink.clone());
//! // ... allocate ...
//! assert!(!sink.has_errors());
//! ```

pub mod emit;
pub mod kind;
pub mod macros;
pub mod strict;

pub use emit::{
    clear_sink, emit_with_context, fatal, set_sink, suppress_diagnostics, CollectingSink,
    DiagnosticSink, EmittedDiagnostic,
};
pub use kind::{Diagnostic, DiagnosticKind};
pub use strict::{set_strict_mode, strict_mode, StrictMode, StrictModeGuard};

// Re-export predefined diagnostics
pub use kind::{
    SA101, SA102, SA103, SA104, SA105, SA106, SA107, SA108, SA109, SA201, SA202, SA301, SA901,
    SA902,
};
