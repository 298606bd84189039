//! Diagnostic emission backend.
//!
//! Handles outputting diagnostics to stderr, the `log` crate, and an optional
//! process-wide sink.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use super::kind::{Diagnostic, DiagnosticKind};
use super::strict::{should_panic, should_panic_on_warning};
use crate::sync::mutex::Mutex;

/// Global flag to suppress stderr output (for testing).
static DIAGNOSTICS_SUPPRESSED: AtomicBool = AtomicBool::new(false);

/// Suppress stderr diagnostic output. Installed sinks still receive events.
pub fn suppress_diagnostics(suppress: bool) {
    DIAGNOSTICS_SUPPRESSED.store(suppress, Ordering::Relaxed);
}

/// Check if stderr diagnostics are suppressed.
pub fn is_suppressed() -> bool {
    DIAGNOSTICS_SUPPRESSED.load(Ordering::Relaxed)
}

/// A diagnostic sink trait for custom output.
///
/// This is the hook for routing diagnostics into an application's own
/// logging facility.
pub trait DiagnosticSink: Send + Sync {
    /// Handle a diagnostic, with formatted runtime context if any.
    fn emit(&self, diag: &Diagnostic, context: Option<&str>);
}

fn sink_slot() -> &'static Mutex<Option<Arc<dyn DiagnosticSink>>> {
    static SINK: OnceLock<Mutex<Option<Arc<dyn DiagnosticSink>>>> = OnceLock::new();
    SINK.get_or_init(|| Mutex::new(None))
}

/// Install a process-wide sink, returning the previous one.
pub fn set_sink(sink: Arc<dyn DiagnosticSink>) -> Option<Arc<dyn DiagnosticSink>> {
    sink_slot().lock().replace(sink)
}

/// Remove the process-wide sink.
pub fn clear_sink() -> Option<Arc<dyn DiagnosticSink>> {
    sink_slot().lock().take()
}

/// Emit a diagnostic with runtime context.
///
/// In debug builds, or with the `diagnostics` feature, this writes to stderr.
/// With the `log` feature it is also forwarded to the `log` crate. Under
/// strict mode an error (or warning) panics after every output has run, so
/// callers finish their own cleanup before emitting.
pub fn emit_with_context(diag: &Diagnostic, context: &str) {
    dispatch(diag, Some(context));
}

/// Emit a diagnostic and abort the process.
///
/// Used where an operation has no way to report failure to its caller.
pub fn fatal(diag: &Diagnostic, context: &str) -> ! {
    emit_always(diag, Some(context));
    std::process::abort()
}

fn dispatch(diag: &Diagnostic, context: Option<&str>) {
    #[cfg(any(debug_assertions, feature = "diagnostics"))]
    {
        if !is_suppressed() {
            emit_to_stderr(diag, context);
        }
    }

    forward(diag, context);

    // Check if we should panic (strict mode)
    let panics = match diag.kind {
        DiagnosticKind::Error => should_panic(),
        DiagnosticKind::Warning => should_panic_on_warning(),
        DiagnosticKind::Note | DiagnosticKind::Help => false,
    };
    if panics {
        panic!(
            "[stagealloc][{}] {}{}\nStrict mode enabled - diagnostics are fatal.",
            diag.code,
            diag.message,
            context.map(|c| format!(" ({})", c)).unwrap_or_default()
        );
    }
}

/// Fatal diagnostics bypass suppression and build-profile gating.
fn emit_always(diag: &Diagnostic, context: Option<&str>) {
    write_stderr(diag, context);
    forward(diag, context);
}

fn forward(diag: &Diagnostic, context: Option<&str>) {
    #[cfg(feature = "log")]
    emit_to_log(diag, context);

    let sink = sink_slot().lock().clone();
    if let Some(sink) = sink {
        sink.emit(diag, context);
    }
}

#[cfg(any(debug_assertions, feature = "diagnostics"))]
fn emit_to_stderr(diag: &Diagnostic, context: Option<&str>) {
    write_stderr(diag, context);
}

fn write_stderr(diag: &Diagnostic, context: Option<&str>) {
    let mut stderr = std::io::stderr().lock();

    let _ = writeln!(
        stderr,
        "[stagealloc][{}] {}: {}",
        diag.code,
        diag.kind.prefix(),
        diag.message
    );
    if let Some(context) = context {
        let _ = writeln!(stderr, "  context: {}", context);
    }
    if let Some(note) = diag.note {
        let _ = writeln!(stderr, "  note: {}", note);
    }
    if let Some(help) = diag.help {
        let _ = writeln!(stderr, "  help: {}", help);
    }
}

/// Emit a diagnostic using the log crate.
#[cfg(feature = "log")]
fn emit_to_log(diag: &Diagnostic, context: Option<&str>) {
    let context = context.unwrap_or("");
    match diag.kind {
        DiagnosticKind::Error => log::error!("[{}] {} {}", diag.code, diag.message, context),
        DiagnosticKind::Warning => log::warn!("[{}] {} {}", diag.code, diag.message, context),
        DiagnosticKind::Note | DiagnosticKind::Help => {
            log::info!("[{}] {} {}", diag.code, diag.message, context)
        }
    }

    if let Some(help) = diag.help {
        log::debug!("  help: {}", help);
    }
}

/// A diagnostic together with the context it was emitted with.
#[derive(Debug, Clone)]
pub struct EmittedDiagnostic {
    pub diagnostic: Diagnostic,
    pub context: Option<String>,
}

/// A simple sink that collects diagnostics.
#[derive(Default)]
pub struct CollectingSink {
    diagnostics: Mutex<Vec<EmittedDiagnostic>>,
}

impl CollectingSink {
    /// Create a new collecting sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected diagnostics.
    pub fn diagnostics(&self) -> Vec<EmittedDiagnostic> {
        self.diagnostics.lock().clone()
    }

    /// Check whether a diagnostic with `code` was collected.
    pub fn contains(&self, code: &str) -> bool {
        self.diagnostics
            .lock()
            .iter()
            .any(|d| d.diagnostic.code == code)
    }

    /// Clear collected diagnostics.
    pub fn clear(&self) {
        self.diagnostics.lock().clear();
    }

    /// Check if any errors were collected.
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .lock()
            .iter()
            .any(|d| d.diagnostic.kind == DiagnosticKind::Error)
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, diag: &Diagnostic, context: Option<&str>) {
        self.diagnostics.lock().push(EmittedDiagnostic {
            diagnostic: diag.clone(),
            context: context.map(str::to_owned),
        });
    }
}
