//! Diagnostic kinds and core types.
//!
//! Mirrors rustc's diagnostic levels for familiar UX.

/// The severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A hard error - an allocation or teardown step failed.
    Error,
    /// A warning - the operation continued in a degraded way.
    Warning,
    /// Additional context about another diagnostic.
    Note,
    /// Actionable suggestion to fix the issue.
    Help,
}

impl DiagnosticKind {
    /// Get the display prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            DiagnosticKind::Error => "error",
            DiagnosticKind::Warning => "warning",
            DiagnosticKind::Note => "note",
            DiagnosticKind::Help => "help",
        }
    }
}

/// A diagnostic message with code, message, and optional context.
///
/// Diagnostic codes follow the pattern:
/// - `SA1xx` - Shared segment lifecycle
/// - `SA2xx` - Teardown
/// - `SA3xx` - Page locking
/// - `SA9xx` - Fatal runtime failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity level.
    pub kind: DiagnosticKind,
    /// Diagnostic code (e.g., "SA101").
    pub code: &'static str,
    /// Primary message.
    pub message: &'static str,
    /// Optional additional context.
    pub note: Option<&'static str>,
    /// Optional fix suggestion.
    pub help: Option<&'static str>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub const fn error(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Error,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Create a new warning diagnostic.
    pub const fn warning(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Warning,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Add a note to this diagnostic.
    pub const fn with_note(mut self, note: &'static str) -> Self {
        self.note = Some(note);
        self
    }

    /// Add a help message to this diagnostic.
    pub const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

// =============================================================================
// Predefined diagnostics (SA1xx - Shared segment lifecycle)
// =============================================================================

/// SA101: Leader could not create the named segment.
pub const SA101: Diagnostic = Diagnostic::error(
    "SA101",
    "failed to create shared memory segment"
).with_note("shm_open with O_CREAT | O_EXCL was rejected by the OS")
 .with_help("check permissions on /dev/shm and that the segment name is valid");

/// SA102: Leader could not size the segment.
pub const SA102: Diagnostic = Diagnostic::error(
    "SA102",
    "failed to size shared memory segment"
).with_note("ftruncate on the new segment failed")
 .with_help("check available space in /dev/shm");

/// SA103: Mapping the segment failed.
pub const SA103: Diagnostic = Diagnostic::error(
    "SA103",
    "failed to map shared memory segment"
).with_help("check the process address space limits (ulimit -v)");

/// SA104: Device registration of the mapped segment failed.
pub const SA104: Diagnostic = Diagnostic::error(
    "SA104",
    "failed to register shared memory with the device runtime"
).with_note("the mapping was released and the allocation reported as failed");

/// SA105: Follower gave up waiting for the leader.
pub const SA105: Diagnostic = Diagnostic::error(
    "SA105",
    "timed out waiting for rank 0 to publish the shared segment"
).with_note("rank 0 may have crashed, be slow to start, or use a different segment name")
 .with_help("raise bootstrap_timeout in SharedConfig, or check the leader process");

/// SA106: Follower requested a different length than the leader published.
pub const SA106: Diagnostic = Diagnostic::error(
    "SA106",
    "shared segment length does not match the requested length"
).with_help("every rank must request the same number of bytes");

/// SA107: Stale segment removed before creation.
pub const SA107: Diagnostic = Diagnostic::warning(
    "SA107",
    "removed a stale shared memory segment with the same name"
).with_note("a previous run did not unlink its segment");

/// SA108: Segment name already taken.
pub const SA108: Diagnostic = Diagnostic::error(
    "SA108",
    "shared memory segment already exists"
).with_note("another group is using this name, or a previous run left it behind")
 .with_help("use a unique session name, or enable reclaim_stale in SharedConfig (only segments whose creator exited are reclaimed)");

/// SA109: Follower or reclaiming leader could not open an existing segment.
pub const SA109: Diagnostic = Diagnostic::error(
    "SA109",
    "failed to open shared memory segment"
).with_note("the segment exists but shm_open without O_CREAT was rejected")
 .with_help("check the mode passed to SharedConfig::with_mode and the user of each rank");

// =============================================================================
// Predefined diagnostics (SA2xx - Teardown)
// =============================================================================

/// SA201: Teardown barrier expired.
pub const SA201: Diagnostic = Diagnostic::warning(
    "SA201",
    "teardown barrier timed out, unlinking shared segment anyway"
).with_note("not every participant joined or released the segment in time")
 .with_help("raise teardown_timeout, or make sure every rank deallocates");

/// SA202: Unlink failed.
pub const SA202: Diagnostic = Diagnostic::warning(
    "SA202",
    "failed to unlink shared memory segment"
).with_note("the segment name may remain in /dev/shm until removed by hand");

// =============================================================================
// Predefined diagnostics (SA3xx - Page locking)
// =============================================================================

/// SA301: mlock failed under the best-effort policy.
pub const SA301: Diagnostic = Diagnostic::warning(
    "SA301",
    "could not page-lock host memory, continuing unlocked"
).with_note("RLIMIT_MEMLOCK is probably lower than the requested size")
 .with_help("raise the limit with `ulimit -l` or use LockPolicy::Required to fail instead");

// =============================================================================
// Predefined diagnostics (SA9xx - Fatal)
// =============================================================================

/// SA901: Device unregister failed during deallocation.
pub const SA901: Diagnostic = Diagnostic::error(
    "SA901",
    "device runtime failed to unregister host memory"
).with_note("deallocation cannot report errors; the process will abort");

/// SA902: Pinned host free failed during deallocation.
pub const SA902: Diagnostic = Diagnostic::error(
    "SA902",
    "device runtime failed to free pinned host memory"
).with_note("deallocation cannot report errors; the process will abort");
