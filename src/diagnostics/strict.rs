//! Strict mode handling for diagnostics.
//!
//! Allows configuration of how diagnostics are treated:
//! - Warn: Just emit the diagnostic
//! - Panic: Emit and then panic (useful for CI)

use std::sync::atomic::{AtomicU8, Ordering};

/// Strict mode behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StrictMode {
    /// Just warn, don't panic.
    Warn = 0,
    /// Panic on errors.
    PanicOnError = 1,
    /// Panic on errors and warnings.
    PanicOnWarning = 2,
}

impl From<u8> for StrictMode {
    fn from(val: u8) -> Self {
        match val {
            1 => StrictMode::PanicOnError,
            2 => StrictMode::PanicOnWarning,
            _ => StrictMode::Warn,
        }
    }
}

impl StrictMode {
    /// Parse the `STAGEALLOC_STRICT` value.
    ///
    /// - "0" or "warn" -> Warn
    /// - "1" or "error" -> PanicOnError
    /// - "2" or "warning" -> PanicOnWarning
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "0" | "warn" | "false" => Some(StrictMode::Warn),
            "1" | "error" | "true" => Some(StrictMode::PanicOnError),
            "2" | "warning" | "all" => Some(StrictMode::PanicOnWarning),
            _ => None,
        }
    }
}

/// Marker for "not set yet": the first read falls back to the environment.
const UNSET: u8 = u8::MAX;

/// Global strict mode setting.
static STRICT_MODE: AtomicU8 = AtomicU8::new(UNSET);

/// Set the strict mode. Overrides `STAGEALLOC_STRICT`.
pub fn set_strict_mode(mode: StrictMode) {
    STRICT_MODE.store(mode as u8, Ordering::Relaxed);
}

/// Get the current strict mode.
///
/// Until [`set_strict_mode`] is called, the mode comes from the
/// `STAGEALLOC_STRICT` environment variable (default: warn).
pub fn strict_mode() -> StrictMode {
    let raw = STRICT_MODE.load(Ordering::Relaxed);
    if raw != UNSET {
        return StrictMode::from(raw);
    }

    let from_env = std::env::var("STAGEALLOC_STRICT")
        .ok()
        .as_deref()
        .and_then(StrictMode::parse)
        .unwrap_or(StrictMode::Warn);
    // A concurrent set_strict_mode wins.
    let _ = STRICT_MODE.compare_exchange(
        UNSET,
        from_env as u8,
        Ordering::Relaxed,
        Ordering::Relaxed,
    );
    StrictMode::from(STRICT_MODE.load(Ordering::Relaxed))
}

/// Check if we should panic for error diagnostics.
pub fn should_panic() -> bool {
    matches!(strict_mode(), StrictMode::PanicOnError | StrictMode::PanicOnWarning)
}

/// Check if we should panic for warnings.
pub fn should_panic_on_warning() -> bool {
    matches!(strict_mode(), StrictMode::PanicOnWarning)
}

/// RAII guard for temporarily setting strict mode.
pub struct StrictModeGuard {
    previous: StrictMode,
}

impl StrictModeGuard {
    /// Create a new guard that sets strict mode.
    pub fn new(mode: StrictMode) -> Self {
        let previous = strict_mode();
        set_strict_mode(mode);
        Self { previous }
    }
}

impl Drop for StrictModeGuard {
    fn drop(&mut self) {
        set_strict_mode(self.previous);
    }
}
