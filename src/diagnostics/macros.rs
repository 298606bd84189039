//! Diagnostic macros used inside the crate.

/// Emit a predefined diagnostic with formatted context.
///
/// # Example
///
/// ```rust,ignore
/// sa_emit_ctx!(SA105, "segment {} after {:?}", name, waited);
/// ```
#[macro_export]
macro_rules! sa_emit_ctx {
    ($code:ident, $($arg:tt)+) => {{
        $crate::diagnostics::emit::emit_with_context(
            &$crate::diagnostics::$code,
            &format!($($arg)+),
        );
    }};
}

/// Emit a predefined diagnostic with formatted context, then abort.
#[macro_export]
macro_rules! sa_fatal {
    ($code:ident, $($arg:tt)+) => {{
        $crate::diagnostics::emit::fatal(
            &$crate::diagnostics::$code,
            &format!($($arg)+),
        )
    }};
}

/// Debug-level trace line, forwarded to the `log` crate when enabled.
#[doc(hidden)]
#[macro_export]
macro_rules! sa_trace {
    ($($arg:tt)+) => {{
        #[cfg(feature = "log")]
        {
            log::debug!($($arg)+);
        }
        #[cfg(not(feature = "log"))]
        {
            if false {
                let _ = format!($($arg)+);
            }
        }
    }};
}
