//! Size helper functions.

/// Convert kibibytes to bytes.
#[inline]
pub const fn kib(n: usize) -> usize {
    n * 1024
}

/// Convert mebibytes to bytes.
#[inline]
pub const fn mib(n: usize) -> usize {
    n * 1024 * 1024
}

/// Format a byte count for diagnostics, e.g. `4.00 KiB`.
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}
