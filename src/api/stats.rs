//! Resource statistics.

use crate::sync::atomics::{ByteGauge, EventCounter};
use crate::util::size::format_bytes;

/// Snapshot of a resource's counters.
///
/// Counters only: the resource never records individual blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceStats {
    /// Successful non-empty allocations.
    pub allocation_count: u64,

    /// Deallocations performed.
    pub deallocation_count: u64,

    /// Allocations that returned an error.
    pub failed_allocations: u64,

    /// Bytes handed out and not yet released through this resource.
    pub bytes_in_use: usize,

    /// Peak of `bytes_in_use` (high water mark).
    pub peak_bytes: usize,
}

impl ResourceStats {
    /// Calculate live allocations.
    pub fn active_allocations(&self) -> u64 {
        self.allocation_count.saturating_sub(self.deallocation_count)
    }
}

impl std::fmt::Display for ResourceStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Resource Statistics:")?;
        writeln!(f, "  In use:          {}", format_bytes(self.bytes_in_use))?;
        writeln!(f, "  Peak:            {}", format_bytes(self.peak_bytes))?;
        writeln!(f, "  Allocations:     {}", self.allocation_count)?;
        writeln!(f, "  Deallocations:   {}", self.deallocation_count)?;
        writeln!(f, "  Failed:          {}", self.failed_allocations)?;
        Ok(())
    }
}

/// Live counters owned by a resource.
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    allocations: EventCounter,
    deallocations: EventCounter,
    failures: EventCounter,
    bytes: ByteGauge,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_alloc(&self, bytes: usize) {
        self.allocations.increment();
        self.bytes.add(bytes);
    }

    pub fn record_failure(&self) {
        self.failures.increment();
    }

    pub fn record_dealloc(&self, bytes: usize) {
        self.deallocations.increment();
        self.bytes.sub(bytes);
    }

    pub fn snapshot(&self) -> ResourceStats {
        ResourceStats {
            allocation_count: self.allocations.get(),
            deallocation_count: self.deallocations.get(),
            failed_allocations: self.failures.get(),
            bytes_in_use: self.bytes.current(),
            peak_bytes: self.bytes.peak(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_snapshot() {
        let recorder = StatsRecorder::new();
        recorder.record_alloc(4096);
        recorder.record_alloc(1024);
        recorder.record_dealloc(4096);
        recorder.record_failure();

        let stats = recorder.snapshot();
        assert_eq!(stats.allocation_count, 2);
        assert_eq!(stats.deallocation_count, 1);
        assert_eq!(stats.failed_allocations, 1);
        assert_eq!(stats.bytes_in_use, 1024);
        assert_eq!(stats.peak_bytes, 5120);
        assert_eq!(stats.active_allocations(), 1);
    }

    #[test]
    fn test_display() {
        let stats = ResourceStats {
            bytes_in_use: 4096,
            ..Default::default()
        };
        assert!(stats.to_string().contains("4.00 KiB"));
    }
}
