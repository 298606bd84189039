//! Dummy device runtime for testing.
//!
//! Host allocations come from the global heap, registrations are only
//! recorded, and every call is counted so tests can assert exactly which
//! primitives a resource touched. Failures can be injected per primitive.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ptr::NonNull;

use super::{DeviceRuntime, MemoryInfo, RegisterFlags, RuntimeBackend, RuntimeError};
use crate::sync::atomics::EventCounter;
use crate::sync::mutex::Mutex;
use crate::util::page::page_size;

/// The runtime primitives, used for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOp {
    HostAlloc,
    HostFree,
    HostRegister,
    HostUnregister,
    MemInfo,
}

impl RuntimeOp {
    const ALL: [RuntimeOp; 5] = [
        RuntimeOp::HostAlloc,
        RuntimeOp::HostFree,
        RuntimeOp::HostRegister,
        RuntimeOp::HostUnregister,
        RuntimeOp::MemInfo,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for RuntimeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeOp::HostAlloc => "host_alloc",
            RuntimeOp::HostFree => "host_free",
            RuntimeOp::HostRegister => "host_register",
            RuntimeOp::HostUnregister => "host_unregister",
            RuntimeOp::MemInfo => "mem_info",
        };
        f.write_str(name)
    }
}

/// Heap-backed runtime that records every call.
#[derive(Debug)]
pub struct DummyRuntime {
    calls: [EventCounter; 5],
    failing: Mutex<HashSet<RuntimeOp>>,
    registered: Mutex<HashMap<usize, (usize, RegisterFlags)>>,
    memory: MemoryInfo,
}

impl DummyRuntime {
    /// Create a dummy runtime reporting 1 GiB total, 768 MiB free.
    pub fn new() -> Self {
        Self::with_memory(MemoryInfo::new(768 << 20, 1 << 30))
    }

    /// Create a dummy runtime reporting fixed memory figures.
    pub fn with_memory(memory: MemoryInfo) -> Self {
        Self {
            calls: Default::default(),
            failing: Mutex::new(HashSet::new()),
            registered: Mutex::new(HashMap::new()),
            memory,
        }
    }

    /// Make every subsequent call to `op` fail.
    pub fn fail_on(&self, op: RuntimeOp) {
        self.failing.lock().insert(op);
    }

    /// Stop injecting failures.
    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    /// Number of times `op` was invoked, failed calls included.
    pub fn calls(&self, op: RuntimeOp) -> u64 {
        self.calls[op.index()].get()
    }

    /// Total number of runtime calls of any kind.
    pub fn total_calls(&self) -> u64 {
        RuntimeOp::ALL.iter().map(|op| self.calls(*op)).sum()
    }

    /// Whether `ptr` is currently registered, and with which flags.
    pub fn registration(&self, ptr: *const u8) -> Option<(usize, RegisterFlags)> {
        self.registered.lock().get(&(ptr as usize)).copied()
    }

    /// Number of currently registered ranges.
    pub fn registered_ranges(&self) -> usize {
        self.registered.lock().len()
    }

    fn enter(&self, op: RuntimeOp) -> Result<(), RuntimeError> {
        self.calls[op.index()].increment();
        if self.failing.lock().contains(&op) {
            return Err(RuntimeError::Injected { op });
        }
        Ok(())
    }

    fn layout(bytes: usize) -> Result<Layout, RuntimeError> {
        Layout::from_size_align(bytes, page_size()).map_err(|_| RuntimeError::OutOfMemory { bytes })
    }
}

impl Default for DummyRuntime {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl DeviceRuntime for DummyRuntime {
    fn backend(&self) -> RuntimeBackend {
        RuntimeBackend::Dummy
    }

    fn host_alloc(&self, bytes: usize) -> Result<NonNull<u8>, RuntimeError> {
        self.enter(RuntimeOp::HostAlloc)?;
        let layout = Self::layout(bytes)?;
        // SAFETY: resources never request zero bytes, so the layout is non-empty.
        let ptr = unsafe { alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or(RuntimeError::OutOfMemory { bytes })
    }

    unsafe fn host_free(&self, ptr: NonNull<u8>, bytes: usize) -> Result<(), RuntimeError> {
        self.enter(RuntimeOp::HostFree)?;
        let layout = Self::layout(bytes)?;
        dealloc(ptr.as_ptr(), layout);
        Ok(())
    }

    unsafe fn host_register(
        &self,
        ptr: NonNull<u8>,
        bytes: usize,
        flags: RegisterFlags,
    ) -> Result<(), RuntimeError> {
        self.enter(RuntimeOp::HostRegister)?;
        self.registered
            .lock()
            .insert(ptr.as_ptr() as usize, (bytes, flags));
        Ok(())
    }

    unsafe fn host_unregister(&self, ptr: NonNull<u8>, bytes: usize) -> Result<(), RuntimeError> {
        self.enter(RuntimeOp::HostUnregister)?;
        match self.registered.lock().remove(&(ptr.as_ptr() as usize)) {
            Some((len, _)) if len == bytes => Ok(()),
            _ => Err(RuntimeError::NotRegistered),
        }
    }

    fn mem_info(&self) -> Result<MemoryInfo, RuntimeError> {
        self.enter(RuntimeOp::MemInfo)?;
        Ok(self.memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_alloc_free() {
        let runtime = DummyRuntime::new();

        let ptr = runtime.host_alloc(1024).unwrap();
        assert_eq!(ptr.as_ptr() as usize % page_size(), 0);
        unsafe {
            ptr.as_ptr().write_bytes(0xAB, 1024);
            runtime.host_free(ptr, 1024).unwrap();
        }

        assert_eq!(runtime.calls(RuntimeOp::HostAlloc), 1);
        assert_eq!(runtime.calls(RuntimeOp::HostFree), 1);
        assert_eq!(runtime.total_calls(), 2);
    }

    #[test]
    fn test_register_roundtrip() {
        let runtime = DummyRuntime::new();
        let mut backing = vec![0u8; 64];
        let ptr = NonNull::new(backing.as_mut_ptr()).unwrap();

        unsafe {
            runtime
                .host_register(ptr, 64, RegisterFlags::PORTABLE)
                .unwrap();
        }
        assert_eq!(
            runtime.registration(ptr.as_ptr()),
            Some((64, RegisterFlags::PORTABLE))
        );

        unsafe {
            runtime.host_unregister(ptr, 64).unwrap();
        }
        assert_eq!(runtime.registered_ranges(), 0);
    }

    #[test]
    fn test_unregister_unknown_range() {
        let runtime = DummyRuntime::new();
        let mut backing = [0u8; 8];
        let ptr = NonNull::new(backing.as_mut_ptr()).unwrap();

        let err = unsafe { runtime.host_unregister(ptr, 8) }.unwrap_err();
        assert!(matches!(err, RuntimeError::NotRegistered));
    }

    #[test]
    fn test_injected_failure() {
        let runtime = DummyRuntime::new();
        runtime.fail_on(RuntimeOp::HostAlloc);

        let err = runtime.host_alloc(16).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Injected {
                op: RuntimeOp::HostAlloc
            }
        ));
        assert_eq!(runtime.calls(RuntimeOp::HostAlloc), 1);

        runtime.clear_failures();
        let ptr = runtime.host_alloc(16).unwrap();
        unsafe { runtime.host_free(ptr, 16).unwrap() };
    }

    #[test]
    fn test_fixed_memory_info() {
        let runtime = DummyRuntime::with_memory(MemoryInfo::new(1, 2));
        assert_eq!(runtime.mem_info().unwrap().as_pair(), (1, 2));
    }
}
