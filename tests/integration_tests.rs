//! Integration tests for stagealloc.

use stagealloc::diagnostics::{self, CollectingSink};
use stagealloc::{
    AllocError, DummyRuntime, HostRuntime, LockPolicy, MemoryInfo, MemoryResource,
    PinnedMemoryResource, ResourceKind, RuntimeOp, SegmentName, SharedConfig,
    SharedMemoryResource, StagingBuffer, StreamRef,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

fn host() -> Arc<HostRuntime> {
    Arc::new(HostRuntime::new().with_lock_policy(LockPolicy::BestEffort))
}

/// One sink for the whole test binary. Tests only look for codes that
/// they alone produce, so sharing it is safe.
fn sink() -> &'static Arc<CollectingSink> {
    static SINK: OnceLock<Arc<CollectingSink>> = OnceLock::new();
    SINK.get_or_init(|| {
        let sink = Arc::new(CollectingSink::new());
        diagnostics::set_sink(sink.clone());
        sink
    })
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn unique_name(tag: &str) -> SegmentName {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    SegmentName::new(format!("/stagealloc-it-{}-{}-{}", tag, std::process::id(), n)).unwrap()
}

#[test]
fn test_zero_bytes_never_touches_runtime() {
    let runtime = Arc::new(DummyRuntime::new());
    let resources: Vec<Box<dyn MemoryResource>> = vec![
        Box::new(PinnedMemoryResource::new(runtime.clone())),
        Box::new(SharedMemoryResource::new(
            runtime.clone(),
            SharedConfig::new(unique_name("zero")),
        )),
    ];

    for resource in &resources {
        let ptr = resource.allocate(0, StreamRef::DEFAULT).unwrap();
        assert!(ptr.is_none(), "{:?} returned memory for 0 bytes", resource);
    }
    assert_eq!(runtime.total_calls(), 0);
}

#[test]
fn test_pinned_instances_are_interchangeable() {
    let runtime = host();
    let a = PinnedMemoryResource::new(runtime.clone());
    let b = PinnedMemoryResource::new(runtime);
    assert!(a.is_equal(&b));
    assert!(b.is_equal(&a));

    let ptr = a.allocate(4096, StreamRef::DEFAULT).unwrap().unwrap();
    unsafe {
        ptr.as_ptr().write_bytes(0x42, 4096);
        assert_eq!(*ptr.as_ptr().add(4095), 0x42);
        b.deallocate(ptr, 4096, StreamRef::DEFAULT);
    }

    assert_eq!(a.stats().allocation_count, 1);
    assert_eq!(b.stats().deallocation_count, 1);
}

#[test]
fn test_equality_is_by_kind_and_backend() {
    let dummy = Arc::new(DummyRuntime::new());
    let pinned_host = PinnedMemoryResource::new(host());
    let pinned_dummy = PinnedMemoryResource::new(dummy.clone());
    let shared_dummy = SharedMemoryResource::new(dummy, SharedConfig::new(unique_name("eq")));

    assert_eq!(pinned_host.kind(), ResourceKind::Pinned);
    assert_eq!(shared_dummy.kind(), ResourceKind::Shared);
    assert!(!pinned_host.is_equal(&pinned_dummy));
    assert!(!pinned_dummy.is_equal(&shared_dummy));

    let as_dyn: &dyn MemoryResource = &pinned_dummy;
    let clone: &dyn MemoryResource = &pinned_dummy.clone();
    assert!(as_dyn == clone);
}

#[test]
fn test_capabilities() {
    let dummy = Arc::new(DummyRuntime::new());
    let pinned = PinnedMemoryResource::new(dummy.clone());
    let shared = SharedMemoryResource::new(dummy, SharedConfig::new(unique_name("caps")));
    let resources: [&dyn MemoryResource; 2] = [&pinned, &shared];

    for resource in resources {
        assert!(!resource.supports_streams());
        assert!(resource.supports_mem_info());
    }
}

#[test]
fn test_mem_info_bounds() {
    let pinned = PinnedMemoryResource::new(host());
    let info = pinned.mem_info(StreamRef::DEFAULT).unwrap();
    assert!(info.total_bytes >= info.free_bytes);

    let dummy = Arc::new(DummyRuntime::with_memory(MemoryInfo::new(512, 1024)));
    let shared = SharedMemoryResource::new(dummy.clone(), SharedConfig::new(unique_name("info")));
    let (free, total) = shared.mem_info(StreamRef::DEFAULT).unwrap().as_pair();
    assert_eq!((free, total), (512, 1024));
    assert_eq!(dummy.calls(RuntimeOp::MemInfo), 1);
}

#[test]
fn test_staging_buffer_releases_on_drop() {
    let runtime = Arc::new(DummyRuntime::new());
    let pinned = PinnedMemoryResource::new(runtime.clone());

    {
        let mut buf = StagingBuffer::new(&pinned, 1000, StreamRef::DEFAULT).unwrap();
        assert_eq!(buf.len(), 1000);
        buf.fill(7);
        assert!(buf.iter().all(|&b| b == 7));
    }
    assert_eq!(runtime.calls(RuntimeOp::HostFree), 1);

    let empty = StagingBuffer::new(&pinned, 0, StreamRef::DEFAULT).unwrap();
    assert!(empty.is_empty());
    assert!(empty.as_ptr().is_null());
    drop(empty);
    assert_eq!(runtime.calls(RuntimeOp::HostAlloc), 1);
}

#[test]
fn test_staging_buffer_into_raw() {
    let runtime = Arc::new(DummyRuntime::new());
    let pinned = PinnedMemoryResource::new(runtime.clone());

    let buf = StagingBuffer::new(&pinned, 64, StreamRef::DEFAULT).unwrap();
    let (ptr, len) = buf.into_raw();
    assert_eq!(runtime.calls(RuntimeOp::HostFree), 0);

    unsafe { pinned.deallocate(ptr.unwrap(), len, StreamRef::DEFAULT) };
    assert_eq!(runtime.calls(RuntimeOp::HostFree), 1);
}

#[test]
fn test_follower_timeout_is_reported() {
    let sink = sink();

    let name = unique_name("timeout");
    let follower = SharedMemoryResource::new(
        Arc::new(DummyRuntime::new()),
        SharedConfig::new(name.clone())
            .with_rank(1)
            .with_poll_interval(Duration::from_millis(5))
            .with_bootstrap_timeout(Duration::from_millis(30)),
    );

    let err = follower.allocate(4096, StreamRef::DEFAULT).unwrap_err();
    match err {
        AllocError::BootstrapTimeout { name: n, waited } => {
            assert_eq!(n, name);
            assert!(waited >= Duration::from_millis(30));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(sink.contains("SA105"));
    assert!(!name.exists());
}

#[test]
fn test_segment_resize_failure_is_an_error() {
    let sink = sink();
    let name = unique_name("resize");
    let runtime = Arc::new(DummyRuntime::new());
    let leader = SharedMemoryResource::new(runtime.clone(), SharedConfig::new(name.clone()));

    // Fits in usize with the header page, but not in off_t.
    let bytes = usize::MAX - page_size();
    match leader.allocate(bytes, StreamRef::DEFAULT) {
        Err(AllocError::SegmentResize { name: n, .. }) => assert_eq!(n, name),
        other => panic!("unexpected result: {:?}", other),
    }

    assert!(sink.contains("SA102"));
    assert!(sink
        .diagnostics()
        .iter()
        .any(|d| d.context.as_deref().is_some_and(|c| c.contains(name.as_str()))));
    assert!(!name.exists());
    assert_eq!(runtime.calls(RuntimeOp::HostRegister), 0);
    assert_eq!(leader.stats().failed_allocations, 1);
}

#[test]
fn test_oversized_request_is_an_error() {
    let name = unique_name("overflow");
    let leader = SharedMemoryResource::new(
        Arc::new(DummyRuntime::new()),
        SharedConfig::new(name.clone()),
    );

    let err = leader.allocate(usize::MAX, StreamRef::DEFAULT).unwrap_err();
    assert!(matches!(err, AllocError::SizeOverflow { bytes: usize::MAX }));
    assert!(!name.exists());
}

#[test]
fn test_unopenable_segment_is_an_error() {
    // Root bypasses the mode bits.
    if unsafe { libc::geteuid() } == 0 {
        return;
    }

    let sink = sink();
    let name = unique_name("mode");
    let runtime = Arc::new(DummyRuntime::new());
    let leader = SharedMemoryResource::new(
        runtime.clone(),
        SharedConfig::new(name.clone()).with_mode(0o000),
    );
    let follower = SharedMemoryResource::new(
        runtime,
        SharedConfig::new(name.clone())
            .with_rank(1)
            .with_bootstrap_timeout(Duration::from_millis(200)),
    );

    let ptr = leader.allocate(4096, StreamRef::DEFAULT).unwrap().unwrap();
    let err = follower.allocate(4096, StreamRef::DEFAULT).unwrap_err();
    assert!(matches!(err, AllocError::SegmentOpen { .. }));
    assert!(sink.contains("SA109"));

    unsafe { leader.deallocate(ptr, 4096, StreamRef::DEFAULT) };
    assert!(!name.exists());
}

#[test]
fn test_taken_name_is_reported() {
    let sink = sink();
    let name = unique_name("taken");
    let runtime = Arc::new(DummyRuntime::new());
    let first = SharedMemoryResource::new(runtime.clone(), SharedConfig::new(name.clone()));
    let second = SharedMemoryResource::new(
        runtime,
        SharedConfig::new(name.clone()).with_reclaim_stale(true),
    );

    let ptr = first.allocate(4096, StreamRef::DEFAULT).unwrap().unwrap();
    let err = second.allocate(4096, StreamRef::DEFAULT).unwrap_err();
    assert!(matches!(err, AllocError::SegmentExists { .. }));
    assert!(sink.contains("SA108"));

    unsafe { first.deallocate(ptr, 4096, StreamRef::DEFAULT) };
    assert!(!name.exists());
}
