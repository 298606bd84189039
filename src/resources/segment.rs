//! Named POSIX shared-memory segments and their control header.
//!
//! Layout of a segment:
//!
//! ```text
//! +---------------------+----------------------------------+
//! | control header page | payload (`bytes` requested)      |
//! +---------------------+----------------------------------+
//! ^ mapping base        ^ address handed to the caller
//! ```
//!
//! The file is therefore `header_len() + bytes` long, while the address
//! handed out and the length checked by followers cover `bytes` exactly.
//!
//! The header holds only atomics, so every process that maps the segment
//! can coordinate through it without locks. It also records the pid of the
//! rank 0 process that created it; a segment whose creator is gone is stale
//! and is never joined.

use std::ffi::CStr;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::api::config::SegmentName;
use crate::util::page::page_size;

/// Header state once rank 0 has sized, registered and published the segment.
pub(crate) const SEGMENT_READY: u64 = 0x5354_4147_4552_4459;
/// Header state once rank 0 has started tearing the segment down.
pub(crate) const SEGMENT_RETIRED: u64 = 0x5354_4147_5245_5444;

#[repr(C)]
pub(crate) struct ControlHeader {
    state: AtomicU64,
    bytes: AtomicU64,
    joined: AtomicU32,
    live: AtomicU32,
    owner: AtomicU32,
}

const _: () = assert!(mem::size_of::<ControlHeader>() <= 4096);

impl ControlHeader {
    /// Record the creating process. Done before the header is published.
    pub fn claim(&self, pid: u32) {
        self.owner.store(pid, Ordering::Release);
    }

    pub fn owner(&self) -> u32 {
        self.owner.load(Ordering::Acquire)
    }

    /// Whether the creating process still exists.
    pub fn owner_alive(&self) -> bool {
        process_alive(self.owner())
    }

    /// Make the segment visible to followers. Rank 0 counts as joined.
    pub fn publish(&self, bytes: usize) {
        self.bytes.store(bytes as u64, Ordering::Relaxed);
        self.joined.store(1, Ordering::Relaxed);
        self.live.store(1, Ordering::Relaxed);
        self.state.store(SEGMENT_READY, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == SEGMENT_READY
    }

    /// Payload length published by rank 0.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Attach a follower. Fails if the segment is not (or no longer) ready.
    pub fn join(&self) -> bool {
        self.live.fetch_add(1, Ordering::AcqRel);
        if !self.is_ready() {
            self.live.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        self.joined.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Detach this participant.
    pub fn leave(&self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn retire(&self) {
        self.state.store(SEGMENT_RETIRED, Ordering::Release);
    }

    /// `(joined, live)` counts.
    pub fn attendance(&self) -> (u32, u32) {
        (
            self.joined.load(Ordering::Acquire),
            self.live.load(Ordering::Acquire),
        )
    }
}

/// Existence check via `kill(pid, 0)`. EPERM still means the process exists.
pub(crate) fn process_alive(pid: u32) -> bool {
    let pid = match libc::pid_t::try_from(pid) {
        Ok(pid) if pid > 0 => pid,
        _ => return false,
    };
    // SAFETY: signal 0 performs the permission and existence checks only.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Size of the control area in front of the payload.
///
/// One full page keeps the payload page aligned for registration.
pub(crate) fn header_len() -> usize {
    page_size()
}

/// An owned `MAP_SHARED` mapping of a whole segment. Unmapped on drop.
pub(crate) struct Mapping {
    base: NonNull<u8>,
    len: usize,
}

impl Mapping {
    /// Reconstruct the mapping that backs a payload pointer.
    ///
    /// # Safety
    ///
    /// `payload` and `bytes` must describe a payload previously obtained
    /// from [`Mapping::into_payload`] and not yet released.
    pub unsafe fn from_payload(payload: NonNull<u8>, bytes: usize) -> Self {
        let base = payload.as_ptr().sub(header_len());
        Self {
            base: NonNull::new_unchecked(base),
            len: header_len() + bytes,
        }
    }

    pub fn header(&self) -> &ControlHeader {
        // SAFETY: every mapping covers at least one header page, which is
        // page aligned and therefore aligned for the header's atomics.
        unsafe { &*(self.base.as_ptr() as *const ControlHeader) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn payload(&self) -> NonNull<u8> {
        // SAFETY: len >= header_len(), so the offset stays in bounds.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(header_len())) }
    }

    /// Keep the mapping alive past this value, returning the payload address.
    pub fn into_payload(self) -> NonNull<u8> {
        let payload = self.payload();
        mem::forget(self);
        payload
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: base/len describe a mapping created by `map`.
        unsafe {
            libc::munmap(self.base.as_ptr().cast(), self.len);
        }
    }
}

fn cvt(rc: libc::c_int) -> io::Result<libc::c_int> {
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

#[cfg(target_os = "linux")]
unsafe fn raw_shm_open(name: &CStr, oflag: libc::c_int, mode: u32) -> libc::c_int {
    libc::shm_open(name.as_ptr(), oflag, mode as libc::mode_t)
}

#[cfg(not(target_os = "linux"))]
unsafe fn raw_shm_open(name: &CStr, oflag: libc::c_int, mode: u32) -> libc::c_int {
    libc::shm_open(name.as_ptr(), oflag, mode as libc::c_uint)
}

fn shm_open(name: &SegmentName, oflag: libc::c_int, mode: u32) -> io::Result<OwnedFd> {
    let cname = name.to_cstring();
    // SAFETY: cname is a valid NUL-terminated string.
    let fd = cvt(unsafe { raw_shm_open(&cname, oflag, mode) })?;
    // SAFETY: shm_open returned a fresh descriptor that nothing else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Create a new segment; fails with `AlreadyExists` if the name is taken.
pub(crate) fn create_exclusive(name: &SegmentName, mode: u32) -> io::Result<OwnedFd> {
    shm_open(name, libc::O_CREAT | libc::O_EXCL | libc::O_RDWR, mode)
}

/// Open an existing segment; fails with `NotFound` if it does not exist yet.
pub(crate) fn open_existing(name: &SegmentName) -> io::Result<OwnedFd> {
    shm_open(name, libc::O_RDWR, 0)
}

pub(crate) fn resize(fd: &OwnedFd, len: usize) -> io::Result<()> {
    let len = libc::off_t::try_from(len)
        .map_err(|_| io::Error::from_raw_os_error(libc::EFBIG))?;
    // SAFETY: fd is a valid open descriptor.
    cvt(unsafe { libc::ftruncate(fd.as_raw_fd(), len) }).map(drop)
}

pub(crate) fn file_len(fd: &OwnedFd) -> io::Result<usize> {
    // SAFETY: an all-zero stat is a valid out-parameter.
    let mut st: libc::stat = unsafe { mem::zeroed() };
    // SAFETY: fd is a valid open descriptor and st is writable.
    cvt(unsafe { libc::fstat(fd.as_raw_fd(), &mut st) })?;
    Ok(usize::try_from(st.st_size).unwrap_or(0))
}

/// Map `len` bytes of the segment read/write and shared.
pub(crate) fn map(fd: &OwnedFd, len: usize) -> io::Result<Mapping> {
    // SAFETY: no address hint; the kernel validates fd and len.
    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd.as_raw_fd(),
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    match NonNull::new(addr.cast::<u8>()) {
        Some(base) => Ok(Mapping { base, len }),
        None => Err(io::Error::from_raw_os_error(libc::ENOMEM)),
    }
}

/// Remove the name from the OS namespace. Existing mappings stay valid.
pub(crate) fn unlink(name: &SegmentName) -> io::Result<()> {
    let cname = name.to_cstring();
    // SAFETY: cname is a valid NUL-terminated string.
    cvt(unsafe { libc::shm_unlink(cname.as_ptr()) }).map(drop)
}

/// Whether the name is taken. A segment this process may not open still exists.
pub(crate) fn exists(name: &SegmentName) -> bool {
    match shm_open(name, libc::O_RDONLY, 0) {
        Ok(_) => true,
        Err(err) => err.kind() != io::ErrorKind::NotFound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn unique_name(tag: &str) -> SegmentName {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        SegmentName::new(format!("/stagealloc-seg-{}-{}-{}", tag, std::process::id(), n)).unwrap()
    }

    #[test]
    fn test_create_map_unlink() {
        let name = unique_name("basic");
        let fd = create_exclusive(&name, 0o600).unwrap();
        let total = header_len() + 4096;
        resize(&fd, total).unwrap();
        assert_eq!(file_len(&fd).unwrap(), total);

        let mapping = map(&fd, total).unwrap();
        assert_eq!(mapping.len(), total);
        assert_eq!(mapping.payload().as_ptr() as usize % page_size(), 0);
        assert!(exists(&name));

        unlink(&name).unwrap();
        assert!(!exists(&name));
        drop(mapping);
    }

    #[test]
    fn test_exclusive_create_rejects_existing() {
        let name = unique_name("excl");
        let _fd = create_exclusive(&name, 0o600).unwrap();

        let err = create_exclusive(&name, 0o600).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

        unlink(&name).unwrap();
    }

    #[test]
    fn test_open_missing_is_not_found() {
        let name = unique_name("missing");
        let err = open_existing(&name).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_header_protocol() {
        let name = unique_name("header");
        let fd = create_exclusive(&name, 0o600).unwrap();
        resize(&fd, header_len() + 64).unwrap();
        let leader = map(&fd, header_len() + 64).unwrap();
        let follower = map(&open_existing(&name).unwrap(), header_len() + 64).unwrap();

        assert!(!follower.header().is_ready());
        assert!(!follower.header().join());
        assert_eq!(follower.header().attendance(), (0, 0));

        leader.header().publish(64);
        assert!(follower.header().is_ready());
        assert_eq!(follower.header().bytes(), 64);
        assert!(follower.header().join());
        assert_eq!(leader.header().attendance(), (2, 2));

        follower.header().leave();
        assert_eq!(leader.header().attendance(), (2, 1));

        leader.header().retire();
        assert!(!follower.header().join());

        unlink(&name).unwrap();
    }

    #[test]
    fn test_owner_liveness() {
        let name = unique_name("owner");
        let fd = create_exclusive(&name, 0o600).unwrap();
        resize(&fd, header_len()).unwrap();
        let mapping = map(&fd, header_len()).unwrap();

        // Never claimed.
        assert_eq!(mapping.header().owner(), 0);
        assert!(!mapping.header().owner_alive());

        mapping.header().claim(std::process::id());
        assert!(mapping.header().owner_alive());

        // Above any kernel pid_max.
        mapping.header().claim(i32::MAX as u32);
        assert!(!mapping.header().owner_alive());

        unlink(&name).unwrap();
    }

    #[test]
    fn test_process_alive() {
        assert!(process_alive(std::process::id()));
        assert!(!process_alive(0));
        assert!(!process_alive(u32::MAX));
    }

    #[test]
    fn test_payload_roundtrip() {
        let name = unique_name("payload");
        let fd = create_exclusive(&name, 0o600).unwrap();
        resize(&fd, header_len() + 128).unwrap();

        let payload = map(&fd, header_len() + 128).unwrap().into_payload();
        let mapping = unsafe { Mapping::from_payload(payload, 128) };
        assert_eq!(mapping.payload(), payload);
        assert_eq!(mapping.len(), header_len() + 128);

        unlink(&name).unwrap();
    }
}
