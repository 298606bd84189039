//! Page size queries and page alignment.

use std::sync::OnceLock;

const FALLBACK_PAGE_SIZE: usize = 4096;

/// The host page size, queried once via `sysconf`.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            FALLBACK_PAGE_SIZE
        }
    })
}

/// Align `size` up to `align`, which must be a power of two.
///
/// Returns `None` on overflow.
#[inline]
pub const fn checked_align_up(size: usize, align: usize) -> Option<usize> {
    match size.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Round `size` up to a whole number of host pages.
#[inline]
pub fn round_to_pages(size: usize) -> Option<usize> {
    checked_align_up(size, page_size())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_power_of_two() {
        assert!(page_size().is_power_of_two());
    }

    #[test]
    fn test_checked_align_up() {
        assert_eq!(checked_align_up(0, 8), Some(0));
        assert_eq!(checked_align_up(1, 8), Some(8));
        assert_eq!(checked_align_up(8, 8), Some(8));
        assert_eq!(checked_align_up(9, 8), Some(16));
        assert_eq!(checked_align_up(usize::MAX, 8), None);
    }

    #[test]
    fn test_round_to_pages() {
        let page = page_size();
        assert_eq!(round_to_pages(1), Some(page));
        assert_eq!(round_to_pages(page + 1), Some(2 * page));
    }
}
