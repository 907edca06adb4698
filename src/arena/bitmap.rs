//! Page bitmap primitives: contiguous-run search and range set/clear.
//!
//! All three operations work on the half-open bit range
//! `[start, start + count)` of the mask that sits behind the arena header.
//! The search is bounded by the page count, not the padded bitmap length,
//! so the spare bits of the last tracking word are never handed out.

use crate::util::bit;

use super::{page_mask, Arena};

/// Find the first run of `num_pages` consecutive free pages, scanning from
/// bit `search_start` and wrapping around once. Returns the first bit of
/// the run, or 0 if no run exists. Bit 0 always tracks overhead, so it can
/// never start a valid range.
///
/// On success the scan cursor is parked right behind the run; a failed
/// search leaves the arena untouched.
pub(crate) unsafe fn find_range(arena: *mut Arena, num_pages: u32, search_start: u32) -> u32 {
    debug_assert!(!arena.is_null());
    debug_assert!(num_pages != 0, "searching for an empty page range");

    let mask = page_mask(arena);
    let total_pages = (*arena).total_pages();
    debug_assert!(total_pages != 0);
    // The cursor may have been parked past the last page by a previous find.
    let search_start = if search_start >= total_pages { 0 } else { search_start };

    let mut start = scan_span(mask, search_start, total_pages, num_pages);
    if start == 0 {
        // Wrap around once and retry the part we skipped.
        start = scan_span(mask, 0, search_start, num_pages);
    }
    if start == 0 {
        log::warn!("arena: no run of {} contiguous free pages", num_pages);
        return 0;
    }

    (*arena).scan_bit = start + num_pages;
    start
}

/// Scan `[from, to)` for `num_pages` consecutive clear bits and return the
/// first bit of the run, or 0 if the window holds none.
///
/// `start == 0` doubles as the "no run in progress" marker. That would
/// misbehave if bit 0 could ever be free, but bit 0 is the header page and
/// is set for the arena's whole lifetime.
unsafe fn scan_span(mask: *const u32, from: u32, to: u32, num_pages: u32) -> u32 {
    let mut start = 0u32;
    let mut count = 0u32;

    for i in from..to {
        if bit::test_bit(mask, i) {
            start = 0;
            count = 0;
            continue;
        }

        if start == 0 {
            start = i;
            count = 1;
        } else {
            count += 1;
        }
        if count == num_pages {
            return start;
        }
    }

    0
}

/// Mark `[start, start + count)` used and account for it. Every bit must
/// have been clear.
pub(crate) unsafe fn set_range(arena: *mut Arena, start: u32, count: u32) {
    debug_assert!(!arena.is_null());
    debug_assert!(count != 0, "setting an empty page range");

    let mask = page_mask(arena);
    let total_pages = (*arena).total_pages();
    debug_assert!(start + count <= total_pages, "page range out of bounds");

    for i in start..start + count {
        debug_assert!(!bit::test_bit(mask, i), "page is already in use");
        bit::set_bit(mask, i);
    }

    debug_assert!((*arena).pages_in_use + count <= total_pages, "over-allocating");
    (*arena).pages_in_use += count;
    if (*arena).pages_in_use > (*arena).peak_pages_used {
        (*arena).peak_pages_used = (*arena).pages_in_use;
    }
}

/// Clear `[start, start + count)` and account for it. Every bit must have
/// been set.
pub(crate) unsafe fn clear_range(arena: *mut Arena, start: u32, count: u32) {
    debug_assert!(!arena.is_null());
    debug_assert!(count != 0, "clearing an empty page range");

    let mask = page_mask(arena);
    debug_assert!(start + count <= (*arena).total_pages(), "page range out of bounds");

    for i in start..start + count {
        debug_assert!(bit::test_bit(mask, i), "page is already free");
        bit::clear_bit(mask, i);
    }

    debug_assert!((*arena).pages_in_use >= count, "page accounting underflow");
    (*arena).pages_in_use -= count;
}
