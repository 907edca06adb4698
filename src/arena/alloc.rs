//! Public allocate / release entry points and the page-level path.
//!
//! `allocate` pads the request with the header (plus worst-case alignment
//! slack), dispatches small unaligned requests to the sub-allocators and
//! everything else to a bitmap search for a contiguous page run. `release`
//! recovers the header sitting in front of the payload and reverses
//! whichever path served it.

use core::mem::size_of;
use core::ptr::{addr_of_mut, null_mut};

use crate::util::align::align_up_by;

use super::list::Offset32;
use super::{alloc_site, bitmap, list, AllocSite, Allocation, Arena};

/// Smallest sub-allocator class that fits `padded` bytes, if any.
#[cfg(feature = "suballoc")]
#[inline(always)]
fn class_of(padded: u32) -> Option<usize> {
    super::BLOCK_CLASSES.iter().position(|&class| padded <= class)
}

/// Pages needed to hold `padded` bytes.
#[inline(always)]
fn pages_for(padded: u32, page_size: u32) -> u32 {
    padded / page_size + if padded % page_size != 0 { 1 } else { 0 }
}

/// Allocate `bytes` from the arena. A `bytes` of 0 is bumped to 1. An
/// `alignment` of 0 means "no requirement" and makes the request eligible
/// for the sub-allocators; any nonzero value is honored exactly on the
/// returned payload pointer.
///
/// Exhaustion asserts in debug builds and returns null in release, leaving
/// the arena state exactly as it was.
///
/// # Safety
///
/// `arena` must point at an initialized arena that is not driven by any
/// other thread.
#[cfg_attr(feature = "track_location", track_caller)]
pub unsafe fn allocate(arena: *mut Arena, bytes: u32, alignment: u32) -> *mut u8 {
    debug_assert!(!arena.is_null(), "allocate without an arena");
    if arena.is_null() {
        return null_mut();
    }
    let bytes = if bytes == 0 { 1 } else { bytes };
    let site = alloc_site();

    // Size the request before touching any state so failures leave nothing
    // behind. The padded size can overflow u32 with a hostile alignment,
    // hence the wide math.
    let header_padding = if alignment != 0 { alignment - 1 } else { 0 };
    let padded =
        bytes as u64 + size_of::<Allocation>() as u64 + header_padding as u64;

    debug_assert!(
        bytes < (*arena).size - (*arena).requested,
        "allocation larger than the remaining arena"
    );
    if bytes >= (*arena).size - (*arena).requested || padded > (*arena).size as u64 {
        debug_assert!(padded <= (*arena).size as u64, "padded request exceeds the arena");
        return null_mut();
    }
    let padded = padded as u32;

    // Record the request up front; it is valid for both paths and visible
    // to the allocate hook.
    (*arena).requested += bytes;

    #[cfg(feature = "suballoc")]
    if alignment == 0 {
        if let Some(class) = class_of(padded) {
            let mem = super::subal::sub_allocate(arena, bytes, class, site);
            if mem.is_null() {
                (*arena).requested -= bytes;
                debug_assert!(false, "arena out of pages");
            }
            return mem;
        }
    }

    let mem = allocate_pages(arena, bytes, alignment, padded, site);
    if mem.is_null() {
        (*arena).requested -= bytes;
        debug_assert!(false, "arena out of pages");
    }
    mem
}

/// Page-level path: reserve a run of pages, place the header (shifted when
/// the payload must be aligned) and thread it onto the active list.
unsafe fn allocate_pages(
    arena: *mut Arena,
    bytes: u32,
    alignment: u32,
    padded: u32,
    site: AllocSite,
) -> *mut u8 {
    let page_size = (*arena).page_size;
    let num_pages = pages_for(padded, page_size);

    #[cfg(feature = "scan_cursor")]
    let first_page = bitmap::find_range(arena, num_pages, (*arena).scan_bit);
    #[cfg(not(feature = "scan_cursor"))]
    let first_page = bitmap::find_range(arena, num_pages, 0);
    if first_page == 0 {
        return null_mut();
    }
    bitmap::set_range(arena, first_page, num_pages);

    let page_start = (arena as *mut u8).add((first_page * page_size) as usize);
    let mut header_at = page_start;
    if alignment != 0 {
        // Shift the header so the payload behind it lands on the requested
        // boundary. The worst-case shift was already part of `padded`, so
        // the header stays within the first reserved page.
        let payload_addr = header_at as usize + size_of::<Allocation>();
        let aligned = align_up_by(payload_addr, alignment as usize);
        header_at = header_at.add(aligned - payload_addr);
        // Release recovers the first page from the header address, so the
        // shift must not push the header off the first reserved page.
        debug_assert!(
            (header_at as usize) < page_start as usize + page_size as usize,
            "alignment larger than the page size is not supported"
        );
    }

    let header = header_at as *mut Allocation;
    (*header).prev = Offset32::NONE;
    (*header).next = Offset32::NONE;
    (*header).size = bytes;
    (*header).alignment = alignment;
    (*header).set_location(site);

    list::push_head(arena, addr_of_mut!((*arena).active_head), header);

    let payload = header_at.add(size_of::<Allocation>());
    #[cfg(feature = "clear_on_alloc")]
    crate::util::mem::set(payload, 0, bytes);
    #[cfg(all(feature = "debug_fill", not(feature = "clear_on_alloc")))]
    {
        const FILL: &[u8] = b"-MEMORY";
        let usable = (num_pages * page_size) as usize
            - (header_at as usize - page_start as usize)
            - size_of::<Allocation>();
        let mut i = bytes as usize;
        while i < usable {
            payload.add(i).write(FILL[(i - bytes as usize) % FILL.len()]);
            i += 1;
        }
    }

    if let Some(hook) = (*arena).allocate_hook() {
        hook(arena, header, bytes, padded, first_page, num_pages);
    }

    payload
}

/// Release a payload pointer returned by [`allocate`].
///
/// Double frees, null and foreign pointers assert in debug builds and are
/// ignored in release.
///
/// # Safety
///
/// `memory` must be null or a live payload pointer from this arena.
pub unsafe fn release(arena: *mut Arena, memory: *mut u8) {
    debug_assert!(!arena.is_null(), "release without an arena");
    debug_assert!(!memory.is_null(), "releasing a null pointer");
    if arena.is_null() || memory.is_null() {
        return;
    }

    let base = arena as usize;
    let addr = memory as usize;
    debug_assert!(
        addr >= base + size_of::<Arena>() && addr < base + (*arena).size as usize,
        "pointer does not belong to this arena"
    );
    if addr < base + size_of::<Arena>() || addr >= base + (*arena).size as usize {
        return;
    }

    // The allocation header always precedes the payload.
    let header = memory.sub(size_of::<Allocation>()) as *mut Allocation;
    debug_assert!((*header).size != 0, "double free");
    if (*header).size == 0 {
        return;
    }

    let padded = (*header).padded_size();
    debug_assert!((*arena).requested >= (*header).size, "releasing more than was requested");
    (*arena).requested -= (*header).size;

    // Sub-allocations re-enter their class here; from this side they look
    // like any other allocation, the padded size is the tell. Alignment
    // padding never contributes because the class paths require
    // alignment == 0.
    #[cfg(feature = "suballoc")]
    if (*header).alignment == 0 {
        if let Some(class) = class_of(padded) {
            super::subal::sub_release(arena, header, class);
            return;
        }
    }

    let page_size = (*arena).page_size;
    let first_page = ((header as usize - base) / page_size as usize) as u32;
    let num_pages = pages_for(padded, page_size);
    bitmap::clear_range(arena, first_page, num_pages);

    list::remove(arena, addr_of_mut!((*arena).active_head), header);

    let old_size = (*header).size;
    (*header).size = 0;

    if let Some(hook) = (*arena).release_hook() {
        hook(arena, header, old_size, padded, first_page, num_pages);
    }
}
