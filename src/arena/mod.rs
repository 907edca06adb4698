//! Two-tier allocator over a caller-supplied memory region.
//!
//! The region ("the arena") is laid out as follows, all offsets relative to
//! the pointer handed to [`initialize`]:
//!
//! | Offset | Size | Description |
//! | ------ | ---- | ----------- |
//! | 0 | `size_of::<Arena>()` | Arena header. |
//! | header end | one bit per page, padded to `u32` | Page bitmap, bit *i* set iff page *i* is in use. |
//! | … | up to page end | Padding, lost. |
//! | next page | one page | Reserved debug page, scratch for [`debug`]. |
//! | next page | rest | Allocatable pages. |
//!
//! The header, bitmap and debug page together are the *overhead pages*;
//! their bits are set at initialization and cleared only by [`shutdown`].
//!
//! Page-level allocations find a contiguous run of clear bits and place an
//! [`Allocation`] header at the start of the run (shifted when the caller
//! asked for alignment). Small unaligned requests go through the
//! fixed-block sub-allocators instead, which carve one page into uniform
//! blocks per size class. Either way the header ends up on the active list
//! and the payload directly follows it.
//!
//! [`initialize`]: self::initialize
//! [`shutdown`]: self::shutdown
//! [`debug`]: self::debug
//! [`Allocation`]: self::Allocation

pub(crate) mod bitmap;
pub(crate) mod list;

mod alloc;
#[cfg(feature = "suballoc")]
mod subal;

pub mod debug;

#[cfg(test)]
mod tests;

pub use self::alloc::{allocate, release};

use core::mem::{align_of, size_of};
use core::ptr::null_mut;

use crate::util::align::div_round_up;
use crate::util::bit;
use list::Offset32;

/// Default page size. Most small allocations go through the sub-allocators,
/// so this mostly matters for large allocations.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Bits per page-tracking word. The bitmap is a `u32` array; changing this
/// would require changing the bitmap module.
pub const TRACKING_UNIT: u32 = u32::BITS;

/// Required alignment of the arena base address. Intra-arena offsets and
/// the bitmap words both rely on it. Stays 8 even on 32-bit targets.
pub const ARENA_ALIGNMENT: u32 = 8;

/// Minimum arena span. Anything smaller is all overhead.
pub const MIN_PAGES: u32 = 10;

/// Block sizes served by the sub-allocator free lists. The largest request
/// a class can hold is the class size minus the allocation header. There is
/// no deep significance to these values; tune them to match your structs.
pub const BLOCK_CLASSES: [u32; 6] = [64, 128, 256, 512, 1024, 2048];

/// Hook invoked on every allocation or release when registered.
///
/// `requested` is the raw byte count the caller asked for (on release: the
/// count it asked for back when the block was allocated) and `served` the
/// padded size actually reserved. For page-level operations `num_pages` is
/// the page count of the run; the sub-allocator path overloads it as a 0/1
/// flag, see the call sites in the sub-allocator.
pub type Hook = fn(
    arena: *mut Arena,
    header: *mut Allocation,
    requested: u32,
    served: u32,
    first_page: u32,
    num_pages: u32,
);

/// Allocation-site capture. Collapses to a unit when tracking is disabled
/// so the internal call paths keep a single signature.
#[cfg(feature = "track_location")]
pub(crate) type AllocSite = Option<&'static core::panic::Location<'static>>;
#[cfg(not(feature = "track_location"))]
pub(crate) type AllocSite = ();

#[cfg_attr(feature = "track_location", track_caller)]
#[inline(always)]
pub(crate) fn alloc_site() -> AllocSite {
    #[cfg(feature = "track_location")]
    {
        Some(core::panic::Location::caller())
    }
}

/// Header preceding every allocation payload, written in place into the
/// reserved page or block.
///
/// `size` is the unpadded byte count the caller requested; 0 marks the
/// header as free, which makes it the list-membership discriminator: a
/// nonzero header is on the active list, a zero one on a class free list
/// (or inside an already released page). `alignment` of 0 means the request
/// was unaligned and therefore sub-allocator eligible.
#[repr(C)]
pub struct Allocation {
    pub(crate) prev: Offset32,
    pub(crate) next: Offset32,
    pub(crate) size: u32,
    pub(crate) alignment: u32,
    #[cfg(feature = "track_location")]
    pub(crate) location: Option<&'static core::panic::Location<'static>>,
    // Keep the header size consistent between 32 and 64 bit targets.
    #[cfg(all(feature = "track_location", target_pointer_width = "32"))]
    pub(crate) padding_32bit: u32,
}

#[cfg(feature = "track_location")]
sa::const_assert_eq!(size_of::<Allocation>(), 24);
#[cfg(not(feature = "track_location"))]
sa::const_assert_eq!(size_of::<Allocation>(), 16);
sa::const_assert_eq!(core::mem::offset_of!(Allocation, prev), 0);

impl Allocation {
    /// Unpadded allocation size, i.e. what the caller passed to `allocate`.
    #[inline(always)]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Requested payload alignment; 0 for unaligned allocations.
    #[inline(always)]
    pub fn alignment(&self) -> u32 {
        self.alignment
    }

    /// Call site that made this allocation, if tracking is enabled and the
    /// header is live.
    #[cfg(feature = "track_location")]
    #[inline(always)]
    pub fn location(&self) -> Option<&'static core::panic::Location<'static>> {
        self.location
    }

    /// Total bytes this allocation occupies: payload plus header plus the
    /// worst-case alignment shift.
    #[inline(always)]
    pub(crate) fn padded_size(&self) -> u32 {
        let padding = if self.alignment != 0 { self.alignment - 1 } else { 0 };
        self.size + padding + size_of::<Allocation>() as u32
    }

    #[inline(always)]
    pub(crate) fn set_location(&mut self, site: AllocSite) {
        #[cfg(feature = "track_location")]
        {
            self.location = site;
        }
        #[cfg(not(feature = "track_location"))]
        let _ = site;
    }
}

/// The arena header, placed at offset 0 of the managed region.
///
/// The free list heads exist even when the sub-allocator feature is off so
/// the header layout does not depend on the feature set.
#[repr(C)]
pub struct Arena {
    allocate_hook: Option<Hook>,
    release_hook: Option<Hook>,

    pub(crate) free_heads: [Offset32; BLOCK_CLASSES.len()],
    pub(crate) active_head: Offset32,

    pub(crate) size: u32,
    pub(crate) page_size: u32,
    /// Running sum of the raw sizes of all outstanding allocations.
    pub(crate) requested: u32,
    /// Bit index the next search resumes from (cursor-advancing mode only).
    pub(crate) scan_bit: u32,
    pub(crate) pages_in_use: u32,
    pub(crate) peak_pages_used: u32,
    /// 0 = debug page available, 1 = held.
    dbg_page_held: u32,
}

// The bitmap follows the header directly and is read as u32 words, so the
// header size must keep it on the arena alignment grid.
sa::const_assert_eq!(size_of::<Arena>() % ARENA_ALIGNMENT as usize, 0);

impl Arena {
    /// Total bytes under management.
    #[inline(always)]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Page size chosen at initialization.
    #[inline(always)]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Number of pages the arena spans, overhead included.
    #[inline(always)]
    pub fn total_pages(&self) -> u32 {
        self.size / self.page_size
    }

    /// Pages currently marked used, overhead included.
    #[inline(always)]
    pub fn pages_in_use(&self) -> u32 {
        self.pages_in_use
    }

    /// High-water mark of [`pages_in_use`]. Monitor this to find out how
    /// much memory an application actually needs.
    ///
    /// [`pages_in_use`]: Arena::pages_in_use
    #[inline(always)]
    pub fn peak_pages_used(&self) -> u32 {
        self.peak_pages_used
    }

    /// Sum of the raw sizes of all outstanding allocations.
    #[inline(always)]
    pub fn requested_bytes(&self) -> u32 {
        self.requested
    }

    /// Bytes reserved for outstanding allocations at page granularity.
    #[inline(always)]
    pub fn served_bytes(&self) -> u32 {
        (self.pages_in_use - self.overhead_pages()) * self.page_size
    }

    /// Number of `u32` words in the page bitmap.
    #[inline(always)]
    pub(crate) fn mask_words(&self) -> u32 {
        div_round_up(self.total_pages(), TRACKING_UNIT)
    }

    /// Pages permanently reserved for the header, the bitmap and the debug
    /// page. The bitmap tail shares its last page with nothing; whatever is
    /// left of that page is padding.
    #[inline(always)]
    pub fn overhead_pages(&self) -> u32 {
        let meta_bytes = size_of::<Arena>() as u32 + self.mask_words() * size_of::<u32>() as u32;
        div_round_up(meta_bytes, self.page_size) + 1
    }

    /// Register (or clear) the allocate hook.
    #[inline(always)]
    pub fn set_allocate_hook(&mut self, hook: Option<Hook>) {
        self.allocate_hook = hook;
    }

    /// Register (or clear) the release hook.
    #[inline(always)]
    pub fn set_release_hook(&mut self, hook: Option<Hook>) {
        self.release_hook = hook;
    }

    #[inline(always)]
    pub(crate) fn allocate_hook(&self) -> Option<Hook> {
        self.allocate_hook
    }

    #[inline(always)]
    pub(crate) fn release_hook(&self) -> Option<Hook> {
        self.release_hook
    }
}

/// First word of the page bitmap, directly behind the header.
#[inline(always)]
pub(crate) unsafe fn page_mask(arena: *mut Arena) -> *mut u32 {
    (arena as *mut u8).add(size_of::<Arena>()) as *mut u32
}

/// Check a single page's tracking bit.
///
/// # Safety
///
/// `arena` must point at an initialized arena.
pub unsafe fn is_page_in_use(arena: *mut Arena, page: u32) -> bool {
    debug_assert!(page < (*arena).total_pages(), "page index out of range");
    bit::test_bit(page_mask(arena), page)
}

/// Adapt an arbitrary buffer for [`initialize`]: advance `memory` to the
/// next `alignment` boundary and shrink `size` to a multiple of `page_size`.
/// Returns the number of bytes lost.
///
/// Fails by zeroing both arguments if the alignment step alone exceeds the
/// buffer.
pub fn align_and_trim(memory: &mut *mut u8, size: &mut u32, alignment: u32, page_size: u32) -> u32 {
    let mut delta = 0u32;

    if alignment != 0 {
        let misalign = (*memory as usize % alignment as usize) as u32;
        if misalign != 0 {
            let step = alignment - misalign;
            debug_assert!(step <= *size, "buffer smaller than its own alignment step");
            if step > *size {
                *memory = null_mut();
                *size = 0;
                return 0;
            }
            *memory = memory.wrapping_add(step as usize);
            *size -= step;
            delta += step;
        }
    }

    // Trim the tail so the region splits into whole pages.
    let ragged = *size % page_size;
    if ragged != 0 {
        *size -= ragged;
        delta += ragged;
    }

    delta
}

/// Build an arena inside `memory` and return its header pointer.
///
/// `memory` must be aligned to [`ARENA_ALIGNMENT`], `size` a multiple of
/// `page_size` and at least [`MIN_PAGES`] pages, and `page_size` a multiple
/// of 8. Violations assert in debug builds and return null in release.
///
/// # Safety
///
/// `memory` must be valid for reads and writes of `size` bytes and must not
/// be touched by anything else until [`shutdown`].
pub unsafe fn initialize(memory: *mut u8, size: u32, page_size: u32) -> *mut Arena {
    debug_assert!(!memory.is_null(), "initialize needs backing memory");
    debug_assert!(
        page_size != 0 && page_size % ARENA_ALIGNMENT == 0,
        "page size must be a nonzero multiple of the arena alignment"
    );
    if memory.is_null() || page_size == 0 || page_size % ARENA_ALIGNMENT != 0 {
        return null_mut();
    }

    debug_assert!(
        memory as usize % ARENA_ALIGNMENT as usize == 0,
        "arena base must be aligned; consider align_and_trim"
    );
    debug_assert!(size % page_size == 0, "arena size must be a whole number of pages");
    debug_assert!(size / page_size >= MIN_PAGES, "arena must span at least MIN_PAGES pages");
    if memory as usize % ARENA_ALIGNMENT as usize != 0
        || size % page_size != 0
        || size / page_size < MIN_PAGES
    {
        return null_mut();
    }

    let arena = memory as *mut Arena;
    arena.write(Arena {
        allocate_hook: None,
        release_hook: None,
        free_heads: [Offset32::NONE; BLOCK_CLASSES.len()],
        active_head: Offset32::NONE,
        size,
        page_size,
        requested: 0,
        scan_bit: 0,
        pages_in_use: 0,
        peak_pages_used: 0,
        dbg_page_held: 0,
    });

    let mask = page_mask(arena);
    crate::util::mem::set(mask as *mut u8, 0, (*arena).mask_words() * size_of::<u32>() as u32);

    let overhead = (*arena).overhead_pages();
    debug_assert!(
        overhead < (*arena).total_pages(),
        "page size leaves no allocatable pages"
    );
    if overhead >= (*arena).total_pages() {
        return null_mut();
    }
    bitmap::set_range(arena, 0, overhead);

    log::info!(
        "arena up: {} pages of {} bytes, {} overhead",
        (*arena).total_pages(),
        page_size,
        overhead
    );

    arena
}

/// Tear the arena down. Asserts in debug builds if anything is still
/// allocated; in release it only clears the overhead bits, after which the
/// caller may reclaim the backing memory.
///
/// # Safety
///
/// `arena` must come from [`initialize`] and must not be used afterwards.
pub unsafe fn shutdown(arena: *mut Arena) {
    debug_assert!(!arena.is_null(), "shutdown without an arena");
    if arena.is_null() {
        return;
    }
    debug_assert!((*arena).size > 0, "shutting down an uninitialized arena");

    let overhead = (*arena).overhead_pages();
    bitmap::clear_range(arena, 0, overhead);

    debug_assert!((*arena).requested == 0, "shutdown with unreleased memory");
    debug_assert!(
        list::count(arena, (*arena).active_head) == 0,
        "active allocations at shutdown"
    );
    for head in (*arena).free_heads.iter() {
        debug_assert!(head.is_none(), "sub-allocator pages still carved at shutdown");
    }

    #[cfg(debug_assertions)]
    {
        // Leaks that bypassed the counters still show up as stray bits.
        let mask = page_mask(arena);
        for i in 0..(*arena).mask_words() {
            debug_assert!(mask.add(i as usize).read() == 0, "page bits leaked at shutdown");
        }
    }

    log::debug!("arena down");
}

/// Borrow the reserved debug page. The page sits immediately before the
/// first allocatable page and is scratch space for the [`debug`] routines,
/// so anything stored there may be overwritten by them.
///
/// Asserts (debug) / returns null (release) if the page is already held.
///
/// # Safety
///
/// `arena` must point at an initialized arena.
pub unsafe fn request_dbg_page(arena: *mut Arena) -> *mut u8 {
    debug_assert!((*arena).dbg_page_held == 0, "debug page already in use");
    if (*arena).dbg_page_held != 0 {
        return null_mut();
    }
    (*arena).dbg_page_held = 1;

    let overhead = (*arena).overhead_pages();
    (arena as *mut u8).add(((overhead - 1) * (*arena).page_size) as usize)
}

/// Give the debug page back. Asserts if it was not held.
///
/// # Safety
///
/// `arena` must point at an initialized arena.
pub unsafe fn release_dbg_page(arena: *mut Arena) {
    debug_assert!((*arena).dbg_page_held != 0, "debug page not in use");
    (*arena).dbg_page_held = 0;
}

/// Allocate space for `value` and move it in. Returns null (after dropping
/// `value`) when the arena is exhausted.
///
/// Types aligned beyond [`ARENA_ALIGNMENT`] forward their alignment to the
/// allocator and therefore skip the sub-allocator path.
///
/// # Safety
///
/// `arena` must point at an initialized arena.
#[cfg_attr(feature = "track_location", track_caller)]
pub unsafe fn alloc_obj<T>(arena: *mut Arena, value: T) -> *mut T {
    let alignment = if align_of::<T>() > ARENA_ALIGNMENT as usize {
        align_of::<T>() as u32
    } else {
        0
    };
    let mem = allocate(arena, size_of::<T>() as u32, alignment) as *mut T;
    if !mem.is_null() {
        mem.write(value);
    }
    mem
}

/// Drop the object in place and release its memory.
///
/// # Safety
///
/// `obj` must have come from [`alloc_obj`] on the same arena and must not
/// be used afterwards.
pub unsafe fn free_obj<T>(arena: *mut Arena, obj: *mut T) {
    debug_assert!(!obj.is_null(), "freeing a null object");
    if obj.is_null() {
        return;
    }
    core::ptr::drop_in_place(obj);
    release(arena, obj as *mut u8);
}
