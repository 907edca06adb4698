//! Page-tracked arena allocator for games, embedded targets and WebAssembly.
//!
//! The allocator manages a single caller-supplied contiguous byte region and
//! keeps **all** of its bookkeeping inside that region: a header at offset 0,
//! a page bitmap right behind it, and one reserved debug page. There are no
//! hidden allocations and no calls into the host after [`initialize`].
//!
//! Memory is tracked at page granularity (4 KiB by default). Small unaligned
//! requests are served from fixed-block free lists carved out of whole pages;
//! everything else goes through a bitmap search for a contiguous page run.
//! Every outstanding allocation is threaded onto a doubly linked list through
//! 32-bit intra-arena offsets, so a quiescent arena can be moved or mapped
//! elsewhere bit for bit.
//!
//! ```
//! let mut backing = vec![0u64; (10 * 4096) / 8];
//! let size = (backing.len() * 8) as u32;
//! unsafe {
//!     let arena = marena::initialize(backing.as_mut_ptr() as *mut u8, size, 4096);
//!     assert!(!arena.is_null());
//!
//!     let mem = marena::allocate(arena, 128, 0);
//!     assert!(!mem.is_null());
//!     marena::release(arena, mem);
//!
//!     marena::shutdown(arena);
//! }
//! ```
//!
//! The caller owns the backing storage and may reclaim it after [`shutdown`].
//! A buffer of unknown alignment or ragged size can be adapted first with
//! [`align_and_trim`].
//!
//! Nothing here is thread safe. Each arena must be driven from one thread at
//! a time; independent arenas are independent.

#![cfg_attr(not(test), no_std)]

pub mod arena;
pub mod util;

pub use arena::debug;
pub use arena::{
    align_and_trim, alloc_obj, allocate, free_obj, initialize, is_page_in_use, release,
    release_dbg_page, request_dbg_page, shutdown, Allocation, Arena, Hook, ARENA_ALIGNMENT,
    BLOCK_CLASSES, DEFAULT_PAGE_SIZE, MIN_PAGES, TRACKING_UNIT,
};
pub use util::mem::{copy, set};
