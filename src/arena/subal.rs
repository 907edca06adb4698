//! Fixed-block sub-allocators: one LIFO free list per block-size class.
//!
//! A class lazily reserves a single page, chops it into uniform blocks of
//! the class size and threads a zeroed allocation header through every
//! block. Headers are laid out at a constant stride, so no extra tracking
//! is needed; walking the page visits every block. A page belongs to
//! exactly one class until its last block is released, at which point the
//! whole page goes back to the bitmap.

use core::mem::size_of;
use core::ptr::{addr_of_mut, null_mut};

use crate::util::mem::set;

use super::{bitmap, list, AllocSite, Allocation, Arena, BLOCK_CLASSES};

/// Serve `bytes` from the free list of `class`, carving a fresh page first
/// if the list is empty. Returns the payload pointer, or null if no page
/// could be reserved (the caller owns the accounting rollback).
pub(crate) unsafe fn sub_allocate(
    arena: *mut Arena,
    bytes: u32,
    class: usize,
    site: AllocSite,
) -> *mut u8 {
    let block_size = BLOCK_CLASSES[class];
    let page_size = (*arena).page_size;
    debug_assert!(block_size < page_size, "block size must be smaller than a page");

    let head = addr_of_mut!((*arena).free_heads[class]);
    let grabbed_page = (*head).is_none();
    if grabbed_page {
        // Reserve one page and carve it up into blocks.
        #[cfg(feature = "scan_cursor")]
        let page = bitmap::find_range(arena, 1, (*arena).scan_bit);
        #[cfg(not(feature = "scan_cursor"))]
        let page = bitmap::find_range(arena, 1, 0);
        if page == 0 {
            return null_mut();
        }
        bitmap::set_range(arena, page, 1);

        let mem = (arena as *mut u8).add((page * page_size) as usize);
        set(mem, 0, page_size);

        let blocks = page_size / block_size;
        debug_assert!(blocks >= 1, "class does not fit its page");
        debug_assert!(blocks < 128, "page size too large for this class");

        // The zero fill above already put every header into its free state;
        // thread them onto the class list.
        for i in 0..blocks {
            let block = mem.add((i * block_size) as usize) as *mut Allocation;
            list::push_head(arena, head, block);
        }
    }
    debug_assert!(!(*head).is_none());

    let block = (*head).resolve(arena);
    list::remove(arena, head, block);

    let payload = (block as *mut u8).add(size_of::<Allocation>());
    #[cfg(feature = "clear_on_alloc")]
    set(payload, 0, block_size - size_of::<Allocation>() as u32);
    #[cfg(all(feature = "debug_fill", not(feature = "clear_on_alloc")))]
    {
        const FILL: &[u8] = b"-MEMORY";
        let usable = block_size as usize - size_of::<Allocation>();
        let mut i = bytes as usize;
        while i < usable {
            payload.add(i).write(FILL[(i - bytes as usize) % FILL.len()]);
            i += 1;
        }
    }

    (*block).size = bytes;
    (*block).alignment = 0;
    (*block).set_location(site);
    list::push_head(arena, addr_of_mut!((*arena).active_head), block);

    if let Some(hook) = (*arena).allocate_hook() {
        let first_page = (block as usize - arena as usize) as u32 / page_size;
        // num_pages doubles as a flag on this path: 1 if a fresh page was
        // carved for the class, 0 if the block came off the free list.
        hook(arena, block, bytes, block_size, first_page, grabbed_page as u32);
    }

    payload
}

/// Return `header` to the free list of `class`. When that leaves every
/// block of the containing page free, the page itself is released back to
/// the bitmap.
pub(crate) unsafe fn sub_release(arena: *mut Arena, header: *mut Allocation, class: usize) {
    let block_size = BLOCK_CLASSES[class];
    let page_size = (*arena).page_size;

    debug_assert!((*header).size != 0, "double free");
    if (*header).size == 0 {
        return;
    }
    let old_size = (*header).size;
    (*header).size = 0;

    list::remove(arena, addr_of_mut!((*arena).active_head), header);
    let head = addr_of_mut!((*arena).free_heads[class]);
    list::push_head(arena, head, header);

    let start_page = ((header as usize - arena as usize) / page_size as usize) as u32;
    let page_mem = (arena as *mut u8).add((start_page * page_size) as usize);
    let blocks = page_size / block_size;
    debug_assert!(blocks >= 1);

    let mut release_page = true;
    for i in 0..blocks {
        let block = page_mem.add((i * block_size) as usize) as *mut Allocation;
        if (*block).size > 0 {
            release_page = false;
            break;
        }
    }

    if release_page {
        // Unlink every block of the page. Walking the page beats walking
        // the free list; the blocks sit side by side.
        for i in 0..blocks {
            let block = page_mem.add((i * block_size) as usize) as *mut Allocation;
            list::remove(arena, head, block);
        }

        debug_assert!(start_page > 0, "sub-allocator block inside the overhead pages");
        bitmap::clear_range(arena, start_page, 1);
    }

    if let Some(hook) = (*arena).release_hook() {
        // Same overload as on allocate: 1 if this release freed the page.
        hook(arena, header, old_size, block_size, start_page, release_page as u32);
    }
}
