//! Intrusive doubly linked lists threaded through 32-bit arena offsets.
//!
//! Every [`Allocation`] header carries a `prev`/`next` pair of [`Offset32`]
//! links and sits on exactly one list at a time: the active list while the
//! block is live, or one class free list while it is not. Offsets are
//! relative to the arena base instead of machine pointers, which keeps the
//! layout identical on 32 and 64 bit targets and lets a quiescent arena be
//! relocated bit for bit. Offset 0 is the arena header itself and can never
//! be a list node, so 0 doubles as the null sentinel.
//!
//! [`Allocation`]: super::Allocation
//! [`Offset32`]: self::Offset32

use core::ptr::null_mut;

use super::{Allocation, Arena};

/// Arena-relative byte offset. The all-zero value means "none", which caps
/// a single arena at 4 GiB.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Offset32(u32);

impl Offset32 {
    pub const NONE: Offset32 = Offset32(0);

    #[inline(always)]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[inline(always)]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Turn the offset back into a header pointer. `NONE` resolves to null.
    #[inline(always)]
    pub(crate) unsafe fn resolve(self, arena: *mut Arena) -> *mut Allocation {
        if self.0 == 0 {
            null_mut()
        } else {
            (arena as *mut u8).add(self.0 as usize) as *mut Allocation
        }
    }

    /// Offset of `node` from the arena base.
    #[inline(always)]
    pub(crate) unsafe fn of(arena: *mut Arena, node: *const Allocation) -> Offset32 {
        debug_assert!(node as usize > arena as usize, "node must live inside the arena");
        Offset32((node as usize - arena as usize) as u32)
    }
}

/// Insert `node` at the head of the list rooted at `head`.
pub(crate) unsafe fn push_head(arena: *mut Arena, head: *mut Offset32, node: *mut Allocation) {
    let node_off = Offset32::of(arena, node);
    let old_head = *head;

    (*node).prev = Offset32::NONE;
    (*node).next = old_head;
    if !old_head.is_none() {
        (*old_head.resolve(arena)).prev = node_off;
    }
    *head = node_off;
}

/// Unlink `node` from the list rooted at `head` and clear its links.
pub(crate) unsafe fn remove(arena: *mut Arena, head: *mut Offset32, node: *mut Allocation) {
    let node_off = Offset32::of(arena, node);

    if *head == node_off {
        let next = (*node).next;
        if !next.is_none() {
            let next_node = next.resolve(arena);
            debug_assert!((*next_node).prev == node_off, "list head link is corrupt");
            (*next_node).prev = Offset32::NONE;
        }
        *head = next;
    } else {
        if !(*node).next.is_none() {
            let next_node = (*node).next.resolve(arena);
            debug_assert!((*next_node).prev == node_off, "list next link is corrupt");
            (*next_node).prev = (*node).prev;
        }
        if !(*node).prev.is_none() {
            let prev_node = (*node).prev.resolve(arena);
            debug_assert!((*prev_node).next == node_off, "list prev link is corrupt");
            (*prev_node).next = (*node).next;
        }
    }

    (*node).prev = Offset32::NONE;
    (*node).next = Offset32::NONE;
}

/// Number of nodes reachable from `head`.
pub(crate) unsafe fn count(arena: *mut Arena, head: Offset32) -> u32 {
    let mut num = 0u32;
    let mut iter = head.resolve(arena);
    while !iter.is_null() {
        num += 1;
        iter = (*iter).next.resolve(arena);
    }
    num
}
