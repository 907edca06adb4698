//! Debug surface: allocator state report, raw page dumps and per-allocation
//! lines, all streamed through a caller callback.
//!
//! The report routines borrow the reserved debug page as their scratch
//! buffer and hand it to the callback chunk by chunk as it fills up, so
//! they work without any allocation of their own. The callback runs inside
//! the allocator's call frame and **must not** reenter the allocator; the
//! debug-page flag turns a reentrant `mem_info` into an assert.

use core::fmt::{self, Write};
use core::mem::size_of;

use crate::util::bit;

use super::{page_mask, release_dbg_page, request_dbg_page, Allocation, Arena};

/// Sink for streamed report data: `(bytes, length, userdata)`.
pub type WriteCallback = fn(bytes: *const u8, len: u32, userdata: *mut ());

/// `fmt::Write` adapter over the debug page. Flushes the buffer to the
/// callback whenever it runs full.
struct ChunkWriter {
    buf: *mut u8,
    cap: usize,
    len: usize,
    callback: WriteCallback,
    userdata: *mut (),
}

impl ChunkWriter {
    fn flush(&mut self) {
        if self.len > 0 {
            (self.callback)(self.buf, self.len as u32, self.userdata);
            self.len = 0;
        }
    }

    fn push(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            if self.len == self.cap {
                self.flush();
            }
            let room = self.cap - self.len;
            let take = if bytes.len() < room { bytes.len() } else { room };
            unsafe {
                crate::util::mem::copy(self.buf.add(self.len), bytes.as_ptr(), take as u32);
            }
            self.len += take;
            bytes = &bytes[take..];
        }
    }
}

impl Write for ChunkWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push(s.as_bytes());
        Ok(())
    }
}

/// One report line for a single allocation header.
unsafe fn write_allocation_line(w: &mut ChunkWriter, arena: *mut Arena, header: *mut Allocation) {
    let offset = header as usize - arena as usize;
    let _ = write!(
        w,
        "\t{}, size: {}, padded: {}, alignment: {}, first page: {}, prev: {}, next: {}",
        offset,
        (*header).size,
        (*header).padded_size(),
        (*header).alignment,
        offset as u32 / (*arena).page_size,
        (*header).prev.get(),
        (*header).next.get(),
    );

    #[cfg(feature = "track_location")]
    match (*header).location {
        Some(location) => {
            let _ = write!(w, ", location: {}:{}", location.file(), location.line());
        }
        None => {
            let _ = w.write_str(", location: null");
        }
    }
    #[cfg(not(feature = "track_location"))]
    let _ = w.write_str(", location: null");

    let _ = w.write_str("\n");
}

/// Compose a human-readable report of the allocator state and stream it to
/// `callback`: tracking totals, the page breakdown, one line per active
/// allocation and an 80-column chart of the page bitmap (`0` = used,
/// `-` = free).
///
/// # Safety
///
/// `arena` must point at an initialized arena. `callback` must not touch
/// the arena.
pub unsafe fn mem_info(arena: *mut Arena, callback: WriteCallback, userdata: *mut ()) {
    let page = request_dbg_page(arena);
    if page.is_null() {
        return;
    }
    let page_size = (*arena).page_size;

    let mut w = ChunkWriter {
        buf: page,
        cap: page_size as usize,
        len: 0,
        callback,
        userdata,
    };

    let total_pages = (*arena).total_pages();
    let kib = (*arena).size / 1024;
    let _ = write!(
        w,
        "Tracking {} pages, Page size: {} bytes\nTotal memory size: {} KiB ({} MiB)\n",
        total_pages,
        page_size,
        kib,
        kib / 1024,
    );

    let overhead = (*arena).overhead_pages();
    let used = (*arena).pages_in_use - overhead;
    let free = total_pages - (*arena).pages_in_use;
    let _ = write!(
        w,
        "Page state: {} free, {} used, {} overhead\nRequested: {} bytes, Served: {} bytes\n",
        free,
        used,
        overhead,
        (*arena).requested,
        (*arena).served_bytes(),
    );
    w.flush();

    let _ = w.write_str("\nActive allocations:\n");
    let mut iter = (*arena).active_head.resolve(arena);
    while !iter.is_null() {
        write_allocation_line(&mut w, arena, iter);
        iter = (*iter).next.resolve(arena);
    }
    w.flush();

    let _ = w.write_str("\nPage chart:\n\t");
    let mask = page_mask(arena);
    for i in 0..total_pages {
        let glyph = if bit::test_bit(mask, i) { "0" } else { "-" };
        let _ = w.write_str(glyph);
        if (i + 1) % 80 == 0 {
            let _ = w.write_str("\n\t");
        }
    }
    let _ = w.write_str("\n");
    w.flush();

    release_dbg_page(arena);
}

/// Stream the report line of a single live allocation, given its payload
/// pointer.
///
/// # Safety
///
/// `arena` must point at an initialized arena and `memory` at a live
/// payload inside it. `callback` must not touch the arena.
pub unsafe fn allocation_info(
    arena: *mut Arena,
    memory: *const u8,
    callback: WriteCallback,
    userdata: *mut (),
) {
    let page = request_dbg_page(arena);
    if page.is_null() {
        return;
    }

    let mut w = ChunkWriter {
        buf: page,
        cap: (*arena).page_size as usize,
        len: 0,
        callback,
        userdata,
    };

    let header = memory.sub(size_of::<Allocation>()) as *mut Allocation;
    write_allocation_line(&mut w, arena, header);
    w.flush();

    release_dbg_page(arena);
}

/// Stream the raw binary content of a page in four chunks.
///
/// # Safety
///
/// `arena` must point at an initialized arena and `page` must be a valid
/// page index.
pub unsafe fn page_content(arena: *mut Arena, page: u32, callback: WriteCallback, userdata: *mut ()) {
    debug_assert!(page < (*arena).total_pages(), "page index out of range");
    let page_size = (*arena).page_size;
    let chunk = page_size / 4;

    let mut mem = (arena as *mut u8).add((page * page_size) as usize);
    for _ in 0..3 {
        callback(mem, chunk, userdata);
        mem = mem.add(chunk as usize);
    }
    // The page size is not necessarily a multiple of 4; the last chunk
    // absorbs the remainder.
    callback(mem, page_size - chunk * 3, userdata);
}
