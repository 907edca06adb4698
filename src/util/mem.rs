//! Freestanding bulk memory routines.
//!
//! The arena is built for environments where the C runtime is not linked
//! (no-CRT Windows builds, bare WebAssembly), so it cannot lean on `memcpy`
//! or `memset`. Both routines probe operand alignment first: on word-aligned
//! input they loop over the machine word, then fall through 32-bit, 16-bit
//! and 8-bit stores for the tail. Misaligned input falls back to a plain
//! byte loop.

use core::mem::size_of;
use core::ptr::null_mut;

const WORD: usize = size_of::<usize>();

/// Splat a byte value across a machine word.
#[inline(always)]
const fn splat(value: u8) -> usize {
    let mut word = value as usize;
    word |= word << 8;
    word |= word << 16;
    #[cfg(target_pointer_width = "64")]
    {
        word |= word << 32;
    }
    word
}

/// Fill `size` bytes at `memory` with `value`. Returns `memory`.
///
/// # Safety
///
/// `memory` must be valid for writes of `size` bytes. A null `memory` is
/// tolerated and returns null.
pub unsafe fn set(memory: *mut u8, value: u8, size: u32) -> *mut u8 {
    if memory.is_null() {
        return null_mut(); // Can't set null
    }

    let size = size as usize;
    if size <= WORD {
        let mut i = 0usize;
        while i < size {
            memory.add(i).write(value);
            i += 1;
        }
        return memory;
    }

    // Byte head up to the next word boundary; it is < WORD and the size
    // check above guarantees it fits.
    let mut mem = memory;
    let mut left = size;
    let head = (WORD - (memory as usize % WORD)) % WORD;
    let mut i = 0usize;
    while i < head {
        mem.write(value);
        mem = mem.add(1);
        i += 1;
    }
    left -= head;

    let word = splat(value);
    let mut ptr_w = mem as *mut usize;
    let words = left / WORD;
    for _ in 0..words {
        ptr_w.write(word);
        ptr_w = ptr_w.add(1);
    }
    let mut rem = left - words * WORD;

    let mut ptr_32 = ptr_w as *mut u32;
    let count = rem / size_of::<u32>();
    for _ in 0..count {
        ptr_32.write(word as u32);
        ptr_32 = ptr_32.add(1);
    }
    rem -= count * size_of::<u32>();

    let mut ptr_16 = ptr_32 as *mut u16;
    let count = rem / size_of::<u16>();
    for _ in 0..count {
        ptr_16.write(word as u16);
        ptr_16 = ptr_16.add(1);
    }
    rem -= count * size_of::<u16>();

    let mut ptr_8 = ptr_16 as *mut u8;
    for _ in 0..rem {
        ptr_8.write(value);
        ptr_8 = ptr_8.add(1);
    }

    memory
}

/// Copy `size` bytes from `source` to `dest`. The regions must not overlap.
///
/// # Safety
///
/// `dest` must be valid for writes and `source` for reads of `size` bytes.
pub unsafe fn copy(dest: *mut u8, source: *const u8, size: u32) {
    let size = size as usize;

    if dest as usize % WORD != 0 || source as usize % WORD != 0 {
        // One of the operands is off the word grid, fall back on slow copy.
        let mut i = 0usize;
        while i < size {
            dest.add(i).write(source.add(i).read());
            i += 1;
        }
        return;
    }

    let mut dst_w = dest as *mut usize;
    let mut src_w = source as *const usize;
    let words = size / WORD;
    for _ in 0..words {
        dst_w.write(src_w.read());
        dst_w = dst_w.add(1);
        src_w = src_w.add(1);
    }
    let mut rem = size - words * WORD;

    let mut dst_32 = dst_w as *mut u32;
    let mut src_32 = src_w as *const u32;
    let count = rem / size_of::<u32>();
    for _ in 0..count {
        dst_32.write(src_32.read());
        dst_32 = dst_32.add(1);
        src_32 = src_32.add(1);
    }
    rem -= count * size_of::<u32>();

    let mut dst_16 = dst_32 as *mut u16;
    let mut src_16 = src_32 as *const u16;
    let count = rem / size_of::<u16>();
    for _ in 0..count {
        dst_16.write(src_16.read());
        dst_16 = dst_16.add(1);
        src_16 = src_16.add(1);
    }
    rem -= count * size_of::<u16>();

    let mut dst_8 = dst_16 as *mut u8;
    let mut src_8 = src_16 as *const u8;
    for _ in 0..rem {
        dst_8.write(src_8.read());
        dst_8 = dst_8.add(1);
        src_8 = src_8.add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_fills_every_byte() {
        let mut buf = [0u8; 200];
        unsafe {
            set(buf.as_mut_ptr(), 0xab, 200);
        }
        assert!(buf.iter().all(|&b| b == 0xab));
    }

    #[test]
    fn set_respects_bounds() {
        let mut buf = [0u8; 64];
        unsafe {
            // Misaligned start, ragged length: neighbors must survive.
            set(buf.as_mut_ptr().add(3), 0x5a, 41);
        }
        assert!(buf[..3].iter().all(|&b| b == 0));
        assert!(buf[3..44].iter().all(|&b| b == 0x5a));
        assert!(buf[44..].iter().all(|&b| b == 0));
    }

    #[test]
    fn set_short_runs() {
        for len in 0..9u32 {
            let mut buf = [0u8; 16];
            unsafe {
                set(buf.as_mut_ptr(), 7, len);
            }
            assert!(buf[..len as usize].iter().all(|&b| b == 7));
            assert!(buf[len as usize..].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn set_null_is_a_no_op() {
        unsafe {
            assert!(set(core::ptr::null_mut(), 1, 16).is_null());
        }
    }

    #[test]
    fn copy_aligned() {
        let src: Vec<u8> = (0..=255).collect();
        let mut dst = vec![0u8; 256];
        unsafe {
            copy(dst.as_mut_ptr(), src.as_ptr(), 256);
        }
        assert_eq!(src, dst);
    }

    #[test]
    fn copy_misaligned_and_ragged() {
        let src: Vec<u8> = (0..100).map(|i| i as u8).collect();
        let mut dst = vec![0u8; 128];
        unsafe {
            copy(dst.as_mut_ptr().add(1), src.as_ptr().add(3), 93);
        }
        assert_eq!(&dst[1..94], &src[3..96]);
        assert_eq!(dst[0], 0);
        assert_eq!(dst[94], 0);
    }
}
