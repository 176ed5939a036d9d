//! The program-unit writer (C3): "insertable writes" that exploit the unchanged-if-all-ones
//! property of NOR flash.
//!
//! Padding an unaligned fragment of a physical write with `0xFF` is safe only because erased
//! bytes already read as `0xFF` and a program operation can only clear bits — writing `0xFF`
//! over them changes nothing. Invariant W guarantees the bytes this module pads over are either
//! erased or were themselves padded with `0xFF` by a previous call.

use crate::constants::FLASH_ERASED;
use crate::flash::Flash;

/// Writes `buf` starting at logical offset `addr` within a `cap`-byte ring, padding any unaligned
/// program-unit fragments with `0xFF` and wrapping physical addresses modulo `cap` once the
/// fragment crosses the end of the region.
///
/// Every physical [`Flash::write`] call issued by this function has an address and length that
/// are multiples of `program_unit` (Invariant U). Returns `buf.len()` on success, `0` on the
/// first short write. `cap` must be a multiple of `program_unit`, which [`crate::Geometry`] and
/// [`crate::Log::new`] already guarantee transitively through `sector_size`.
pub(crate) fn insert_write<F: Flash>(
    flash: &mut F,
    work_buf: &mut [u8],
    program_unit: u32,
    cap: u32,
    addr: u32,
    buf: &[u8],
) -> u32 {
    let len = buf.len() as u32;
    if len == 0 {
        return 0;
    }

    let rem = addr % program_unit;
    let begin = addr - rem;
    let end = rem + len;
    let write_len = if end % program_unit == 0 {
        end
    } else {
        end / program_unit * program_unit + program_unit
    };

    if write_len as usize <= work_buf.len() {
        let wl = write_len as usize;
        let scratch = &mut work_buf[..wl];
        scratch.fill(FLASH_ERASED);
        scratch[rem as usize..rem as usize + buf.len()].copy_from_slice(buf);
        let res = write_wrapped(flash, cap, begin, scratch);
        return if res == write_len { len } else { 0 };
    }

    // Streaming path: compose one program unit at a time.
    let pu = program_unit as usize;
    let mut begin = begin;
    let mut remaining = buf;

    if rem != 0 {
        let first = pu - rem as usize;
        let unit = &mut work_buf[..pu];
        unit.fill(FLASH_ERASED);
        unit[rem as usize..pu].copy_from_slice(&remaining[..first]);
        if write_wrapped(flash, cap, begin, unit) != program_unit {
            return 0;
        }
        remaining = &remaining[first..];
        begin = (begin + program_unit) % cap;
    }

    while !remaining.is_empty() {
        let n = core::cmp::min(pu, remaining.len());
        let unit = &mut work_buf[..pu];
        unit.fill(FLASH_ERASED);
        unit[..n].copy_from_slice(&remaining[..n]);
        if write_wrapped(flash, cap, begin, unit) != program_unit {
            return 0;
        }
        remaining = &remaining[n..];
        begin = (begin + program_unit) % cap;
    }

    len
}

/// Issues a single program-unit-aligned write, splitting it in two if `[begin, begin + buf.len())`
/// crosses the end of the `cap`-byte region. Returns the total byte count written by both halves
/// on success, or the short count from whichever half failed first.
fn write_wrapped<F: Flash>(flash: &mut F, cap: u32, begin: u32, buf: &[u8]) -> u32 {
    let begin = begin % cap;
    let len = buf.len() as u32;
    if begin + len <= cap {
        return flash.write(begin, buf);
    }
    let first_len = (cap - begin) as usize;
    let first = flash.write(begin, &buf[..first_len]);
    if first != first_len as u32 {
        return first;
    }
    let second = flash.write(0, &buf[first_len..]);
    if second != len - first_len as u32 {
        return first + second;
    }
    len
}
