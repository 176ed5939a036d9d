//! The optional per-sector timestamp index (C9): lets [`crate::Log::indexed_log_search`] find an
//! exact timestamp in `O(sectors)` instead of scanning every line.
//!
//! There is no equivalent of this component in the engine this crate is ported from — the header
//! declares `indexedLogSearch`/`buildIndex`/`findFirstLine` but the implementation was never part
//! of the retrieved sources, so this module is built directly from the line-oriented log model
//! the rest of the crate already implements.

use crate::constants::{FLASH_ERASED, INDEX_SENTINEL};
use crate::flash::Flash;
use crate::space::Position;

/// One entry per sector, keyed by that sector's physical/absolute index (`addr / sector_size`)
/// so the slot stays meaningful across wraps and incremental per-write updates, independent of
/// where `tail` happens to sit at any given moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Timestamp of the sector's first line, as returned by the caller's `parse_time`.
    pub time: u32,
    /// Offset of that line's first byte, relative to the start of its own sector.
    pub first_line: u32,
}

impl IndexEntry {
    /// The value every slot starts at: neither field has been observed yet.
    pub const EMPTY: IndexEntry = IndexEntry {
        time: INDEX_SENTINEL,
        first_line: INDEX_SENTINEL,
    };
}

/// Scans one sector-sized window at `logical_offset` (distance from `tail`) for its first line,
/// and asks `parse_time` to turn it into a timestamp.
///
/// Sectors only ever get recycled whole, so the sector a used range's first line falls in always
/// has that line starting exactly at the sector's own boundary — `first_line` is therefore always
/// `0`, the same "offset within the sector" convention the incremental update in
/// [`crate::log::Log`]'s writer uses. Returns `None` if no newline is found in the window (the
/// index entry for that sector is left empty) or if the physical read came up short.
fn find_first_line<F: Flash>(
    flash: &mut F,
    base: u32,
    cap: u32,
    tail: u32,
    head: u32,
    logical_offset: u32,
    space: u32,
    window: &mut [u8],
    parse_time: &mut dyn FnMut(&[u8]) -> Option<u32>,
) -> Option<(u32, u32)> {
    let (n, _) = crate::reader::read_section(
        flash,
        base,
        cap,
        tail,
        head,
        logical_offset,
        space,
        window,
    );
    if n == 0 {
        return None;
    }
    let line = &window[..n as usize];
    let nl = line.iter().position(|&b| b == b'\n')?;
    let time = parse_time(&line[..=nl])?;
    Some((time, 0))
}

/// Rebuilds the index from scratch over every sector wholly contained in the used range.
///
/// Slots are keyed by each sector's physical/absolute index (`(tail / sector_size + s) %
/// sector_count`), the same convention the incremental per-write index update uses, so a slot
/// stays meaningful across wraps rather than being reinterpreted every time `tail` moves.
/// `index` is reset to [`IndexEntry::EMPTY`] everywhere a sector's first line can't be
/// determined (a partial sector, a sector with no line boundary in its window, or a short read).
pub(crate) fn build_index<F: Flash>(
    flash: &mut F,
    base: u32,
    cap: u32,
    pos: Position,
    sector_size: u32,
    work_buf: &mut [u8],
    index: &mut [IndexEntry],
    parse_time: &mut dyn FnMut(&[u8]) -> Option<u32>,
) {
    for slot in index.iter_mut() {
        *slot = IndexEntry::EMPTY;
    }

    let Some((head, tail)) = pos.head_tail() else {
        return;
    };
    let space = crate::space::used_space(pos, cap);
    if space == 0 {
        return;
    }

    let sector_count = (cap / sector_size) as usize;
    let tail_sector = (tail / sector_size) as usize;
    for s in 0..sector_count.min(index.len()) {
        let logical_offset = (s as u32) * sector_size;
        if logical_offset >= space {
            break;
        }
        if let Some((time, first_line)) = find_first_line(
            flash,
            base,
            cap,
            tail,
            head,
            logical_offset,
            space,
            work_buf,
            parse_time,
        ) {
            let phys_sector = (tail_sector + s) % sector_count;
            index[phys_sector] = IndexEntry { time, first_line };
        }
    }
}

/// Finds the logical offset of the line whose parsed timestamp exactly equals `target`.
///
/// Walks sectors in chronological order from `tail` to `head` (handling wrap via each sector's
/// physical index, not the index array's raw order) until the bracketing sector is found (the
/// newest sector whose entry's time is still `<= target`), then scans forward from that sector's
/// first line for an exact match. Returns `None` if the index is empty, `target` predates every
/// indexed sector, or no line from the bracketing sector onward matches exactly.
pub(crate) fn indexed_log_search<F: Flash>(
    flash: &mut F,
    base: u32,
    cap: u32,
    pos: Position,
    sector_size: u32,
    target: u32,
    work_buf: &mut [u8],
    index: &[IndexEntry],
    parse_time: &mut dyn FnMut(&[u8]) -> Option<u32>,
) -> Option<u32> {
    let (head, tail) = pos.head_tail()?;
    let space = crate::space::used_space(pos, cap);
    if space == 0 {
        return None;
    }

    let sector_count = (cap / sector_size) as usize;
    let tail_sector = (tail / sector_size) as usize;

    let mut bracket: Option<(u32, &IndexEntry)> = None;
    for s in 0..sector_count.min(index.len()) {
        let logical_start = (s as u32) * sector_size;
        if logical_start >= space {
            break;
        }
        let phys_sector = (tail_sector + s) % sector_count;
        let entry = &index[phys_sector];
        if entry.time == INDEX_SENTINEL {
            continue;
        }
        if entry.time <= target {
            bracket = Some((logical_start, entry));
        } else {
            break;
        }
    }
    let (sector_logical_start, bracket) = bracket?;

    let mut offset = sector_logical_start + bracket.first_line;
    loop {
        let (n, remaining) =
            crate::reader::read_section(flash, base, cap, tail, head, offset, space, work_buf);
        if n == 0 {
            return None;
        }
        let chunk = &work_buf[..n as usize];
        let mut scan_start = 0usize;
        while let Some(rel_nl) = chunk[scan_start..].iter().position(|&b| b == b'\n') {
            let nl = scan_start + rel_nl;
            let line = &chunk[scan_start..=nl];
            if line.iter().all(|&b| b != FLASH_ERASED) || line.len() > 1 {
                if let Some(time) = parse_time(line) {
                    if time == target {
                        return Some(offset + scan_start as u32);
                    }
                    if time > target {
                        return None;
                    }
                }
            }
            scan_start = nl + 1;
        }
        if scan_start == 0 || remaining == 0 {
            return None;
        }
        offset += scan_start as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::MemoryFlash;

    fn parse_time(line: &[u8]) -> Option<u32> {
        let s = core::str::from_utf8(line.split(|&b| b == b' ').next()?).ok()?;
        s.parse().ok()
    }

    fn write_lines(flash: &mut MemoryFlash, lines: &[&str]) -> (u32, u32) {
        let mut head = 0u32;
        for line in lines {
            let bytes = line.as_bytes();
            flash.write(head, bytes);
            head += bytes.len() as u32;
        }
        (head, 0)
    }

    #[test]
    fn empty_log_has_no_bracket() {
        let mut flash = MemoryFlash::new(0x4000);
        let pos = Position::Pristine;
        let mut work_buf = [0u8; 288];
        let mut index = [IndexEntry::EMPTY; 4];
        build_index(
            &mut flash, 0, 0x4000, pos, 0x1000, &mut work_buf, &mut index, &mut parse_time,
        );
        assert!(index.iter().all(|e| *e == IndexEntry::EMPTY));
        assert_eq!(
            indexed_log_search(
                &mut flash, 0, 0x4000, pos, 0x1000, 100, &mut work_buf, &index, &mut parse_time,
            ),
            None
        );
    }

    #[test]
    fn finds_exact_timestamp_in_bracketing_sector() {
        let mut flash = MemoryFlash::new(0x2000);
        let (head, tail) = write_lines(
            &mut flash,
            &["100 first\n", "200 second\n", "300 third\n"],
        );
        let pos = Position::Live { head, tail };
        let mut work_buf = [0u8; 288];
        let mut index = [IndexEntry::EMPTY; 2];
        build_index(
            &mut flash, 0, 0x2000, pos, 0x1000, &mut work_buf, &mut index, &mut parse_time,
        );
        assert_eq!(index[0].time, 100);

        let found = indexed_log_search(
            &mut flash, 0, 0x2000, pos, 0x1000, 200, &mut work_buf, &index, &mut parse_time,
        );
        assert_eq!(found, Some(10));
    }

    #[test]
    fn missing_timestamp_returns_none() {
        let mut flash = MemoryFlash::new(0x2000);
        let (head, tail) = write_lines(&mut flash, &["100 first\n", "300 third\n"]);
        let pos = Position::Live { head, tail };
        let mut work_buf = [0u8; 288];
        let mut index = [IndexEntry::EMPTY; 2];
        build_index(
            &mut flash, 0, 0x2000, pos, 0x1000, &mut work_buf, &mut index, &mut parse_time,
        );
        let found = indexed_log_search(
            &mut flash, 0, 0x2000, pos, 0x1000, 250, &mut work_buf, &index, &mut parse_time,
        );
        assert_eq!(found, None);
    }

    #[test]
    fn finds_timestamp_after_wrap_with_nonzero_tail() {
        // tail sits at the start of the second sector, not sector 0 — exercises the
        // physical-sector slot keying and the tail-to-head chronological walk directly.
        let mut flash = MemoryFlash::new(0x3000); // 3 sectors
        let tail = 0x1000;
        flash.write(tail, b"400 fourth\n");
        flash.write(tail + 11, b"500 fifth\n");
        let head = tail + 11 + 10;
        let pos = Position::Live { head, tail };
        let mut work_buf = [0u8; 288];
        let mut index = [IndexEntry::EMPTY; 3];
        build_index(
            &mut flash, 0, 0x3000, pos, 0x1000, &mut work_buf, &mut index, &mut parse_time,
        );
        // The sector containing `tail` (physical sector 1) holds the entry, not index[0].
        assert_eq!(index[1].time, 400);
        assert_eq!(index[0], IndexEntry::EMPTY);
        assert_eq!(index[2], IndexEntry::EMPTY);

        let found = indexed_log_search(
            &mut flash, 0, 0x3000, pos, 0x1000, 500, &mut work_buf, &index, &mut parse_time,
        );
        assert_eq!(found, Some(11));
    }
}
