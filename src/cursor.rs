//! Cursor-based ordered reads (C7): a cursor snapshots `(head, tail)` at open time and then walks
//! forward or backward over that frozen view, independent of concurrent writes.

use crate::constants::{CURSOR_MAGIC, SEARCH_BUFF_SIZE};
use crate::flash::Flash;
use crate::reader::read_section;
use crate::space::{erased_space, used_space, Position};
use crate::status::Status;

/// Which end of the log a [`Cursor`] was opened against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    /// Start at the oldest live line and read forward.
    Oldest,
    /// Start at the newest live line and read backward.
    Newest,
}

/// The direction a cursor walks in, fixed for its whole lifetime once opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Lines are produced oldest-first.
    Forward,
    /// Lines are produced newest-first.
    Reverse,
}

/// A frozen view over a log's used range, opened with [`crate::Log::file_open`].
///
/// The snapshot is taken once, at open time: lines written after that point are invisible to
/// this cursor even if they'd otherwise be within the live range, and lines it has already
/// walked past remain visible even if the log wraps and reclaims them physically (reads simply
/// start failing once the physical bytes are gone, surfaced as a short read).
pub struct Cursor {
    magic: u32,
    snap_head: u32,
    snap_tail: u32,
    space: u32,
    direction: Direction,
    /// Logical offset of the next line to read, measured from `snap_tail`.
    seek: u32,
    work_buf: [u8; SEARCH_BUFF_SIZE],
}

impl Cursor {
    /// Snapshots `(head, tail)` and opens a cursor reading from `from`.
    ///
    /// To avoid pointing into a sector the append engine is about to recycle, `snap_tail` is
    /// advanced by one sector when fewer than 2.5 sectors of erased space remain ahead of `head`
    /// at open time. For [`SeekFrom::Oldest`], the first [`SEARCH_BUFF_SIZE`] bytes of the
    /// (possibly advanced) snapshot are scanned for the first `\n`, and reading starts just past
    /// it, so a partial leading line left over from a just-recycled sector is never surfaced.
    pub(crate) fn open<F: Flash>(
        flash: &mut F,
        base: u32,
        cap: u32,
        sector_size: u32,
        pos: Position,
        from: SeekFrom,
    ) -> Result<Cursor, Status> {
        let (head, tail) = pos.head_tail().ok_or(Status::Init)?;

        let mut snap_tail = tail;
        if 2 * erased_space(pos, cap) < 5 * sector_size {
            snap_tail = (tail + sector_size) % cap;
        }
        let adjusted = if head == snap_tail {
            Position::Pristine
        } else {
            Position::Live {
                head,
                tail: snap_tail,
            }
        };
        let space = used_space(adjusted, cap);

        let mut cursor = Cursor {
            magic: CURSOR_MAGIC,
            snap_head: head,
            snap_tail,
            space,
            direction: Direction::Forward,
            seek: 0,
            work_buf: [0u8; SEARCH_BUFF_SIZE],
        };

        let (direction, seek) = match from {
            SeekFrom::Newest => (Direction::Reverse, space),
            SeekFrom::Oldest => {
                let want = core::cmp::min(SEARCH_BUFF_SIZE as u32, space) as usize;
                let seek = if want == 0 {
                    0
                } else {
                    let (n, _) = read_section(
                        flash,
                        base,
                        cap,
                        snap_tail,
                        head,
                        0,
                        space,
                        &mut cursor.work_buf[..want],
                    );
                    match cursor.work_buf[..n as usize].iter().position(|&b| b == b'\n') {
                        Some(i) => (i + 1) as u32,
                        None => 0,
                    }
                };
                (Direction::Forward, seek)
            }
        };
        cursor.direction = direction;
        cursor.seek = seek;
        Ok(cursor)
    }

    fn check_magic(&self) -> Result<(), Status> {
        if self.magic == CURSOR_MAGIC {
            Ok(())
        } else {
            Err(Status::Api)
        }
    }

    /// Which way this cursor walks.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Reads up to `max_lines` lines (or all remaining lines, if `max_lines` is
    /// [`crate::LINES_READ_ALL`]) into `out`, optionally keeping only lines starting with
    /// `prefix`.
    ///
    /// Returns the number of bytes written to `out`. Both directions apply `prefix` as the same
    /// line-start filter, via byte comparison — only the direction of traversal differs.
    pub fn read<F: Flash>(
        &mut self,
        flash: &mut F,
        base: u32,
        cap: u32,
        max_lines: i32,
        prefix: Option<&[u8]>,
        out: &mut [u8],
    ) -> u32 {
        if self.check_magic().is_err() {
            return 0;
        }
        match self.direction {
            Direction::Forward => self.read_forward(flash, base, cap, max_lines, prefix, out),
            Direction::Reverse => self.read_back(flash, base, cap, max_lines, prefix, out),
        }
    }

    fn read_forward<F: Flash>(
        &mut self,
        flash: &mut F,
        base: u32,
        cap: u32,
        max_lines: i32,
        prefix: Option<&[u8]>,
        out: &mut [u8],
    ) -> u32 {
        let mut written = 0usize;
        let mut lines_done = 0i32;

        while self.seek < self.space && written < out.len() {
            if max_lines >= 0 && lines_done >= max_lines {
                break;
            }
            let want = core::cmp::min(self.work_buf.len(), (self.space - self.seek) as usize);
            if want == 0 {
                break;
            }
            let mut window = [0u8; SEARCH_BUFF_SIZE];
            let (n, _) = read_section(
                flash,
                base,
                cap,
                self.snap_tail,
                self.snap_head,
                self.seek,
                self.space,
                &mut window[..want],
            );
            if n == 0 {
                break;
            }
            let chunk = &window[..n as usize];
            let nl = match chunk.iter().position(|&b| b == b'\n') {
                Some(i) => i,
                None => break,
            };
            let line = &chunk[..=nl];
            self.seek += line.len() as u32;

            let keep = match prefix {
                Some(p) => line.starts_with(p),
                None => true,
            };
            if keep {
                let take = core::cmp::min(line.len(), out.len() - written);
                out[written..written + take].copy_from_slice(&line[..take]);
                written += take;
                lines_done += 1;
            }
        }
        written as u32
    }

    fn read_back<F: Flash>(
        &mut self,
        flash: &mut F,
        base: u32,
        cap: u32,
        max_lines: i32,
        prefix: Option<&[u8]>,
        out: &mut [u8],
    ) -> u32 {
        let mut written = 0usize;
        let mut lines_done = 0i32;

        while self.seek > 0 && written < out.len() {
            if max_lines >= 0 && lines_done >= max_lines {
                break;
            }
            let window_len = core::cmp::min(self.work_buf.len(), self.seek as usize);
            let window_start = self.seek - window_len as u32;
            let mut window = [0u8; SEARCH_BUFF_SIZE];
            let (n, _) = read_section(
                flash,
                base,
                cap,
                self.snap_tail,
                self.snap_head,
                window_start,
                self.space,
                &mut window[..window_len],
            );
            if n == 0 {
                break;
            }
            let chunk = &window[..n as usize];

            // Find the last newline strictly before the end of the window other than the final
            // byte (the line we're currently positioned at), to locate the previous line's start.
            let search_end = chunk.len().saturating_sub(1);
            let prev_nl = chunk[..search_end].iter().rposition(|&b| b == b'\n');
            let line_start_rel = match prev_nl {
                Some(i) => i + 1,
                None if window_start == 0 => 0,
                None => break, // no newline in this window and more data precedes it: stop
            };
            let line = &chunk[line_start_rel..];
            self.seek = window_start + line_start_rel as u32;

            let keep = match prefix {
                Some(p) => line.starts_with(p),
                None => true,
            };
            if keep {
                let take = core::cmp::min(line.len(), out.len() - written);
                out[written..written + take].copy_from_slice(&line[..take]);
                written += take;
                lines_done += 1;
            }
        }
        written as u32
    }
}

pub(crate) fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return needle.is_empty();
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}
