//! A circular, wear-aware, line-oriented log store for NOR-flash-like storage
//!
//! A NOR-flash-like device has three primitives: erased bytes read back as `0xFF`; program
//! operations can only clear bits (`1 -> 0`) within a fixed *program unit* (256 bytes by
//! default); erase operates only on whole *sectors* (4096 bytes by default). This crate layers
//! an append-only, newline-delimited log on top of such a device. Once the device is full the
//! log wraps, discarding the oldest sector of data to make room for new writes.
//!
//! # Working principle
//!
//! There is no on-media header, magic number, or version byte anywhere in the log region: the
//! `head` (next write position) and `tail` (oldest live byte) pointers are reconstructed purely
//! from the pattern of erased (`0xFF`) vs. written bytes on [`Log::init`]. This mirrors how
//! NOR-flash based circular logs are implemented in the wild (see e.g. Apache Mynewt's FCB) and
//! avoids spending a sector on bookkeeping that itself would need wear levelling.
//!
//! Every physical write is "program-unit aligned": unaligned fragments of a record are padded
//! with `0xFF` before being written, which works because writing `0xFF` over already-erased or
//! already-written bytes is a no-op under NOR flash's bit-clear semantics.
//!
//! # Example
//!
//! ```
//! use circular_log::{sim::MemoryFlash, Geometry, Log};
//!
//! let mut flash = MemoryFlash::new(0x2000);
//! let mut work_buf = [0u8; 288];
//! let mut log = Log::new("demo", 0, 0x2000, Geometry::default(), &mut work_buf, &mut flash)
//!     .expect("geometry is valid");
//! log.init().expect("mount succeeds on a fresh device");
//! log.write(b"hello\n");
//!
//! let mut out = [0u8; 16];
//! let mut remaining = 0;
//! let n = log.read_log_partial(&mut out, 0, 6, &mut remaining);
//! assert_eq!(&out[..n as usize], b"hello\n");
//! ```
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(missing_docs)]

pub use circular_log_macros::circular_log;

mod constants;
mod cursor;
mod flash;
mod geometry;
mod index;
mod lock;
mod log;
mod reader;
mod space;
mod status;
mod writer;

#[cfg(any(test, feature = "std"))]
pub mod sim;

pub use crate::constants::{CURSOR_MAGIC, FLASH_ERASED, LINES_READ_ALL, LINE_ESTIMATE_FACTOR};
pub use crate::cursor::{Cursor, Direction, SeekFrom};
pub use crate::flash::Flash;
pub use crate::geometry::Geometry;
pub use crate::index::IndexEntry;
pub use crate::lock::{NullLock, RawLock};
#[cfg(any(test, feature = "std"))]
pub use crate::lock::CountingLock;
pub use crate::log::Log;
pub use crate::space::Position;
pub use crate::status::Status;
