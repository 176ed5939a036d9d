//! Compile-time tunables from the on-media format, see `circularFlashConfig.h` in the original
//! engine this crate is a port of.

/// The byte value flash reads back as after an erase. All bits set.
pub const FLASH_ERASED: u8 = 0xFF;

/// Default average line length used by [`crate::Log::read_lines`] to size its tail window when
/// the caller does not supply an estimate.
pub const LINE_ESTIMATE_FACTOR: u32 = 64;

/// Size of the scratch buffer carried inline in every [`crate::Cursor`].
pub const SEARCH_BUFF_SIZE: usize = 1024;

/// Sentinel passed to [`crate::Log::file_read`] meaning "read every remaining line".
pub const LINES_READ_ALL: i32 = -1;

/// Magic value stamped into a [`crate::Cursor`] on open and checked on every read.
pub const CURSOR_MAGIC: u32 = 0xA1B2_C3D4;

/// Sentinel value used in both fields of an empty [`crate::IndexEntry`].
pub const INDEX_SENTINEL: u32 = 0xFFFF_FFFF;
