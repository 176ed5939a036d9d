use core::fmt;

/// Outcome of a public entry that does not return a byte count.
///
/// Entries that hand back a number of bytes (`write`, `read_log_partial`, `read_lines`,
/// `file_read`, `indexed_log_search`) do not use this type: they return `0` on any failure, as
/// specified. `Status` is reserved for `init`, `clear`, and `file_open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The call completed successfully.
    None,
    /// The flash adapter returned a short read, write, or erase count.
    Io,
    /// The caller misused the API: bad configuration, an `(index, parse_time)` pair that isn't
    /// both-or-neither, or a cursor whose magic marker doesn't match.
    Api,
    /// The public entry was called before `init` completed successfully.
    Init,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::None => "ok",
            Status::Io => "flash adapter returned a short count",
            Status::Api => "invalid configuration or argument",
            Status::Init => "log is not initialized",
        };
        f.write_str(s)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Status {}
