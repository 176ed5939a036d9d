//! The range reader (C6): translates a logical `(seek, len)` on the used range into one or two
//! physical reads across the wrap boundary.

use crate::flash::Flash;

/// Reads `out.len()` bytes starting at logical offset `seek` from a snapshot `(tail, head)` over
/// a `cap`-byte device rooted at `base`.
///
/// `space` is the used-space size of the same snapshot; it's only consulted to compute
/// `remaining`, never to bound addressing (the wrap split below is self-sufficient for that).
/// Returns `(bytes_read, remaining)`; any short physical read yields `(0, 0)`.
pub(crate) fn read_section<F: Flash>(
    flash: &mut F,
    base: u32,
    cap: u32,
    tail: u32,
    head: u32,
    seek: u32,
    space: u32,
    out: &mut [u8],
) -> (u32, u32) {
    let desired_len = out.len() as u32;
    if space == 0 || desired_len == 0 {
        return (0, 0);
    }

    let ok = match head {
        h if h > tail => flash.read(base + tail + seek, out) == desired_len,
        h if h < tail => {
            let first_len = cap - tail;
            if seek > first_len {
                flash.read(base + (seek - first_len), out) == desired_len
            } else if seek + desired_len + tail > cap {
                let second_len = cap - (tail + seek);
                let first_ok =
                    second_len == 0 || flash.read(base + tail + seek, &mut out[..second_len as usize]) == second_len;
                first_ok
                    && flash.read(base, &mut out[second_len as usize..]) == desired_len - second_len
            } else {
                flash.read(base + tail + seek, out) == desired_len
            }
        }
        _ => false, // head == tail: corrupted, nothing addressable
    };

    if !ok {
        return (0, 0);
    }
    (desired_len, space.wrapping_sub(seek).wrapping_sub(desired_len))
}
