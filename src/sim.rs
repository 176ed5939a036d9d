//! An in-memory [`Flash`] fake for tests and host tooling.
//!
//! This is the Rust analogue of the original engine's `main.c` test harness (`circFlashRead` /
//! `circFlashWrite` / `circFlashErase` over a `malloc`'d `FakeFlash` buffer): a `Vec<u8>`-backed
//! device that enforces the same bit-clear write semantics real NOR flash has, so the whole
//! mount/append/read/wrap/index state machine can be exercised without hardware. It is test-only
//! scaffolding, not a production `Flash` implementation — it keeps the entire region in RAM.
use std::vec::Vec;

use crate::constants::FLASH_ERASED;
use crate::flash::Flash;

/// A flash device entirely backed by a `Vec<u8>`, starting fully erased.
#[derive(Debug, Clone)]
pub struct MemoryFlash {
    bytes: Vec<u8>,
    writes: Vec<(u32, u32)>,
    fail_reads: u32,
    fail_writes: u32,
    fail_erases: u32,
}

impl MemoryFlash {
    /// Creates a `len`-byte device, every byte reading as `0xFF`.
    pub fn new(len: usize) -> Self {
        MemoryFlash {
            bytes: std::vec![FLASH_ERASED; len],
            writes: Vec::new(),
            fail_reads: 0,
            fail_writes: 0,
            fail_erases: 0,
        }
    }

    /// Builds a device from caller-supplied initial contents, useful for seeding mount scenarios.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        MemoryFlash {
            bytes,
            writes: Vec::new(),
            fail_reads: 0,
            fail_writes: 0,
            fail_erases: 0,
        }
    }

    /// The full backing buffer, for inspecting what the engine actually wrote.
    pub fn contents(&self) -> &[u8] {
        &self.bytes
    }

    /// `(addr, len)` of every physical write issued so far, in order, for asserting Invariant U
    /// (program-unit alignment).
    pub fn write_log(&self) -> &[(u32, u32)] {
        &self.writes
    }

    /// Makes the next `n` `write` calls return a short count, simulating an IO failure.
    pub fn fail_next_writes(&mut self, n: u32) {
        self.fail_writes = n;
    }

    /// Makes the next `n` `read` calls return a short count.
    pub fn fail_next_reads(&mut self, n: u32) {
        self.fail_reads = n;
    }

    /// Makes the next `n` `erase` calls return a short count.
    pub fn fail_next_erases(&mut self, n: u32) {
        self.fail_erases = n;
    }
}

impl Flash for MemoryFlash {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> u32 {
        if self.fail_reads > 0 {
            self.fail_reads -= 1;
            return 0;
        }
        let start = addr as usize;
        let end = start + buf.len();
        assert!(end <= self.bytes.len(), "read out of range");
        buf.copy_from_slice(&self.bytes[start..end]);
        buf.len() as u32
    }

    fn write(&mut self, addr: u32, buf: &[u8]) -> u32 {
        self.writes.push((addr, buf.len() as u32));
        if self.fail_writes > 0 {
            self.fail_writes -= 1;
            return 0;
        }
        let start = addr as usize;
        assert!(start + buf.len() <= self.bytes.len(), "write out of range");
        for (i, &b) in buf.iter().enumerate() {
            // NOR flash can only clear bits: programming ANDs the new value into the cell, it
            // can never set a 0 bit back to 1 without an intervening erase.
            self.bytes[start + i] &= b;
        }
        buf.len() as u32
    }

    fn erase(&mut self, addr: u32, len: u32) -> u32 {
        if self.fail_erases > 0 {
            self.fail_erases -= 1;
            return 0;
        }
        let start = addr as usize;
        let end = start + len as usize;
        assert!(end <= self.bytes.len(), "erase out of range");
        for b in &mut self.bytes[start..end] {
            *b = FLASH_ERASED;
        }
        len
    }
}
