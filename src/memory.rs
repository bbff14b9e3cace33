//! # Target Memory
//!
//! The [`TargetMemory`] trait is the seam between the analysis and the two kinds of targets:
//! a core file read through its address space, and a live process read through ptrace. The
//! unwinder, the argument engine and the printers only ever see this trait.

use tracing::warn;

use crate::addr::Addr;
use crate::consts::STRING_CHUNK;
use crate::errors::Result;
use crate::{Word, WORD_BYTES};

/// Where an address lives, as far as the target can tell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// Backed by (or reserved in) the core file itself
    InCore,
    /// Not part of the core file
    Outside,
    /// The target can't tell, e.g. a live process
    Unknown,
}

pub trait TargetMemory {
    /// Fills `buf` with the target's memory at `addr`
    ///
    /// On failure the content of `buf` is all zeros.
    fn read_memory(&self, addr: Addr, buf: &mut [u8]) -> Result<()>;

    fn residency(&self, _addr: Addr) -> Residency {
        Residency::Unknown
    }

    fn read_word(&self, addr: Addr) -> Result<Word> {
        let mut raw = [0u8; WORD_BYTES];
        self.read_memory(addr, &mut raw)?;
        Ok(Word::from_ne_bytes(raw))
    }

    /// Reads a C `int`, or 0 with a warning
    fn read_int(&self, addr: Addr) -> i32 {
        let mut raw = [0u8; 4];
        match self.read_memory(addr, &mut raw) {
            Ok(()) => i32::from_ne_bytes(raw),
            Err(e) => {
                warn!("Unable to read int at {addr}: {e}");
                0
            }
        }
    }

    /// Reads a C `long`, or 0 with a warning
    fn read_long(&self, addr: Addr) -> isize {
        match self.read_word(addr) {
            Ok(word) => word as isize,
            Err(e) => {
                warn!("Unable to read long at {addr}: {e}");
                0
            }
        }
    }

    /// Reads a pointer, or NULL with a warning
    fn read_addr(&self, addr: Addr) -> Addr {
        match self.read_word(addr) {
            Ok(word) => Addr::from(word),
            Err(e) => {
                warn!("Unable to read address at {addr}: {e}");
                Addr::NULL
            }
        }
    }

    /// Reads a C `double`, or 0.0 with a warning
    fn read_double(&self, addr: Addr) -> f64 {
        let mut raw = [0u8; 8];
        match self.read_memory(addr, &mut raw) {
            Ok(()) => f64::from_ne_bytes(raw),
            Err(e) => {
                warn!("Unable to read double at {addr}: {e}");
                0.0
            }
        }
    }

    /// Reads `len` bytes, which stay zero where the read fails
    fn read_bytes(&self, addr: Addr, len: usize) -> Vec<u8> {
        let mut raw = vec![0u8; len];
        if let Err(e) = self.read_memory(addr, &mut raw) {
            warn!("Failed to read {len} bytes at {addr}: {e}");
        }
        raw
    }

    /// Reads a NUL terminated string of at most `limit - 1` bytes
    ///
    /// Memory is read in chunks first. Near the end of a mapping a chunk read fails, so the
    /// rest is read one byte at a time.
    fn read_string(&self, addr: Addr, limit: usize) -> String {
        let mut out = Vec::new();
        let mut chunk = [0u8; STRING_CHUNK];

        while limit - out.len() >= STRING_CHUNK {
            if self.read_memory(addr + out.len(), &mut chunk).is_err() {
                break;
            }
            if let Some(nul) = chunk.iter().position(|b| *b == 0) {
                out.extend_from_slice(&chunk[..nul]);
                return String::from_utf8_lossy(&out).into_owned();
            }
            out.extend_from_slice(&chunk);
        }

        while out.len() < limit {
            let mut byte = [0u8; 1];
            if self.read_memory(addr + out.len(), &mut byte).is_err() {
                warn!("Failed to read full string at {addr}");
                break;
            }
            if byte[0] == 0 {
                break;
            }
            out.push(byte[0]);
        }

        out.truncate(limit.saturating_sub(1));
        String::from_utf8_lossy(&out).into_owned()
    }
}
