//! # Architecture Support
//!
//! Everything the unwinder and the argument engine need to know about a CPU lives behind two
//! traits: [`FrameUnwinder`] recognizes signal frames, [`ArgumentDecoder`] knows the calling
//! convention and recovers register arguments from a function prologue.
//!
//! One implementation exists per supported architecture. The one matching the build target is
//! available as [`HostArch`] through [`host`], the others can still be used directly, which is
//! how their rules are tested on any machine.

use serde::Serialize;
use tracing::{debug, warn};

use crate::addr::Addr;
use crate::arguments::{ArgValue, CallArguments};
use crate::disassemble::Disassembly;
use crate::errors::Result;
use crate::memory::TargetMemory;

pub mod generic;
pub mod x86;
pub mod x86_64;

/// The parts of a calling convention the argument merge depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Abi {
    /// Width of a stack slot
    pub word_bytes: usize,
    /// Integer arguments passed in registers
    pub max_int_registers: usize,
    /// Floating point arguments passed in registers
    pub max_float_registers: usize,
}

impl Abi {
    pub const X86_64: Abi = Abi {
        word_bytes: 8,
        max_int_registers: 6,
        max_float_registers: 4,
    };

    pub const X86: Abi = Abi {
        word_bytes: 4,
        max_int_registers: 0,
        max_float_registers: 0,
    };

    /// Whether a `double` on the stack takes two slots
    pub fn splits_doubles(&self) -> bool {
        self.word_bytes < 8
    }
}

/// Signal frame detection for one architecture
pub trait FrameUnwinder {
    /// The code the kernel returns through after a signal handler, if known
    fn signal_trampoline(&self) -> Option<&'static [u8]>;

    /// Address of the `ucontext_t` saved for the signal handler whose frame is `fp`
    fn signal_context(&self, memory: &dyn TargetMemory, fp: Addr) -> Result<Addr>;

    /// Offset of the saved instruction pointer inside `ucontext_t`
    fn saved_ip_offset(&self) -> usize;

    fn word_bytes(&self) -> usize;

    /// The interrupted instruction pointer, if `return_addr` returns into the signal trampoline
    ///
    /// `None` means the frame is an ordinary call.
    fn signal_return_address(
        &self,
        memory: &dyn TargetMemory,
        fp: Addr,
        return_addr: Addr,
    ) -> Option<Addr> {
        let trampoline = self.signal_trampoline()?;
        let mut code = vec![0u8; trampoline.len()];
        memory.read_memory(return_addr, &mut code).ok()?;
        if code != trampoline {
            return None;
        }

        let saved_ip = self.signal_context(memory, fp).and_then(|context| {
            debug!("Reading ucontext from {context}");
            read_target_word(memory, context + self.saved_ip_offset(), self.word_bytes())
        });
        match saved_ip {
            Ok(ip) => Some(ip),
            Err(e) => {
                warn!("Unable to read the signal context of the frame at {fp}: {e}");
                Some(return_addr)
            }
        }
    }
}

/// Calling convention knowledge for one architecture
pub trait ArgumentDecoder {
    fn abi(&self) -> Abi;

    /// Records the register arguments the prologue at `entry` spilled into `frame`
    ///
    /// Returns the listing of the recognized prologue instructions.
    fn decode_prologue(
        &self,
        _memory: &dyn TargetMemory,
        _entry: Addr,
        _frame: Addr,
        _args: &mut CallArguments,
    ) -> Disassembly {
        Disassembly::empty()
    }
}

/// Reads one word of the target's width, which may differ from the host's
pub fn read_target_word(memory: &dyn TargetMemory, addr: Addr, word_bytes: usize) -> Result<Addr> {
    let mut raw = [0u8; 8];
    memory.read_memory(addr, &mut raw[..word_bytes.min(8)])?;
    Ok(if word_bytes == 4 {
        Addr::from(u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize)
    } else {
        Addr::from(u64::from_ne_bytes(raw))
    })
}

/// Reads a spilled argument of `size` bytes, unknown if the memory isn't readable
pub(crate) fn read_spilled(memory: &dyn TargetMemory, addr: Addr, size: usize, float: bool) -> ArgValue {
    let mut raw = vec![0u8; size];
    if let Err(e) = memory.read_memory(addr, &mut raw) {
        debug!("Error reading {size} byte argument at {addr}: {e}");
        return ArgValue::unknown();
    }
    if float {
        ArgValue::float(&raw)
    } else {
        ArgValue::integer(&raw)
    }
}

#[cfg(target_arch = "x86_64")]
pub type HostArch = x86_64::X86_64;
#[cfg(target_arch = "x86")]
pub type HostArch = x86::X86;
#[cfg(not(any(target_arch = "x86_64", target_arch = "x86")))]
pub type HostArch = generic::Generic;

static HOST: HostArch = HostArch::new();

/// The architecture this build analyzes
pub fn host() -> &'static HostArch {
    &HOST
}
