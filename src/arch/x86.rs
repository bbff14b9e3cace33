//! # x86
//!
//! The i386 System V convention passes every argument on the stack, so there is no prologue
//! to decode. A `double` occupies two consecutive stack slots.

use super::{read_target_word, Abi, ArgumentDecoder, FrameUnwinder};
use crate::addr::Addr;
use crate::errors::Result;
use crate::memory::TargetMemory;

/// `mov eax, 0xad`, the start of the `rt_sigreturn` return path
const SIGRETURN: [u8; 5] = [0xb8, 0xad, 0x00, 0x00, 0x00];
/// `uc_mcontext.gregs[REG_EIP]` inside `ucontext_t`
const UCONTEXT_EIP: usize = 20 + 14 * 4;

#[derive(Default, Debug, Clone, Copy)]
pub struct X86;

impl X86 {
    pub const fn new() -> Self {
        X86
    }
}

impl FrameUnwinder for X86 {
    fn signal_trampoline(&self) -> Option<&'static [u8]> {
        Some(&SIGRETURN)
    }

    /// The handler's third argument
    fn signal_context(&self, memory: &dyn TargetMemory, fp: Addr) -> Result<Addr> {
        read_target_word(memory, fp + 4 * 4, 4)
    }

    fn saved_ip_offset(&self) -> usize {
        UCONTEXT_EIP
    }

    fn word_bytes(&self) -> usize {
        4
    }
}

impl ArgumentDecoder for X86 {
    fn abi(&self) -> Abi {
        Abi::X86
    }
}
