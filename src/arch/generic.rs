//! Architectures without signal frame or prologue support. Frame pointers are still followed
//! and arguments come from the stack slots only.

use super::{Abi, ArgumentDecoder, FrameUnwinder};
use crate::addr::Addr;
use crate::errors::{AnalysisError, Result};
use crate::memory::TargetMemory;
use crate::WORD_BYTES;

#[derive(Default, Debug, Clone, Copy)]
pub struct Generic;

impl Generic {
    pub const fn new() -> Self {
        Generic
    }
}

impl FrameUnwinder for Generic {
    fn signal_trampoline(&self) -> Option<&'static [u8]> {
        None
    }

    fn signal_context(&self, _memory: &dyn TargetMemory, _fp: Addr) -> Result<Addr> {
        Err(AnalysisError::Unsupported("reading signal frames"))
    }

    fn saved_ip_offset(&self) -> usize {
        0
    }

    fn word_bytes(&self) -> usize {
        WORD_BYTES
    }
}

impl ArgumentDecoder for Generic {
    fn abi(&self) -> Abi {
        Abi {
            word_bytes: WORD_BYTES,
            max_int_registers: 0,
            max_float_registers: 0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::FakeMemory;

    #[test]
    fn test_never_a_signal_frame() {
        let memory = FakeMemory::default().with_region(0x1000, vec![0; 16]);
        let addr = Addr::from(0x1000usize);
        assert_eq!(Generic.signal_return_address(&memory, addr, addr), None);
        assert!(Generic.signal_context(&memory, addr).is_err());
    }
}
