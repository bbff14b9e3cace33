//! # x86-64
//!
//! System V calling convention: the first six integer arguments travel in `rdi`, `rsi`, `rdx`,
//! `rcx`, `r8` and `r9`, the first floating point ones in `xmm0` onwards. Unoptimized code
//! spills them into its frame right after the prologue, which is where
//! [`X86_64::decode_prologue`] picks them up.

use iced_x86::{Code, Decoder, DecoderOptions, Instruction, OpKind, Register};
use tracing::debug;

use super::{read_spilled, Abi, ArgumentDecoder, FrameUnwinder};
use crate::addr::Addr;
use crate::arguments::CallArguments;
use crate::disassemble::Disassembly;
use crate::errors::Result;
use crate::memory::TargetMemory;

/// `mov rax, 0xf; syscall`, the return path of `rt_sigreturn`
const SIGRETURN: [u8; 9] = [0x48, 0xc7, 0xc0, 0x0f, 0x00, 0x00, 0x00, 0x0f, 0x05];
/// `uc_mcontext.gregs[REG_RIP]` inside `ucontext_t`
const UCONTEXT_RIP: usize = 40 + 16 * 8;
/// Bytes of code decoded at a function entry
const CODE_WINDOW: usize = 256;
const MIN_CODE_WINDOW: usize = 16;

#[derive(Default, Debug, Clone, Copy)]
pub struct X86_64;

impl X86_64 {
    pub const fn new() -> Self {
        X86_64
    }
}

impl FrameUnwinder for X86_64 {
    fn signal_trampoline(&self) -> Option<&'static [u8]> {
        Some(&SIGRETURN)
    }

    /// The handler got the context in a register that is lost by now, but the kernel puts it
    /// right above the frame
    fn signal_context(&self, _memory: &dyn TargetMemory, fp: Addr) -> Result<Addr> {
        Ok(fp + 2 * 8)
    }

    fn saved_ip_offset(&self) -> usize {
        UCONTEXT_RIP
    }

    fn word_bytes(&self) -> usize {
        8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    SaveFrame,
    SetFrame,
    SaveRegisters,
    Spills,
}

/// A register spilled into the frame by the prologue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Spill {
    float: bool,
    ordinal: Option<usize>,
    size: usize,
    displacement: i64,
}

fn int_ordinal(register: Register) -> Option<usize> {
    match register.full_register() {
        Register::RDI => Some(0),
        Register::RSI => Some(1),
        Register::RDX => Some(2),
        Register::RCX => Some(3),
        Register::R8 => Some(4),
        Register::R9 => Some(5),
        _ => None,
    }
}

fn float_ordinal(register: Register) -> Option<usize> {
    match register {
        Register::XMM0 => Some(0),
        Register::XMM1 => Some(1),
        Register::XMM2 => Some(2),
        Register::XMM3 => Some(3),
        _ => None,
    }
}

fn is_register(instruction: &Instruction, operand: u32, register: Register) -> bool {
    instruction.op_kind(operand) == OpKind::Register && instruction.op_register(operand) == register
}

/// `mov [rbp+disp], reg` and friends
fn spill(instruction: &Instruction) -> Option<Spill> {
    let (float, size) = match instruction.code() {
        Code::Mov_rm64_r64 => (false, 8),
        Code::Mov_rm32_r32 => (false, 4),
        Code::Mov_rm16_r16 => (false, 2),
        Code::Mov_rm8_r8 => (false, 1),
        Code::Movsd_xmmm64_xmm => (true, 8),
        Code::Movss_xmmm32_xmm => (true, 4),
        _ => return None,
    };
    if instruction.op0_kind() != OpKind::Memory
        || instruction.memory_base() != Register::RBP
        || instruction.memory_index() != Register::None
    {
        return None;
    }

    let source = instruction.op1_register();
    Some(Spill {
        float,
        ordinal: if float {
            float_ordinal(source)
        } else {
            int_ordinal(source)
        },
        size,
        displacement: instruction.memory_displacement64() as i64,
    })
}

/// Reads code at `entry`, shrinking the window when it runs off the mapping
fn read_code(memory: &dyn TargetMemory, entry: Addr) -> Option<Vec<u8>> {
    let mut len = CODE_WINDOW;
    while len >= MIN_CODE_WINDOW {
        let mut code = vec![0u8; len];
        if memory.read_memory(entry, &mut code).is_ok() {
            return Some(code);
        }
        len /= 2;
    }
    None
}

impl X86_64 {
    /// Decodes the canonical unoptimized prologue at `entry`
    ///
    /// `push rbp; mov rbp,rsp`, any register pushes, an optional `sub rsp,imm` and then the
    /// spills. Returns every recognized instruction and the spills among them.
    fn prologue(code: &[u8], entry: Addr) -> (Vec<Instruction>, Vec<Spill>) {
        let mut decoder = Decoder::with_ip(64, code, entry.u64(), DecoderOptions::NONE);
        let mut instruction = Instruction::default();
        let mut accepted = Vec::new();
        let mut spills = Vec::new();
        let mut stage = Stage::SaveFrame;

        while decoder.can_decode() {
            decoder.decode_out(&mut instruction);
            if instruction.is_invalid() {
                break;
            }

            stage = match stage {
                Stage::SaveFrame
                    if instruction.code() == Code::Push_r64
                        && is_register(&instruction, 0, Register::RBP) =>
                {
                    Stage::SetFrame
                }
                Stage::SaveFrame => {
                    debug!("Expected frame pointer save at {entry}, found {instruction}");
                    break;
                }
                Stage::SetFrame
                    if matches!(instruction.code(), Code::Mov_rm64_r64 | Code::Mov_r64_rm64)
                        && is_register(&instruction, 0, Register::RBP)
                        && is_register(&instruction, 1, Register::RSP) =>
                {
                    Stage::SaveRegisters
                }
                Stage::SetFrame => {
                    debug!("Expected new frame base to be set at {entry}");
                    break;
                }
                Stage::SaveRegisters if instruction.code() == Code::Push_r64 => {
                    Stage::SaveRegisters
                }
                Stage::SaveRegisters
                    if matches!(instruction.code(), Code::Sub_rm64_imm32 | Code::Sub_rm64_imm8)
                        && is_register(&instruction, 0, Register::RSP) =>
                {
                    Stage::Spills
                }
                Stage::SaveRegisters | Stage::Spills => match spill(&instruction) {
                    Some(found) => {
                        if stage == Stage::SaveRegisters {
                            debug!("Didn't find stack pointer move. Continuing anyway.");
                        }
                        spills.push(found);
                        Stage::Spills
                    }
                    None => break,
                },
            };
            accepted.push(instruction);
        }

        (accepted, spills)
    }
}

impl ArgumentDecoder for X86_64 {
    fn abi(&self) -> Abi {
        Abi::X86_64
    }

    fn decode_prologue(
        &self,
        memory: &dyn TargetMemory,
        entry: Addr,
        frame: Addr,
        args: &mut CallArguments,
    ) -> Disassembly {
        let Some(code) = read_code(memory, entry) else {
            debug!("Unable to read code at {entry}");
            return Disassembly::empty();
        };

        let (accepted, spills) = Self::prologue(&code, entry);
        for spill in spills {
            let Some(ordinal) = spill.ordinal else {
                continue;
            };
            let value = read_spilled(memory, frame.offset(spill.displacement), spill.size, spill.float);
            debug!(
                "Found {} argument {ordinal} of {} bytes at {:+#x} with value {value}",
                if spill.float { "float" } else { "int" },
                spill.size,
                spill.displacement
            );
            if spill.float {
                args.record_float(ordinal, value);
            } else {
                args.record_int(ordinal, value);
            }
        }

        Disassembly::from_instructions(&code, entry, &accepted)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::FakeMemory;

    const ENTRY: usize = 0x401000;
    const FRAME: usize = 0x7fff_0000;

    // push rbp; mov rbp,rsp; push rbx; sub rsp,0x28
    // mov [rbp-0x18],rdi; mov [rbp-0x1c],esi; movsd [rbp-0x28],xmm0; mov [rbp-0x30],rdx
    // mov eax,0
    const PROLOGUE: &[u8] = &[
        0x55, 0x48, 0x89, 0xe5, 0x53, 0x48, 0x83, 0xec, 0x28, 0x48, 0x89, 0x7d, 0xe8, 0x89, 0x75,
        0xe4, 0xf2, 0x0f, 0x11, 0x45, 0xd8, 0x48, 0x89, 0x55, 0xd0, 0xb8, 0x00, 0x00, 0x00, 0x00,
    ];

    fn frame_memory() -> FakeMemory {
        let mut frame = vec![0u8; 0x40];
        let at = |disp: usize| 0x40 - disp;
        frame[at(0x18)..at(0x18) + 8].copy_from_slice(&0x5555_0000u64.to_ne_bytes());
        frame[at(0x1c)..at(0x1c) + 4].copy_from_slice(&7i32.to_ne_bytes());
        frame[at(0x28)..at(0x28) + 8].copy_from_slice(&3.5f64.to_ne_bytes());
        frame[at(0x30)..at(0x30) + 8].copy_from_slice(&0x6000_1000u64.to_ne_bytes());
        let mut code = PROLOGUE.to_vec();
        code.resize(CODE_WINDOW, 0xcc);
        FakeMemory::default()
            .with_region(ENTRY, code)
            .with_region(FRAME - 0x40, frame)
    }

    #[test]
    fn test_decode_prologue() {
        let memory = frame_memory();
        let mut args = CallArguments::default();
        let listing = X86_64.decode_prologue(
            &memory,
            Addr::from(ENTRY),
            Addr::from(FRAME),
            &mut args,
        );

        // the mov eax,0 ends the prologue
        assert_eq!(listing.len(), 8);
        assert_eq!(args.int_registers.len(), 3);
        assert_eq!(args.int_registers[0].as_u64().unwrap(), 0x5555_0000);
        assert_eq!(args.int_registers[1].size(), 4);
        assert_eq!(args.int_registers[1].as_u64().unwrap(), 7);
        assert_eq!(args.int_registers[2].as_u64().unwrap(), 0x6000_1000);
        assert_eq!(args.float_registers.len(), 1);
        assert_eq!(args.float_registers[0].as_f64().unwrap(), 3.5);
    }

    #[test]
    fn test_prologue_without_frame_pointer() {
        // sub rsp,8; mov [rbp-8],rdi
        let code = [0x48, 0x83, 0xec, 0x08, 0x48, 0x89, 0x7d, 0xf8];
        let (accepted, spills) = X86_64::prologue(&code, Addr::from(ENTRY));
        assert!(accepted.is_empty());
        assert!(spills.is_empty());
    }

    #[test]
    fn test_spills_without_stack_allocation() {
        // push rbp; mov rbp,rsp; mov [rbp-8],rdi; mov [rbp-0x10],rbx; ret
        let code = [
            0x55, 0x48, 0x89, 0xe5, 0x48, 0x89, 0x7d, 0xf8, 0x48, 0x89, 0x5d, 0xf0, 0xc3,
        ];
        let (accepted, spills) = X86_64::prologue(&code, Addr::from(ENTRY));
        assert_eq!(accepted.len(), 4);
        assert_eq!(spills.len(), 2);
        assert_eq!(spills[0].ordinal, Some(0));
        assert_eq!(spills[0].displacement, -8);
        // rbx is callee saved, not an argument
        assert_eq!(spills[1].ordinal, None);
    }

    #[test]
    fn test_signal_return_address() {
        let fp = 0x7fff_1000usize;
        let mut context = vec![0u8; UCONTEXT_RIP + 8];
        context[UCONTEXT_RIP..].copy_from_slice(&0x40_2345u64.to_ne_bytes());
        let memory = FakeMemory::default()
            .with_region(0x7f00_0000, SIGRETURN.to_vec())
            .with_region(0x40_1000, vec![0x90; 16])
            .with_region(fp + 16, context);

        let ip = X86_64.signal_return_address(&memory, Addr::from(fp), Addr::from(0x7f00_0000usize));
        assert_eq!(ip, Some(Addr::from(0x40_2345usize)));
        let ordinary = X86_64.signal_return_address(&memory, Addr::from(fp), Addr::from(0x40_1000usize));
        assert_eq!(ordinary, None);
    }
}
