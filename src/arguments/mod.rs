//! # Argument Recovery
//!
//! Reconstructs the arguments a frame's function was called with, without debug information.
//! Evidence comes from up to three places, all collected into a [`CallArguments`]:
//!
//! - instrumentation blocks an instrumented program leaves on its stack
//!   ([`instrument`]), which are authoritative when present
//! - register arguments the function prologue spilled into the frame, found by the
//!   architecture's [`ArgumentDecoder`]
//! - the raw stack slots above the frame
//!
//! The evidence is then matched against the parameter list of the demangled symbol, see
//! [`merge`].

use serde::Serialize;
use tracing::debug;

use crate::addr::Addr;
use crate::arch::{Abi, ArgumentDecoder};
use crate::consts::{MAX_ARGS, UNKNOWN_SYMBOL};
use crate::disassemble::Disassembly;
use crate::memory::TargetMemory;
use crate::prototype::{function_name, parameter_types, short_name, symbol_kind, SymbolKind};
use crate::symbols::{demangle, SymbolResolver};

pub mod instrument;
pub mod merge;
mod value;

pub use instrument::InstrumentationScanner;
pub use merge::MergeInput;
pub use value::{ArgValue, ValueClass};

/// An argument with the type it was declared with, `??????` if unknown
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypedArgument {
    pub type_name: String,
    pub value: ArgValue,
}

impl TypedArgument {
    pub fn new(type_name: impl Into<String>, value: ArgValue) -> Self {
        Self {
            type_name: type_name.into(),
            value,
        }
    }

    pub fn untyped(value: ArgValue) -> Self {
        Self::new(UNKNOWN_SYMBOL, value)
    }
}

/// Evidence about the arguments of one call, and the merged result
#[derive(Debug, Clone, Default, Serialize)]
pub struct CallArguments {
    pub instrumented: Vec<ArgValue>,
    pub stack: Vec<ArgValue>,
    pub int_registers: Vec<ArgValue>,
    pub float_registers: Vec<ArgValue>,
    pub merged: Vec<TypedArgument>,
}

fn record(slots: &mut Vec<ArgValue>, ordinal: usize, value: ArgValue) {
    if ordinal >= MAX_ARGS {
        debug!("Ignoring argument {ordinal}, at most {MAX_ARGS} are kept");
        return;
    }
    if slots.len() <= ordinal {
        slots.resize(ordinal + 1, ArgValue::unknown());
    }
    slots[ordinal] = value;
}

impl CallArguments {
    /// Stores the integer register argument `ordinal`; the count grows to cover it
    pub fn record_int(&mut self, ordinal: usize, value: ArgValue) {
        record(&mut self.int_registers, ordinal, value);
    }

    pub fn record_float(&mut self, ordinal: usize, value: ArgValue) {
        record(&mut self.float_registers, ordinal, value);
    }

    /// Reads the stack slots above `frame`, each `word_bytes` wide
    pub fn read_stack(&mut self, memory: &dyn TargetMemory, frame: Addr, word_bytes: usize) {
        let mut raw = vec![0u8; word_bytes];
        self.stack = (0..MAX_ARGS)
            .map(|i| {
                let addr = frame + (2 + i) * word_bytes;
                match memory.read_memory(addr, &mut raw) {
                    Ok(()) => ArgValue::integer(&raw),
                    Err(e) => {
                        debug!("Error reading stack argument {i} at {addr}: {e}");
                        ArgValue::unknown()
                    }
                }
            })
            .collect();
    }
}

/// Everything known about the call a frame belongs to
#[derive(Debug, Clone, Serialize)]
pub struct FrameArguments {
    /// The demangled symbol, `??????` if no symbol covers the address
    pub symbol: String,
    /// The function name without parameters, if the symbol is known
    pub function: Option<String>,
    /// Distance of the address from the start of the symbol
    pub offset: u64,
    /// The first merged argument is the `this` pointer
    pub method: bool,
    pub arguments: CallArguments,
    #[serde(skip)]
    pub prologue: Disassembly,
}

/// Recovers arguments frame by frame for one thread
///
/// The instrumentation scanner remembers the last block it found, so a new engine is needed
/// for every thread.
pub struct ArgumentEngine<'a> {
    memory: &'a dyn TargetMemory,
    symbols: &'a SymbolResolver,
    decoder: &'a dyn ArgumentDecoder,
    scanner: InstrumentationScanner,
    stack_arguments: usize,
    full_stack: bool,
}

impl<'a> ArgumentEngine<'a> {
    pub fn new(
        memory: &'a dyn TargetMemory,
        symbols: &'a SymbolResolver,
        decoder: &'a dyn ArgumentDecoder,
        stack_arguments: usize,
        full_stack: bool,
    ) -> Self {
        Self {
            memory,
            symbols,
            decoder,
            scanner: InstrumentationScanner::new(),
            stack_arguments,
            full_stack,
        }
    }

    pub fn abi(&self) -> Abi {
        self.decoder.abi()
    }

    /// Recovers the arguments of the function containing `pc`, whose frame is at `frame`
    pub fn recover(&mut self, pc: Addr, frame: Addr) -> FrameArguments {
        let abi = self.abi();
        let lookup = self.symbols.address_to_name(pc);
        let offset = lookup.offset();
        let mut arguments = CallArguments::default();

        if !lookup.is_known() {
            arguments.read_stack(self.memory, frame, abi.word_bytes);
            arguments.instrumented = self.scanner.scan(self.memory, frame);
            let method = MergeInput {
                prototype: None,
                function: None,
                kind: SymbolKind::Unknown,
                abi,
                stack_arguments: self.stack_arguments,
                full_stack: self.full_stack,
            }
            .merge(&mut arguments);
            return FrameArguments {
                symbol: UNKNOWN_SYMBOL.to_string(),
                function: None,
                offset,
                method,
                arguments,
                prologue: Disassembly::empty(),
            };
        }

        let mangled = lookup.name();
        let symbol = demangle(mangled);
        let function = function_name(&symbol);
        let kind = symbol_kind(mangled, short_name(&function));
        let entry = pc - offset as usize;

        let prologue = self
            .decoder
            .decode_prologue(self.memory, entry, frame, &mut arguments);
        arguments.read_stack(self.memory, frame, abi.word_bytes);
        arguments.instrumented = self.scanner.scan(self.memory, frame);

        let method = MergeInput {
            prototype: parameter_types(&symbol),
            function: Some(&function),
            kind,
            abi,
            stack_arguments: self.stack_arguments,
            full_stack: self.full_stack,
        }
        .merge(&mut arguments);

        debug!(
            "Found {} int args, {} float args, {} instrumented args and {} merged args for [{symbol}] which is at {entry} with a frame at {frame}",
            arguments.int_registers.len(),
            arguments.float_registers.len(),
            arguments.instrumented.len(),
            arguments.merged.len(),
        );

        FrameArguments {
            symbol,
            function: Some(function),
            offset,
            method,
            arguments,
            prologue,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arch::x86::X86;
    use crate::symbols::SymbolTable;
    use crate::testutil::FakeMemory;

    #[test]
    fn test_record_grows_with_gaps() {
        let mut args = CallArguments::default();
        args.record_int(2, ArgValue::word(9));
        assert_eq!(args.int_registers.len(), 3);
        assert!(args.int_registers[0].is_unknown());
        assert_eq!(args.int_registers[2].as_u64().unwrap(), 9);
        args.record_float(MAX_ARGS, ArgValue::double(1.0));
        assert!(args.float_registers.is_empty());
    }

    #[test]
    fn test_read_stack() {
        let frame = 0x8000usize;
        let memory = FakeMemory::default().with_region(frame + 8, vec![0x11; 8]);
        let mut args = CallArguments::default();
        args.read_stack(&memory, Addr::from(frame), 4);
        assert_eq!(args.stack.len(), MAX_ARGS);
        assert_eq!(args.stack[0].as_u64().unwrap(), 0x1111_1111);
        assert_eq!(args.stack[1].size(), 4);
        assert!(args.stack[2].is_unknown());
    }

    #[test]
    fn test_recover_unknown_function() {
        let frame = 0x8000usize;
        let memory = FakeMemory::default().with_region(frame + 8, vec![0x22; 8]);
        let symbols = SymbolResolver::new();
        let mut engine = ArgumentEngine::new(&memory, &symbols, &X86, 3, true);

        let recovered = engine.recover(Addr::from(0x1234usize), Addr::from(frame));
        assert_eq!(recovered.symbol, UNKNOWN_SYMBOL);
        assert!(recovered.function.is_none());
        assert!(!recovered.method);
        assert_eq!(recovered.arguments.merged.len(), 3);
        assert!(recovered
            .arguments
            .merged
            .iter()
            .all(|arg| arg.type_name == UNKNOWN_SYMBOL));
        assert!(recovered.arguments.merged[2].value.is_unknown());
    }

    #[test]
    fn test_recover_with_prototype() {
        // ns::Widget::resize(int, double) on i386: this, 5, then a double in two slots
        let frame = 0x8000usize;
        let mut slots = Vec::new();
        slots.extend_from_slice(&0x0900_0000u32.to_ne_bytes());
        slots.extend_from_slice(&5u32.to_ne_bytes());
        slots.extend_from_slice(&2.5f64.to_ne_bytes());
        let memory = FakeMemory::default().with_region(frame + 8, slots);

        let mangled = "_ZN2ns6Widget6resizeEid";
        let mut strings = vec![0u8];
        strings.extend_from_slice(mangled.as_bytes());
        strings.push(0);
        let mut symbols = SymbolResolver::new();
        symbols.add(SymbolTable::new(
            0,
            Addr::NULL,
            vec![crate::symbols::ElfSymbol {
                name: 1,
                value: 0x1000,
                size: 0x40,
                shndx: 1,
            }],
            strings,
        ));

        let mut engine = ArgumentEngine::new(&memory, &symbols, &X86, 8, false);
        let recovered = engine.recover(Addr::from(0x1010usize), Addr::from(frame));
        assert_eq!(recovered.symbol, "ns::Widget::resize(int, double)");
        assert_eq!(recovered.function.as_deref(), Some("ns::Widget::resize"));
        assert_eq!(recovered.offset, 0x10);
        assert!(recovered.method);

        let merged = &recovered.arguments.merged;
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].type_name, "ns::Widget*");
        assert_eq!(merged[0].value.as_u64().unwrap(), 0x0900_0000);
        assert_eq!(merged[1].value.as_u64().unwrap(), 5);
        assert_eq!(merged[2].type_name, "double");
        assert_eq!(merged[2].value.as_f64().unwrap(), 2.5);
    }
}
