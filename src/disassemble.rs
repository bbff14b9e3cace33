//! # Disassembly Module
//!
//! Turns machine code read from the target into readable assembly.
//!
//! The [`Disassembly`] is used in two places: the prologue decoder hands back the instructions
//! it recognized while collecting register arguments, and the `DISASSEMBLE` type printer shows
//! that listing (or a plain disassembly of the function entry) to the user.

use std::fmt::{Display, Write};

use iced_x86::{
    Decoder, DecoderOptions, Formatter, FormatterOutput, FormatterTextKind, Instruction,
    MemorySizeOptions, NasmFormatter,
};
use serde::{Serialize, Serializer};

use crate::addr::Addr;

/// A piece of formatted instruction text and its kind (mnemonic, register, number...)
pub type TextContent = (String, FormatterTextKind);

/// One decoded instruction: address, raw bytes and formatted text
pub type DisassemblyLine = (Addr, Vec<u8>, Vec<TextContent>);

#[derive(Serialize)]
struct SerializableTextContent {
    text: String,
    kind: String,
}

/// Collects the text pieces produced by the iced-x86 formatter
struct DisassemblyOutput(Vec<TextContent>);

impl FormatterOutput for DisassemblyOutput {
    fn write(&mut self, text: &str, kind: FormatterTextKind) {
        self.0.push((text.to_string(), kind));
    }
}

/// A listing of decoded instructions
///
/// # Examples
///
/// ```
/// use corescope::addr::Addr;
/// use corescope::disassemble::Disassembly;
///
/// // push rbp; mov rbp,rsp; sub rsp,0x20
/// let code = [0x55, 0x48, 0x89, 0xe5, 0x48, 0x83, 0xec, 0x20];
/// let listing = Disassembly::disassemble(&code, Addr::from(0x401000usize), 64);
/// assert_eq!(listing.len(), 3);
/// println!("{listing}");
/// ```
#[derive(Debug, Clone, Default, Serialize)]
pub struct Disassembly {
    #[serde(serialize_with = "serialize_disassembly_vec")]
    vec: Vec<DisassemblyLine>,
}

fn formatter() -> NasmFormatter {
    let mut formatter = NasmFormatter::new();

    // padding
    formatter.options_mut().set_first_operand_char_index(8);

    // numbers stuff
    formatter.options_mut().set_hex_suffix("");
    formatter.options_mut().set_hex_prefix("0x");
    formatter.options_mut().set_uppercase_hex(false);

    // memory stuff
    formatter.options_mut().set_show_symbol_address(true);
    formatter.options_mut().set_rip_relative_addresses(false);
    formatter
        .options_mut()
        .set_memory_size_options(MemorySizeOptions::Always);

    formatter
}

impl Disassembly {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Disassembles `data`, which was read at `first_addr`, stopping at the first invalid
    /// instruction
    ///
    /// `bitness` is 64 for x86-64 code and 32 for x86 code.
    #[must_use]
    pub fn disassemble(data: &[u8], first_addr: Addr, bitness: u32) -> Self {
        let mut decoder = Decoder::with_ip(bitness, data, first_addr.u64(), DecoderOptions::NONE);
        let mut instructions = Vec::new();
        let mut instruction = Instruction::default();
        while decoder.can_decode() {
            decoder.decode_out(&mut instruction);
            if instruction.is_invalid() {
                break;
            }
            instructions.push(instruction);
        }
        Self::from_instructions(data, first_addr, &instructions)
    }

    /// Formats instructions that were decoded from `data`, read at `first_addr`
    #[must_use]
    pub fn from_instructions(data: &[u8], first_addr: Addr, instructions: &[Instruction]) -> Self {
        let mut formatter = formatter();
        let mut disassembly = Self::empty();
        let mut text_contents = DisassemblyOutput(Vec::new());

        for instruction in instructions {
            text_contents.0.clear();
            formatter.format(instruction, &mut text_contents);

            let start = instruction.ip().wrapping_sub(first_addr.u64()) as usize;
            let raw = data
                .get(start..start + instruction.len())
                .map(<[u8]>::to_vec)
                .unwrap_or_default();
            disassembly
                .vec
                .push((Addr::from(instruction.ip()), raw, text_contents.0.clone()));
        }

        disassembly
    }

    #[must_use]
    pub fn inner(&self) -> &[DisassemblyLine] {
        &self.vec
    }

    pub fn len(&self) -> usize {
        self.vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vec.is_empty()
    }
}

impl Display for Disassembly {
    /// Formats the listing, one instruction per line
    ///
    /// ```text
    /// 0x0000000000401000    55                      push    rbp
    /// 0x0000000000401001    48 89 e5                mov     rbp,rsp
    /// 0x0000000000401004    48 83 ec 20             sub     rsp,0x20
    /// ```
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut buf = String::new();
        for (addr, raw, content) in self.inner() {
            write!(f, "{addr}    ")?;
            for byte in raw {
                write!(buf, "{byte:02x} ")?;
            }
            write!(f, "{buf:<24}")?;
            buf.clear();
            for (thing, _kind) in content {
                write!(f, "{thing}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl From<&TextContent> for SerializableTextContent {
    fn from(content: &TextContent) -> Self {
        Self {
            text: content.0.clone(),
            kind: format!("{:?}", content.1),
        }
    }
}

fn serialize_disassembly_vec<S>(
    data: &[DisassemblyLine],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let serializable_data: Vec<(Addr, Vec<u8>, Vec<SerializableTextContent>)> = data
        .iter()
        .map(|(addr, raw, content)| {
            (
                *addr,
                raw.clone(),
                content.iter().map(SerializableTextContent::from).collect(),
            )
        })
        .collect();

    serializable_data.serialize(serializer)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_disassemble_stops_at_invalid() {
        // push rbp; mov rbp,rsp; then an invalid opcode in 64-bit mode
        let code = [0x55, 0x48, 0x89, 0xe5, 0x06, 0x90];
        let listing = Disassembly::disassemble(&code, Addr::from(0x1000usize), 64);
        assert_eq!(listing.len(), 2);
        assert_eq!(listing.inner()[1].0, Addr::from(0x1001usize));
        assert_eq!(listing.inner()[1].1, vec![0x48, 0x89, 0xe5]);
    }

    #[test]
    fn test_display() {
        let code = [0x55];
        let listing = Disassembly::disassemble(&code, Addr::from(0x1000usize), 64);
        let text = listing.to_string();
        assert!(text.starts_with("0x0000000000001000"));
        assert!(text.contains("push"));
        assert!(text.contains("rbp"));
    }

    #[test]
    fn test_serialize() {
        let listing = Disassembly::disassemble(&[0x55], Addr::from(0x1000usize), 64);
        let json = serde_json::to_string(&listing).unwrap();
        assert!(json.contains("\"push\"") || json.contains("push"));
    }
}
