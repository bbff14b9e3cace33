//! # corescope
//!
//! Post-mortem and live introspection of native processes on Linux: call stacks, symbols,
//! recovered function arguments, memory maps and loaded libraries, read from a core file or
//! a stopped process, without debug information.
//!
//! The entry point is [`process::ProcessImage`], which opens a core or attaches to a process.
//! [`analysis::Analysis`] runs the reports over an image and hands the results as
//! [`feedback::Feedback`] to a [`ui::Presenter`].

pub mod addr;
pub mod addrspace;
pub mod analysis;
pub mod arch;
pub mod arguments;
pub mod config;
pub mod consts;
pub mod disassemble;
pub mod elf;
pub mod errors;
pub mod feedback;
pub mod live;
pub mod memory;
pub mod memorymap;
pub mod notes;
pub mod printers;
pub mod process;
pub mod prototype;
pub mod stack;
pub mod symbols;
pub mod thread;
pub mod ui;
pub mod unwind;

#[cfg(test)]
pub(crate) mod testutil;

pub use addr::Addr;
pub use errors::Result;

/// A machine word of the host, which is also the word size of the analyzed process
pub type Word = usize;
pub const WORD_BYTES: usize = std::mem::size_of::<Word>();
