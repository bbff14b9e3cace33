use std::fmt::Display;

use serde::Serialize;

use crate::addr::Addr;
use crate::arguments::{FrameArguments, TypedArgument};
use crate::disassemble::Disassembly;
use crate::memorymap::ProcessMemoryMap;
use crate::stack::RawStack;

/// One line of a call stack
#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub pc: Addr,
    pub symbol: String,
    pub offset: u64,
    pub file: String,
    /// The first argument is the `this` pointer
    pub method: bool,
    pub arguments: Vec<TypedArgument>,
}

impl FrameReport {
    pub fn new(pc: Addr, recovered: &FrameArguments, file: String) -> Self {
        Self {
            pc,
            symbol: recovered.symbol.clone(),
            offset: recovered.offset,
            file,
            method: recovered.method,
            arguments: recovered.arguments.merged.clone(),
        }
    }
}

impl Display for FrameReport {
    /// ```text
    /// 0x0000000000401136 ns::Widget::resize(int, double)(this=0x4052a0; 0x5, 3.500000) + 0x16 [/usr/bin/app]
    /// ```
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}(", self.pc, self.symbol)?;
        let last = self.arguments.len().saturating_sub(1);
        for (i, argument) in self.arguments.iter().enumerate() {
            if self.method && i == 0 {
                write!(f, "this={}; ", argument.value)?;
            } else if i != last {
                write!(f, "{}, ", argument.value)?;
            } else {
                write!(f, "{}", argument.value)?;
            }
        }
        write!(f, ") + {:#x} [{}]", self.offset, self.file)
    }
}

/// Everything an analysis reports, in the order it is found
#[derive(Debug, Clone, Serialize)]
pub enum Feedback {
    Text(String),
    /// Start of the output for one thread
    Thread(i32),
    /// The next frame was interrupted by a signal
    SignalHandler,
    Frame(FrameReport),
    /// A value printed for a function argument or an address
    Value {
        function: String,
        label: String,
        value: String,
    },
    /// A string too long to print, written to a file instead
    Spilled {
        function: String,
        label: String,
        path: String,
        bytes: usize,
    },
    MemoryMap(ProcessMemoryMap),
    Libraries(Vec<String>),
    RawStack(RawStack),
    Disassembly(Disassembly),
}

impl Feedback {
    pub fn value(function: &str, label: &str, value: impl Display) -> Self {
        Feedback::Value {
            function: function.to_string(),
            label: label.to_string(),
            value: value.to_string(),
        }
    }
}

impl Display for Feedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Feedback::Text(t) => write!(f, "{t}")?,
            Feedback::Thread(id) => write!(f, "**** LWP {id} ****")?,
            Feedback::SignalHandler => write!(f, "****** Signal handler")?,
            Feedback::Frame(frame) => write!(f, "{frame}")?,
            Feedback::Value {
                function,
                label,
                value,
            } => write!(f, "{function}: {label}={value}")?,
            Feedback::Spilled {
                function,
                label,
                path,
                bytes,
            } => write!(f, "{function}: {label} written to {path} ({bytes} bytes)")?,
            Feedback::MemoryMap(map) => write!(f, "{map}")?,
            Feedback::Libraries(libraries) => {
                for (i, library) in libraries.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{library}")?;
                }
            }
            Feedback::RawStack(stack) => write!(f, "{stack}")?,
            Feedback::Disassembly(listing) => write!(f, "{listing}")?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arguments::ArgValue;

    fn frame(method: bool, arguments: Vec<TypedArgument>) -> FrameReport {
        FrameReport {
            pc: Addr::from(0x401136usize),
            symbol: "ns::Widget::resize(int, double)".to_string(),
            offset: 0x16,
            file: "/usr/bin/app".to_string(),
            method,
            arguments,
        }
    }

    #[test]
    fn test_frame_line() {
        let report = frame(
            true,
            vec![
                TypedArgument::new("ns::Widget*", ArgValue::word(0x4052a0)),
                TypedArgument::new("int", ArgValue::integer(&5i32.to_ne_bytes())),
                TypedArgument::new("double", ArgValue::double(3.5)),
            ],
        );
        assert_eq!(
            report.to_string(),
            "0x0000000000401136 ns::Widget::resize(int, double)(this=0x4052a0; 0x5, 3.500000) + 0x16 [/usr/bin/app]"
        );
    }

    #[test]
    fn test_frame_line_unknown_values() {
        let report = frame(
            false,
            vec![
                TypedArgument::untyped(ArgValue::unknown()),
                TypedArgument::untyped(ArgValue::word(1)),
            ],
        );
        assert!(report.to_string().contains("(<unknown>, 0x1) + 0x16"));
        assert!(frame(false, Vec::new()).to_string().contains("double)() + 0x16"));
    }

    #[test]
    fn test_feedback_lines() {
        assert_eq!(
            Feedback::value("strlen", "s", "\"abc\"").to_string(),
            "strlen: s=\"abc\""
        );
        let spilled = Feedback::Spilled {
            function: "f".to_string(),
            label: "arg 1".to_string(),
            path: "core.0.txt".to_string(),
            bytes: 2000,
        };
        assert_eq!(spilled.to_string(), "f: arg 1 written to core.0.txt (2000 bytes)");
        assert_eq!(Feedback::Thread(4711).to_string(), "**** LWP 4711 ****");
        let libraries = Feedback::Libraries(vec!["/lib/a.so".to_string(), "/lib/b.so".to_string()]);
        assert_eq!(libraries.to_string(), "/lib/a.so\n/lib/b.so");
    }
}
