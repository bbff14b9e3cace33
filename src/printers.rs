//! # Type and Function Printers
//!
//! Turns recovered argument values into something a human can read.
//!
//! Two tables drive this, both kept in a [`Registry`]:
//!
//! - type printers, looked up by the declared type of an argument (`char*`, `std::string*`)
//!   or by the type the user asks for with `--type`
//! - function printers, looked up by function name. They see all arguments of a call at once
//!   and may stop the type printers from running for that call.
//!
//! The built-in tables can be extended once, before the first analysis, with
//! [`Registry::install`].

use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::sync::OnceLock;

use tracing::{debug, warn};

use crate::addr::Addr;
use crate::arguments::FrameArguments;
use crate::consts::{
    ARGC_SYMBOL, ARGV_STRING_LIMIT, ARGV_SYMBOL, ARGX_SYMBOL, INLINE_STRING_LIMIT, MAX_ARGC,
    MAX_STRING,
};
use crate::errors::{AnalysisError, Result};
use crate::feedback::Feedback;
use crate::memory::TargetMemory;
use crate::symbols::SymbolResolver;
use crate::ui::Presenter;

/// Bytes shown by the `RAW1K` printer
const RAW_DUMP_BYTES: usize = 1024;
const RAW_DUMP_LINE: usize = 16;
/// Longest glibc message, and longest argument of it, that is read
const LIBC_MESSAGE_LIMIT: usize = 10240;

/// Prints the value `value` of an argument `label` of function `function`
pub type TypeHandler =
    fn(&mut Printer<'_>, &mut dyn Presenter, function: &str, label: &str, value: Addr) -> Result<()>;

/// Prints the arguments of a call to a known function
///
/// Returns `true` if the type printers should not look at the arguments anymore.
pub type FunctionHandler =
    fn(&mut Printer<'_>, &mut dyn Presenter, function: &str, call: &FrameArguments) -> Result<bool>;

#[derive(Debug, Clone, Copy)]
pub struct TypePrinter {
    /// The type name without a trailing `*` or `&`
    pub name: &'static str,
    pub handler: TypeHandler,
    pub comment: Option<&'static str>,
    /// Matches `name*` and `name&` instead of `name`
    pub pointer: bool,
    /// Used for stack arguments of this type, not only when asked for explicitly
    pub auto_detect: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct FunctionPrinter {
    pub name: &'static str,
    pub handler: FunctionHandler,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// The printers known to an analysis
#[derive(Debug, Clone)]
pub struct Registry {
    types: Vec<TypePrinter>,
    functions: Vec<FunctionPrinter>,
}

impl Registry {
    /// The printers that ship with corescope
    pub fn builtin() -> Self {
        let types = vec![
            TypePrinter {
                name: "char",
                handler: print_string_argument,
                comment: Some("Null terminated array"),
                pointer: true,
                auto_detect: true,
            },
            TypePrinter {
                name: "std::string",
                handler: print_std_string,
                comment: None,
                pointer: true,
                auto_detect: true,
            },
            TypePrinter {
                name: "int",
                handler: print_int_argument,
                comment: Some("Use 'int' to cast supplied value as an int"),
                pointer: false,
                auto_detect: false,
            },
            TypePrinter {
                name: "int",
                handler: print_int_pointer,
                comment: Some("Use 'int*' to read int from memory"),
                pointer: true,
                auto_detect: false,
            },
            TypePrinter {
                name: "pointer",
                handler: print_void_pointer,
                comment: Some("Use to dereference a pointer locations"),
                pointer: true,
                auto_detect: false,
            },
            TypePrinter {
                name: "RAW1K",
                handler: print_raw1k,
                comment: Some("Dumps 1kB of raw data"),
                pointer: true,
                auto_detect: false,
            },
            TypePrinter {
                name: "DISASSEMBLE",
                handler: print_disassemble,
                comment: None,
                pointer: true,
                auto_detect: false,
            },
        ];

        let mut functions = vec![
            FunctionPrinter {
                name: "main",
                handler: print_main_argv,
            },
            FunctionPrinter {
                name: "jni_SetByteArrayRegion",
                handler: print_jvm_full,
            },
            FunctionPrinter {
                name: "mxSADocumentAdd",
                handler: print_jvm_full,
            },
            FunctionPrinter {
                name: "strlen",
                handler: print_strlen,
            },
            FunctionPrinter {
                name: "sprintf",
                handler: print_sprintf,
            },
            FunctionPrinter {
                name: "snprintf",
                handler: print_snprintf,
            },
            FunctionPrinter {
                name: "__libc_message",
                handler: print_libc_message,
            },
        ];
        for name in ["strcpy", "strncpy"] {
            functions.push(FunctionPrinter {
                name,
                handler: print_strcpy,
            });
        }
        for name in ["strcmp", "strncmp"] {
            functions.push(FunctionPrinter {
                name,
                handler: print_strcmp,
            });
        }
        for name in [
            "malloc",
            "calloc",
            "realloc",
            "free",
            "_int_malloc",
            "__libc_calloc",
            "malloc_consolidate",
            "cfree",
            "_int_free",
        ] {
            functions.push(FunctionPrinter {
                name,
                handler: print_corrupt_heap,
            });
        }

        Self { types, functions }
    }

    /// The built-in printers with additional ones, which take precedence
    pub fn with_extensions(
        types: impl IntoIterator<Item = TypePrinter>,
        functions: impl IntoIterator<Item = FunctionPrinter>,
    ) -> Self {
        let builtin = Self::builtin();
        Self {
            types: types.into_iter().chain(builtin.types).collect(),
            functions: functions.into_iter().chain(builtin.functions).collect(),
        }
    }

    /// Makes this registry the one returned by [`Registry::global`]
    ///
    /// # Errors
    ///
    /// Fails if the global registry is already in use.
    pub fn install(self) -> Result<()> {
        REGISTRY
            .set(self)
            .map_err(|_| AnalysisError::RegistryInitialized)
    }

    /// The registry used by analyses, the built-in one unless another one was installed
    pub fn global() -> &'static Registry {
        REGISTRY.get_or_init(Registry::builtin)
    }

    pub fn types(&self) -> &[TypePrinter] {
        &self.types
    }

    /// Finds the printer for `type_name`
    ///
    /// A trailing `*` or `&` selects the pointer variant of a type. With `auto_detect` only
    /// printers meant for stack arguments are considered.
    pub fn lookup_type(&self, type_name: &str, auto_detect: bool) -> Option<TypeHandler> {
        let (short, pointer) = match type_name.strip_suffix(|c: char| c == '*' || c == '&') {
            Some(short) => (short, true),
            None => (type_name, false),
        };
        self.types
            .iter()
            .find(|entry| {
                entry.pointer == pointer
                    && entry.name == short
                    && (!auto_detect || entry.auto_detect)
            })
            .map(|entry| entry.handler)
    }

    /// Finds the printer for a user supplied type, which is also tried as a pointer
    ///
    /// # Errors
    ///
    /// Fails if neither `type_name` nor `type_name*` has a printer.
    pub fn handler_for(&self, type_name: &str) -> Result<TypeHandler> {
        self.lookup_type(type_name, false)
            .or_else(|| self.lookup_type(&format!("{type_name}*"), false))
            .ok_or_else(|| AnalysisError::UnknownType(type_name.to_string()))
    }

    pub fn lookup_function(&self, function: &str) -> Option<FunctionHandler> {
        self.functions
            .iter()
            .find(|entry| entry.name == function)
            .map(|entry| entry.handler)
    }

    /// One line per type printer, for `--show-types`
    pub fn type_listing(&self) -> Vec<String> {
        self.types
            .iter()
            .map(|entry| match entry.comment {
                Some(comment) => format!("    {} ({comment})", entry.name),
                None => format!("    {}", entry.name),
            })
            .collect()
    }
}

/// Prints values found in the target
///
/// The printer remembers what it printed during one analysis: every pointer is printed only
/// once, and long strings go to numbered files.
pub struct Printer<'a> {
    memory: &'a dyn TargetMemory,
    registry: &'a Registry,
    file_prefix: String,
    inline: bool,
    strings_written: usize,
    processed: HashSet<u64>,
    /// `main` prints its argv, set when the process arguments weren't found elsewhere
    print_argv: bool,
    heap_warned: bool,
    jvm_warned: bool,
}

impl<'a> Printer<'a> {
    pub fn new(
        memory: &'a dyn TargetMemory,
        registry: &'a Registry,
        file_prefix: impl Into<String>,
        inline: bool,
    ) -> Self {
        Self {
            memory,
            registry,
            file_prefix: file_prefix.into(),
            inline,
            strings_written: 0,
            processed: HashSet::new(),
            print_argv: false,
            heap_warned: false,
            jvm_warned: false,
        }
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    /// Prints the NUL terminated string at `addr`
    ///
    /// Strings longer than [`INLINE_STRING_LIMIT`] or spanning lines are written to
    /// `<prefix>.<n>.txt` unless the printer is inline.
    pub fn print_string(
        &mut self,
        out: &mut dyn Presenter,
        function: &str,
        label: &str,
        addr: Addr,
    ) -> Result<()> {
        if addr.is_null() {
            return out.present(Feedback::value(function, label, "NULL"));
        }

        let value = self.memory.read_string(addr, MAX_STRING);
        if value.len() == MAX_STRING - 1 {
            warn!("String truncated to {}MB", MAX_STRING / (1024 * 1024));
        }

        if self.inline || (value.len() <= INLINE_STRING_LIMIT && !value.contains('\n')) {
            return out.present(Feedback::value(function, label, format!("\"{value}\"")));
        }

        let path = format!("{}.{}.txt", self.file_prefix, self.strings_written);
        self.strings_written += 1;
        let mut file = match File::create(&path) {
            Ok(file) => file,
            Err(e) => {
                debug!("Unable to create {path}: {e}");
                warn!("Failed to open {path} for output. Maybe you need to add -p to the command line.");
                return Ok(());
            }
        };
        out.present(Feedback::Spilled {
            function: function.to_string(),
            label: label.to_string(),
            path,
            bytes: value.len(),
        })?;
        file.write_all(value.as_bytes())?;
        Ok(())
    }

    /// Prints the data at `addr` as `type_name`, for `--address`
    pub fn print_arbitrary_type(
        &mut self,
        out: &mut dyn Presenter,
        addr: Addr,
        type_name: &str,
    ) -> Result<()> {
        match self.registry.handler_for(type_name) {
            Ok(handler) => handler(self, out, &addr.to_string(), type_name, addr),
            Err(e) => {
                warn!("{e}");
                Ok(())
            }
        }
    }

    /// Runs the printers for the arguments of one call of `function`
    pub fn display_arguments(
        &mut self,
        out: &mut dyn Presenter,
        function: &str,
        call: &FrameArguments,
    ) -> Result<()> {
        if let Some(handler) = self.registry.lookup_function(function) {
            debug!("found function handler for {function}");
            if handler(self, out, function, call)? {
                debug!("instructed by function handler not process function arguments");
                return Ok(());
            }
        }

        debug!("looking for printer functions for function {function}");
        for (i, argument) in call.arguments.merged.iter().enumerate() {
            if argument.value.is_unknown() {
                debug!("Skipping uninitialised argument {i}");
                continue;
            }
            let Ok(value) = argument.value.as_u64() else {
                continue;
            };
            if self.processed.contains(&value) {
                debug!("Skipping argument as we have already processed {value:#x}");
                continue;
            }
            let Some(handler) = self.registry.lookup_type(&argument.type_name, true) else {
                continue;
            };

            debug!("found print function for {function} {i} {}", argument.type_name);
            let label = format!("arg {}", i + 1);
            if value == 0 {
                out.present(Feedback::value(function, &label, "NULL"))?;
            } else {
                handler(self, out, function, &label, Addr::from(value))?;
                self.processed.insert(value);
            }
        }
        Ok(())
    }

    /// Prints the arguments the process was started with, from the `_argc`, `_argv` and
    /// `arg_x` variables
    ///
    /// Returns `true` if those variables don't exist. In that case `main` prints its own
    /// arguments once the call stack reaches it.
    pub fn print_process_arguments(
        &mut self,
        out: &mut dyn Presenter,
        symbols: &SymbolResolver,
    ) -> Result<bool> {
        let argc = symbols.name_to_address(ARGC_SYMBOL);
        let argv = symbols.name_to_address(ARGV_SYMBOL);
        let argx = symbols.name_to_address(ARGX_SYMBOL);
        debug!("Found arg addresses _argc:{argc:?} _argv:{argv:?} arg_x:{argx:?}");

        let (Some(argc), Some(argv), Some(argx)) = (argc, argv, argx) else {
            warn!("Unable to find internal process arguments. Will print main() arguments instead.");
            self.print_argv = true;
            return Ok(true);
        };

        let count = self.memory.read_int(argc);
        self.print_argv(out, count, argv)?;

        let extra = self.memory.read_addr(argx);
        if !extra.is_null() {
            for i in 0.. {
                let arg = self.memory.read_addr(extra.word(i));
                if arg.is_null() {
                    break;
                }
                let value = self.memory.read_string(arg, ARGV_STRING_LIMIT);
                out.present(Feedback::Text(format!("arg_x[{i}]='{value}'")))?;
            }
        }
        out.present(Feedback::Text(String::new()))?;
        Ok(false)
    }

    fn print_argv(&mut self, out: &mut dyn Presenter, argc: i32, argv: Addr) -> Result<()> {
        if argc > MAX_ARGC {
            warn!("argc too big ({argc}). Not printing argv");
            return Ok(());
        }
        for i in 0..argc.max(0) as usize {
            let arg = self.memory.read_addr(argv.word(i));
            let value = self.memory.read_string(arg, ARGV_STRING_LIMIT);
            out.present(Feedback::Text(format!("argv[{i}]='{value}'")))?;
        }
        Ok(())
    }
}

/// The merged argument `index` as an address, NULL if it is missing or unknown
fn argument(call: &FrameArguments, index: usize) -> Addr {
    call.arguments
        .merged
        .get(index)
        .and_then(|argument| argument.value.as_addr().ok())
        .unwrap_or(Addr::NULL)
}

fn argument_count(call: &FrameArguments) -> usize {
    call.arguments.merged.len()
}

fn print_string_argument(
    printer: &mut Printer<'_>,
    out: &mut dyn Presenter,
    function: &str,
    label: &str,
    value: Addr,
) -> Result<()> {
    printer.print_string(out, function, label, value)
}

fn print_std_string(
    printer: &mut Printer<'_>,
    out: &mut dyn Presenter,
    function: &str,
    label: &str,
    value: Addr,
) -> Result<()> {
    // the first member of a std::string points to its characters
    let chars = printer.memory.read_addr(value);
    printer.print_string(out, function, label, chars)
}

fn print_int_argument(
    _printer: &mut Printer<'_>,
    out: &mut dyn Presenter,
    function: &str,
    label: &str,
    value: Addr,
) -> Result<()> {
    out.present(Feedback::value(function, label, value.u64() as i32))
}

fn print_int_pointer(
    printer: &mut Printer<'_>,
    out: &mut dyn Presenter,
    function: &str,
    label: &str,
    value: Addr,
) -> Result<()> {
    let int = printer.memory.read_int(value);
    out.present(Feedback::value(function, label, int))
}

fn print_void_pointer(
    printer: &mut Printer<'_>,
    out: &mut dyn Presenter,
    function: &str,
    label: &str,
    value: Addr,
) -> Result<()> {
    let target = printer.memory.read_addr(value);
    out.present(Feedback::value(function, label, target))
}

fn print_raw1k(
    printer: &mut Printer<'_>,
    out: &mut dyn Presenter,
    _function: &str,
    _label: &str,
    value: Addr,
) -> Result<()> {
    let mut raw = [0u8; RAW_DUMP_LINE];
    for line in 0..RAW_DUMP_BYTES / RAW_DUMP_LINE {
        let addr = value + line * RAW_DUMP_LINE;
        if let Err(e) = printer.memory.read_memory(addr, &mut raw) {
            debug!("Error reading raw data at {addr}: {e}");
            return out.present(Feedback::Text("Unable to print 1k raw data".to_string()));
        }

        let hex: String = raw.iter().map(|byte| format!("{byte:02x} ")).collect();
        let chars: String = raw
            .iter()
            .map(|byte| {
                if byte.is_ascii_graphic() || *byte == b' ' {
                    *byte as char
                } else {
                    '.'
                }
            })
            .collect();
        out.present(Feedback::Text(format!("{addr}: {hex} {chars}")))?;
    }
    Ok(())
}

#[cfg(target_arch = "x86_64")]
fn print_disassemble(
    printer: &mut Printer<'_>,
    out: &mut dyn Presenter,
    _function: &str,
    _label: &str,
    value: Addr,
) -> Result<()> {
    use crate::arch::{host, ArgumentDecoder};
    use crate::arguments::CallArguments;

    let listing =
        host().decode_prologue(printer.memory, value, Addr::NULL, &mut CallArguments::default());
    out.present(Feedback::Disassembly(listing))
}

#[cfg(not(target_arch = "x86_64"))]
fn print_disassemble(
    _printer: &mut Printer<'_>,
    out: &mut dyn Presenter,
    _function: &str,
    _label: &str,
    _value: Addr,
) -> Result<()> {
    out.present(Feedback::Text(
        "Disassembly only supported on x86 64bit".to_string(),
    ))
}

fn print_main_argv(
    printer: &mut Printer<'_>,
    out: &mut dyn Presenter,
    _function: &str,
    call: &FrameArguments,
) -> Result<bool> {
    if !printer.print_argv {
        return Ok(false);
    }
    let count = argument_count(call);
    if count < 2 {
        warn!("Only {count} arguments found for main(). Can't print arguments.");
        return Ok(false);
    }

    let argc = call.arguments.merged[0].value.as_i64().unwrap_or(0) as i32;
    printer.print_argv(out, argc, argument(call, 1))?;
    Ok(false)
}

fn print_corrupt_heap(
    printer: &mut Printer<'_>,
    _out: &mut dyn Presenter,
    _function: &str,
    _call: &FrameArguments,
) -> Result<bool> {
    if !printer.heap_warned {
        printer.heap_warned = true;
        warn!("Heap memory corruption has been detected. Analysis with Purify/Valgrind is required.");
    }
    Ok(true)
}

fn print_jvm_full(
    printer: &mut Printer<'_>,
    _out: &mut dyn Presenter,
    _function: &str,
    _call: &FrameArguments,
) -> Result<bool> {
    if !printer.jvm_warned {
        printer.jvm_warned = true;
        warn!("JVM heap may be full. Consider increasing /MXJ_JVM:-Xmx to a higher value.");
    }
    Ok(true)
}

/// Prints the message glibc was about to print when it aborted
///
/// The first argument is an action and ignored, the second the format string. Only `%s`
/// conversions are filled in.
fn print_libc_message(
    printer: &mut Printer<'_>,
    out: &mut dyn Presenter,
    _function: &str,
    call: &FrameArguments,
) -> Result<bool> {
    let count = argument_count(call);
    if count < 2 {
        return Ok(false);
    }
    let format = printer
        .memory
        .read_string(argument(call, 1), LIBC_MESSAGE_LIMIT);
    if format.is_empty() {
        return Ok(false);
    }

    warn!("Encountered glibc message:");
    let mut message = String::new();
    let mut used = 0;
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            message.push(c);
            continue;
        }
        let Some(conversion) = chars.next() else {
            break;
        };
        used += 1;
        if count < used + 2 {
            out.present(Feedback::Text(message))?;
            warn!("Not enough arguments for format string");
            return Ok(false);
        }
        if conversion == 's' {
            let value = printer
                .memory
                .read_string(argument(call, 1 + used), LIBC_MESSAGE_LIMIT);
            message.push_str(&value);
        } else {
            message.push_str(&format!("== arg type {conversion} unsupported by corescope =="));
        }
    }

    out.present(Feedback::Text(message))?;
    Ok(true)
}

fn print_strlen(
    printer: &mut Printer<'_>,
    out: &mut dyn Presenter,
    function: &str,
    call: &FrameArguments,
) -> Result<bool> {
    // C functions carry no types, all arguments are taken as strings
    if argument_count(call) >= 1 {
        printer.print_string(out, function, "s", argument(call, 0))?;
    }
    Ok(true)
}

fn print_strcpy(
    printer: &mut Printer<'_>,
    out: &mut dyn Presenter,
    function: &str,
    call: &FrameArguments,
) -> Result<bool> {
    if argument_count(call) >= 2 {
        printer.print_string(out, function, "dst", argument(call, 0))?;
        printer.print_string(out, function, "src", argument(call, 1))?;
    }
    Ok(true)
}

fn print_sprintf(
    printer: &mut Printer<'_>,
    out: &mut dyn Presenter,
    function: &str,
    call: &FrameArguments,
) -> Result<bool> {
    if argument_count(call) >= 2 {
        printer.print_string(out, function, "dst", argument(call, 0))?;
        printer.print_string(out, function, "format", argument(call, 1))?;
    }
    Ok(true)
}

fn print_snprintf(
    printer: &mut Printer<'_>,
    out: &mut dyn Presenter,
    function: &str,
    call: &FrameArguments,
) -> Result<bool> {
    if argument_count(call) >= 3 {
        printer.print_string(out, function, "dst", argument(call, 0))?;
        printer.print_string(out, function, "format", argument(call, 2))?;
    }
    Ok(true)
}

fn print_strcmp(
    printer: &mut Printer<'_>,
    out: &mut dyn Presenter,
    function: &str,
    call: &FrameArguments,
) -> Result<bool> {
    if argument_count(call) >= 2 {
        printer.print_string(out, function, "s1", argument(call, 0))?;
        printer.print_string(out, function, "s2", argument(call, 1))?;
    }
    Ok(true)
}
