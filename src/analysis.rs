//! # Analysis
//!
//! Drives one run over a [`ProcessImage`]: library list, memory map, printing of an arbitrary
//! address, the process arguments, and per thread the raw stack and the call stack with the
//! arguments of every frame.
//!
//! Everything is reported as [`Feedback`] to a [`Presenter`], in the order it is found.
//!
//! ```no_run
//! use corescope::analysis::{Analysis, Modes};
//! use corescope::config::AnalysisOptions;
//! use corescope::printers::Registry;
//! use corescope::process::ProcessImage;
//! use corescope::ui::cli::TextUi;
//!
//! let options = AnalysisOptions::default();
//! let image = ProcessImage::open_core("core.4711", None, &options)?;
//! let modes = Modes {
//!     pstack: true,
//!     ..Modes::default()
//! };
//! Analysis::new(&image, &options, Registry::global(), TextUi::new(std::io::stdout())).run(&modes)?;
//! # Ok::<(), corescope::errors::AnalysisError>(())
//! ```

use serde::Serialize;
use tracing::{debug, warn};

use crate::addr::Addr;
use crate::arch::host;
use crate::arguments::ArgumentEngine;
use crate::config::{AnalysisOptions, ThreadSelection};
use crate::errors::{AnalysisError, Result};
use crate::feedback::{Feedback, FrameReport};
use crate::memorymap::ProcessMemoryMap;
use crate::printers::{Printer, Registry};
use crate::process::{ProcessImage, ProcessKind};
use crate::stack::RawStack;
use crate::thread::Thread;
use crate::ui::Presenter;
use crate::unwind::Unwinder;

/// Type used by `--address` when no other is given
pub const DEFAULT_ADDRESS_TYPE: &str = "RAW1K";

/// What an analysis reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Modes {
    /// Print the data structures found in the arguments of known functions
    pub extract: bool,
    pub pargs: bool,
    /// Print every frame of the call stack
    pub pstack: bool,
    pub pldd: bool,
    pub pmap: bool,
    /// Words of raw stack to dump, 0 for none
    pub raw_stack: usize,
    /// Hex address or symbol to print
    pub address: Option<String>,
    /// Type the data at `address` is printed as
    pub type_name: String,
}

impl Default for Modes {
    fn default() -> Self {
        Self {
            extract: false,
            pargs: false,
            pstack: false,
            pldd: false,
            pmap: false,
            raw_stack: 0,
            address: None,
            type_name: DEFAULT_ADDRESS_TYPE.to_string(),
        }
    }
}

impl Modes {
    /// The modes of `--all`
    pub fn all() -> Self {
        Self {
            extract: true,
            pargs: true,
            pstack: true,
            pldd: true,
            ..Self::default()
        }
    }

    /// Extraction runs unless another mode was asked for
    pub fn or_extract(mut self) -> Self {
        if !self.pldd
            && !self.pmap
            && !self.pargs
            && self.address.is_none()
            && self.raw_stack == 0
        {
            self.extract = true;
        }
        self
    }
}

/// Prints the types `--type` accepts
pub fn show_types(out: &mut dyn Presenter, registry: &Registry) -> Result<()> {
    out.present(Feedback::Text(
        "This corescope binary can print the following types:".to_string(),
    ))?;
    for line in registry.type_listing() {
        out.present(Feedback::Text(line))?;
    }
    Ok(())
}

pub struct Analysis<'p, P: Presenter> {
    image: &'p ProcessImage,
    options: &'p AnalysisOptions,
    printer: Printer<'p>,
    out: P,
}

impl<'p, P: Presenter> Analysis<'p, P> {
    pub fn new(
        image: &'p ProcessImage,
        options: &'p AnalysisOptions,
        registry: &'p Registry,
        out: P,
    ) -> Self {
        Self {
            image,
            options,
            printer: Printer::new(image, registry, image.file_prefix(), options.inline),
            out,
        }
    }

    pub fn into_presenter(self) -> P {
        self.out
    }

    /// Runs every report `modes` asks for
    ///
    /// # Errors
    ///
    /// Fails if `--address` names neither a hex address nor a known symbol, or if the
    /// presenter fails.
    pub fn run(&mut self, modes: &Modes) -> Result<()> {
        let modes = modes.clone().or_extract();

        if modes.pldd {
            self.libraries()?;
        }
        if modes.pmap {
            self.memory_map()?;
        }
        if let Some(target) = &modes.address {
            self.print_address(target, &modes.type_name)?;
        }

        let fallback = modes.pargs && self.process_arguments()?;
        let call_stack = modes.pstack || modes.extract || fallback;
        if !call_stack && modes.raw_stack == 0 {
            return Ok(());
        }

        let full_stack = modes.pstack || self.options.full_stack;
        let selection = self.thread_selection();
        for thread in self.image.selected_threads(selection) {
            if selection == ThreadSelection::All {
                self.out.present(Feedback::Thread(thread.id))?;
            }
            if modes.raw_stack > 0 {
                self.raw_stack(&thread, modes.raw_stack)?;
            }
            if call_stack {
                self.call_stack(&thread, full_stack)?;
            }
        }
        Ok(())
    }

    /// The threads to analyze
    ///
    /// Cores written by valgrind carry no process id, so the main thread is unknown and all
    /// threads are analyzed.
    fn thread_selection(&self) -> ThreadSelection {
        let selection = self.options.threads;
        if self.image.kind() == ProcessKind::Core
            && self.image.pid().is_none()
            && selection == ThreadSelection::Id(1)
        {
            warn!("Unable to detect main thread ID. All threads will be processed");
            return ThreadSelection::All;
        }
        selection
    }

    pub fn libraries(&mut self) -> Result<()> {
        self.out
            .present(Feedback::Libraries(self.image.libraries().to_vec()))
    }

    pub fn memory_map(&mut self) -> Result<()> {
        self.out.present(Feedback::MemoryMap(ProcessMemoryMap::from_space(
            self.image.space(),
        )))
    }

    /// Prints the data at `target`, a hex address (`0x…`) or a symbol, as `type_name`
    ///
    /// # Errors
    ///
    /// Fails if `target` is not a valid address or not a known symbol.
    pub fn print_address(&mut self, target: &str, type_name: &str) -> Result<()> {
        let addr = match target.strip_prefix("0x") {
            Some(hex) => usize::from_str_radix(hex, 16)
                .map(Addr::from)
                .map_err(|_| AnalysisError::InvalidAddress(target.to_string()))?,
            None => {
                let addr = self
                    .image
                    .symbols()
                    .name_to_address(target)
                    .ok_or_else(|| AnalysisError::SymbolNotFound(target.to_string()))?;
                self.out.present(Feedback::Text(format!(
                    "Found Address {addr} for Symbol [{target}]"
                )))?;
                addr
            }
        };

        if addr.is_null() {
            return Ok(());
        }
        self.printer
            .print_arbitrary_type(&mut self.out, addr, type_name)?;
        self.out.present(Feedback::Text(String::new()))
    }

    /// Prints the arguments the process was started with
    ///
    /// Returns `true` if they can only be printed from the call stack, through `main`.
    pub fn process_arguments(&mut self) -> Result<bool> {
        self.printer
            .print_process_arguments(&mut self.out, self.image.symbols())
    }

    pub fn raw_stack(&mut self, thread: &Thread, words: usize) -> Result<()> {
        let image = self.image;
        let stack = RawStack::capture(
            image,
            image.symbols(),
            |addr| image.file_name(addr),
            thread,
            words,
        );
        self.out.present(Feedback::RawStack(stack))
    }

    /// Unwinds `thread` and runs the printers for the arguments of every known function
    ///
    /// With `full_stack` every frame is reported as well.
    pub fn call_stack(&mut self, thread: &Thread, full_stack: bool) -> Result<()> {
        let image = self.image;
        let arch = host();
        let unwinder = Unwinder::new(image, arch, self.options.corrupt_stack_search);
        let mut engine = ArgumentEngine::new(
            image,
            image.symbols(),
            arch,
            self.options.stack_arguments,
            full_stack,
        );

        debug!("Printing call stack of LWP {}", thread.id);
        for frame in unwinder.frames(thread) {
            let recovered = engine.recover(frame.pc, frame.frame);
            if !recovered.prologue.is_empty() {
                debug!("Prologue of {}:\n{}", recovered.symbol, recovered.prologue);
            }

            if full_stack {
                if frame.signal_handler {
                    self.out.present(Feedback::SignalHandler)?;
                }
                self.out.present(Feedback::Frame(FrameReport::new(
                    frame.pc,
                    &recovered,
                    image.file_name(frame.pc),
                )))?;
            }

            if let Some(function) = &recovered.function {
                self.printer
                    .display_arguments(&mut self.out, function, &recovered)?;
            }
        }
        Ok(())
    }
}
