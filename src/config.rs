//! # Analysis Options
//!
//! Knobs shared by the library and the `corescope` binary. The binary fills them from its
//! command line, library users start from [`AnalysisOptions::default`].

use std::path::PathBuf;

use serde::Serialize;

use crate::consts::{DEFAULT_CORRUPT_STACK_SEARCH, DEFAULT_STACK_ARGUMENTS};

/// Which threads of the target are analyzed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ThreadSelection {
    /// Every thread of the process
    All,
    /// The thread with this id. `1` also selects the main thread, whatever its id.
    Id(i32),
}

impl Default for ThreadSelection {
    fn default() -> Self {
        ThreadSelection::Id(1)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOptions {
    /// Arguments printed for functions without a usable prototype
    pub stack_arguments: usize,
    /// Words searched for a valid frame after the frame chain breaks
    pub corrupt_stack_search: usize,
    /// Print every frame, not only the extracted data structures
    pub full_stack: bool,
    /// Never spill long strings into files
    pub inline: bool,
    /// Root used to resolve absolute library paths
    pub sysroot: PathBuf,
    /// Prefix of the files long strings are written to
    pub output_prefix: Option<String>,
    /// Continue when the binary doesn't match the core
    pub force: bool,
    pub threads: ThreadSelection,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            stack_arguments: DEFAULT_STACK_ARGUMENTS,
            corrupt_stack_search: DEFAULT_CORRUPT_STACK_SEARCH,
            full_stack: false,
            inline: false,
            sysroot: PathBuf::from("/"),
            output_prefix: None,
            force: false,
            threads: ThreadSelection::default(),
        }
    }
}

impl ThreadSelection {
    /// Whether the thread `id` is selected in a process whose main thread is `main`
    pub fn matches(&self, id: i32, main: Option<i32>) -> bool {
        match self {
            ThreadSelection::All => true,
            ThreadSelection::Id(wanted) => *wanted == id || (*wanted == 1 && main == Some(id)),
        }
    }
}
