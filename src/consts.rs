//! Constants shared by the unwinder, the argument recovery and the reports.
//!
//! The instrumentation tags are written into the instrumented function's frame by the opt-in
//! instrumentation macros of instrumented programs.

/// First word of an instrumentation block on the stack
pub const INSTRUMENT_START_TAG: usize = 0xCAFE_F00D;
/// Last word of an instrumentation block on the stack
pub const INSTRUMENT_END_TAG: usize = 0xFABA_BBA0;
/// How many words below the frame the end tag may be found
pub const INSTRUMENT_END_SEARCH_WORDS: usize = 100;
/// How many words below the end tag the start tag may be found
pub const INSTRUMENT_START_SEARCH_WORDS: usize = 20;

/// Maximum number of values kept per evidence source
pub const MAX_ARGS: usize = 100;

/// Frames that must be followable before a frame pointer is trusted
pub const FRAME_VALIDATION_DEPTH: usize = 3;
/// Gap between two frames above which a debug message is emitted
pub const LARGE_FRAME_GAP: usize = 0x10000;
/// Frame count that triggers the probable stack overflow warning
pub const STACK_OVERFLOW_WARNING_FRAMES: usize = 300;
/// Interval for progress warnings on very deep stacks
pub const STACK_PROGRESS_INTERVAL: usize = 1000;

/// Words searched when the frame chain is broken
pub const DEFAULT_CORRUPT_STACK_SEARCH: usize = 200;
/// Arguments shown for functions without a usable prototype
pub const DEFAULT_STACK_ARGUMENTS: usize = 8;

/// Name shown for addresses without a covering symbol
pub const UNKNOWN_SYMBOL: &str = "??????";

/// Symbol holding the virtual memory limit of the process, in bytes
pub const VM_LIMIT_SYMBOL: &str = "lPMXVmLimit";
/// Assumed virtual memory limit in MB when the process doesn't record one
#[cfg(target_pointer_width = "64")]
pub const DEFAULT_VM_LIMIT_MB: u64 = 8192;
#[cfg(not(target_pointer_width = "64"))]
pub const DEFAULT_VM_LIMIT_MB: u64 = 4096;
/// Distance to the limit at which the core is reported as probably exhausted
pub const VM_LIMIT_MARGIN_MB: u64 = 512;

/// Symbols of the process wide argument copies
pub const ARGC_SYMBOL: &str = "_argc";
pub const ARGV_SYMBOL: &str = "_argv";
pub const ARGX_SYMBOL: &str = "arg_x";
/// Above this, argc is considered garbage
pub const MAX_ARGC: i32 = 256;
/// Longest single argv string that is read
pub const ARGV_STRING_LIMIT: usize = 256;

/// Strings longer than this are written to a file unless inline output is requested
pub const INLINE_STRING_LIMIT: usize = 1024;
/// Upper bound for a single string read from the target
#[cfg(target_pointer_width = "64")]
pub const MAX_STRING: usize = 1024 * 1024 * 1024;
#[cfg(not(target_pointer_width = "64"))]
pub const MAX_STRING: usize = 1024 * 1024 * 100;
/// Chunk size for string reads before falling back to single bytes
pub const STRING_CHUNK: usize = 1024;
