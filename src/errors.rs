use std::path::PathBuf;

use thiserror::Error;

use crate::addr::Addr;

pub type Result<T> = std::result::Result<T, AnalysisError>;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Os error: {0}")]
    Os(#[from] nix::Error),
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not parse ELF data: {0}")]
    Object(#[from] object::read::Error),
    #[error("Unable to open {path} as it isn't a valid ELF file, or isn't supported: {reason}")]
    InvalidElf { path: PathBuf, reason: String },
    #[error("Could not find vm address {0} in any mapped object")]
    NotMapped(Addr),
    #[error("Memory range {addr} (+{len:#x}) spans two mapped objects")]
    SpansObjects { addr: Addr, len: usize },
    #[error("Object index {0} is not attached")]
    NoSuchObject(usize),
    #[error("Unable to determine the binary for {0}, pass it explicitly")]
    BinaryUnknown(PathBuf),
    #[error("Failed to attach to process/LWP {pid}: {source}")]
    Attach { pid: i32, source: nix::Error },
    #[error("Process {0} hasn't stopped")]
    NotStopped(i32),
    #[error("{0} is not supported on this architecture")]
    Unsupported(&'static str),
    #[error("{binary} does not match {core} (core was produced by {recorded}), use --force to continue")]
    Inconsistent {
        binary: PathBuf,
        core: PathBuf,
        recorded: String,
    },
    #[error("Argument value of {size} bytes can not be read as {requested}")]
    ValueTag {
        size: usize,
        requested: &'static str,
    },
    #[error("Unable to find handler for type {0}. Use -t to list supported types.")]
    UnknownType(String),
    #[error("{0} is not a valid hex address")]
    InvalidAddress(String),
    #[error("Could not find address for symbol [{0}]")]
    SymbolNotFound(String),
    #[error("The printer registry was already initialized")]
    RegistryInitialized,
    #[error("Could not serialize output: {0}")]
    Json(#[from] serde_json::Error),
}
