use std::ffi::OsString;
use std::io::stdout;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use corescope::analysis::{show_types, Analysis, Modes, DEFAULT_ADDRESS_TYPE};
use corescope::config::{AnalysisOptions, ThreadSelection};
use corescope::consts::{DEFAULT_CORRUPT_STACK_SEARCH, DEFAULT_STACK_ARGUMENTS};
use corescope::errors::AnalysisError;
use corescope::printers::Registry;
use corescope::process::ProcessImage;
use corescope::ui::cli::TextUi;
use corescope::ui::json::JsonUi;
use corescope::ui::Presenter;

use clap::Parser;
use nix::sys::resource::{getrlimit, setrlimit, Resource};
use tracing::{debug, error, trace, warn};

/// Open files needed for a process with many libraries
const MIN_OPEN_FILES: u64 = 1024;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about,
    help_template = r#"{about-section}
{usage-heading} {usage}
{all-args}{tab}

{name}: v{version}
"#
)]
/// Inspect core dumps and live processes
///
/// Prints call stacks with recovered arguments, the data structures those arguments point to,
/// process arguments, loaded libraries and the memory map, without debug information.
///
/// Linked as pargs, pldd, pstack or pmap, the matching mode is enabled by default.
struct Args {
    #[arg(short = 'g', long, help_heading = "Standard Modes")]
    /// Extract known data structures from stack (default)
    extract: bool,

    #[arg(short = 'm', long, help_heading = "Standard Modes")]
    /// Print process arguments
    pargs: bool,

    #[arg(short = 's', long, help_heading = "Standard Modes")]
    /// Print stack trace, implies --extract
    pstack: bool,

    #[arg(short = 'b', long, help_heading = "Standard Modes")]
    /// Print loaded libraries
    pldd: bool,

    #[arg(short = 'e', long, help_heading = "Standard Modes")]
    /// The same as --extract --pargs --pstack --pldd
    all: bool,

    #[arg(short = 'c', long, help_heading = "Advanced Modes")]
    /// Print memory map of process
    pmap: bool,

    #[arg(short = 't', long, help_heading = "Advanced Modes")]
    /// Print supported data types and exit
    show_types: bool,

    #[arg(short = 'r', long, value_name = "N", default_value = "0", value_parser = parse_count, help_heading = "Advanced Modes")]
    /// Print N words of the raw stack
    raw_stack: usize,

    #[arg(short = 'x', long, value_name = "ADDR", help_heading = "Advanced Modes")]
    /// Print data structure at ADDR, a hex address (0x1234) or a symbol. Use with --type.
    address: Option<String>,

    #[arg(short = 'i', long)]
    /// Print all data to stdout rather than creating files
    inline: bool,

    #[arg(short = 'k', long)]
    /// Run even if the binary doesn't match the core
    force: bool,

    #[arg(short = 'a', long = "args", value_name = "N", default_value_t = DEFAULT_STACK_ARGUMENTS)]
    /// Print N arguments for functions when we don't know better. Use with --pstack.
    stack_arguments: usize,

    #[arg(short = 'd', long = "type", value_name = "TYPE", default_value = DEFAULT_ADDRESS_TYPE)]
    /// Type of data structure printed by --address. Use -t to list supported types.
    type_name: String,

    #[arg(short = 'f', long)]
    /// Process all threads, rather than just the first
    all_threads: bool,

    #[arg(short = 'l', long, value_name = "PATH", default_value = "/")]
    /// Use PATH as system root for loading libraries with absolute references
    sysroot: PathBuf,

    #[arg(short = 'p', long, value_name = "PATH")]
    /// Use PATH as the prefix for output files. If unspecified, the core file name is used.
    output_prefix: Option<String>,

    #[arg(short = 'j', long, value_name = "N", default_value_t = DEFAULT_CORRUPT_STACK_SEARCH)]
    /// Search this many words for a valid frame in the case of stack corruption
    corrupt_stack: usize,

    #[arg(short = 'v', long)]
    /// Print debugging and troubleshooting information
    verbose: bool,

    #[arg(long)]
    /// Print one JSON object per line instead of text
    json: bool,

    #[arg(
        value_name = "[BINARY] {PID|CORE}[/LWP]",
        num_args = 1..=2,
        required_unless_present = "show_types"
    )]
    /// The binary is detected if omitted. LWP selects the thread to analyse, the first by default.
    targets: Vec<String>,
}

/// What a `{pid|core}[/lwp]` argument refers to
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Pid(i32),
    Core(PathBuf),
}

/// Splits off a trailing `/<lwp>` and decides between pid and core
fn parse_target(raw: &str) -> (Target, Option<i32>) {
    let mut base = raw;
    let mut lwp = None;
    if let Some((head, tail)) = raw.rsplit_once('/') {
        if tail.bytes().all(|b| b.is_ascii_digit()) {
            debug!("Only displaying LWP {tail}");
            lwp = Some(tail.parse().unwrap_or(0));
            base = head;
        }
    }

    let target = match base.parse::<i32>() {
        Ok(pid) if base.bytes().all(|b| b.is_ascii_digit()) => Target::Pid(pid),
        _ => Target::Core(PathBuf::from(base)),
    };
    (target, lwp)
}

fn parse_count(raw: &str) -> Result<usize, String> {
    match raw.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => raw.parse(),
    }
    .map_err(|e| format!("{raw} is not a number: {e}"))
}

/// Modes enabled by the name the binary was invoked as
fn link_modes(argv0: Option<OsString>) -> Modes {
    let command = argv0
        .as_deref()
        .and_then(|arg| Path::new(arg).file_name())
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    Modes {
        pargs: command == "pargs",
        pldd: command == "pldd",
        pstack: command == "pstack",
        pmap: command == "pmap",
        ..Modes::default()
    }
}

fn modes(args: &Args, linked: Modes) -> Modes {
    let mut modes = if args.all { Modes::all() } else { linked };
    modes.extract |= args.extract || args.pstack;
    modes.pargs |= args.pargs;
    modes.pstack |= args.pstack;
    modes.pldd |= args.pldd;
    modes.pmap |= args.pmap;
    modes.raw_stack = args.raw_stack;
    modes.address = args.address.clone();
    modes.type_name = args.type_name.clone();
    modes
}

fn thread_selection(all_threads: bool, lwp: Option<i32>) -> ThreadSelection {
    match lwp {
        Some(0) => ThreadSelection::All,
        Some(id) => ThreadSelection::Id(id),
        None if all_threads => ThreadSelection::All,
        None => ThreadSelection::default(),
    }
}

fn main() -> ExitCode {
    human_panic::setup_panic!();

    let linked = link_modes(std::env::args_os().next());
    let args = Args::parse();
    setup_logger(args.verbose);

    let result = if args.json {
        run(&args, linked, JsonUi::new(stdout().lock()))
    } else {
        run(&args, linked, TextUi::new(stdout().lock()))
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args, linked: Modes, mut out: impl Presenter) -> Result<(), AnalysisError> {
    if args.show_types {
        return show_types(&mut out, Registry::global());
    }

    let Some((target, rest)) = args.targets.split_last() else {
        return Ok(());
    };
    let binary = rest.first().map(Path::new);
    let (target, lwp) = parse_target(target);
    let modes = modes(args, linked);

    let options = AnalysisOptions {
        stack_arguments: args.stack_arguments,
        corrupt_stack_search: args.corrupt_stack,
        full_stack: modes.pstack,
        inline: args.inline,
        sysroot: args.sysroot.clone(),
        output_prefix: args.output_prefix.clone(),
        force: args.force,
        threads: thread_selection(args.all_threads, lwp),
    };
    debug!("analysis options: {options:?}");

    raise_open_files();

    let image = match target {
        Target::Core(core) => {
            debug!("opening core {}", core.display());
            ProcessImage::open_core(&core, binary, &options)?
        }
        Target::Pid(pid) => {
            debug!("opening live process {pid}");
            ProcessImage::open_pid(pid, binary, &options)?
        }
    };

    let mut analysis = Analysis::new(&image, &options, Registry::global(), out);
    analysis.run(&modes)?;
    drop(analysis);
    image.close();

    Ok(())
}

/// Every attached object keeps a file open
fn raise_open_files() {
    let (soft, hard) = match getrlimit(Resource::RLIMIT_NOFILE) {
        Ok(limits) => limits,
        Err(e) => {
            debug!("getrlimit: {e}");
            warn!("Unable to detect current file limit");
            return;
        }
    };
    if soft >= MIN_OPEN_FILES {
        return;
    }
    let wanted = MIN_OPEN_FILES.min(hard);
    if let Err(e) = setrlimit(Resource::RLIMIT_NOFILE, wanted, hard) {
        debug!("setrlimit: {e}");
        warn!("Unable to increase current file limit to {wanted}");
    }
}

fn setup_logger(verbose: bool) {
    // warnings and diagnostics go to stderr, reports to stdout
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .without_time()
        .with_file(false)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("could not setup logger: {e}");
    }
    trace!("set up the logger");
}
