//! # Process Image
//!
//! The root of an analysis: everything known about one process, read either from a core
//! file or from a live, stopped process.
//!
//! A [`ProcessImage`] owns the [`AddressSpace`] with all attached ELF objects, the aggregate
//! [`SymbolResolver`] and the threads of the process. Opening an image attaches the core (if
//! any) and the binary, loads the binary's symbols and split debug file, and follows the
//! dynamic loader's `r_debug` list to attach every shared library.
//!
//! # Examples
//!
//! ```no_run
//! use corescope::config::AnalysisOptions;
//! use corescope::process::ProcessImage;
//!
//! let image = ProcessImage::open_core("core.4711", None, &AnalysisOptions::default())?;
//! for thread in image.threads() {
//!     println!("LWP {} stopped at {}", thread.id, thread.ip);
//! }
//! # Ok::<(), corescope::errors::AnalysisError>(())
//! ```

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use object::elf::PT_LOAD;
use serde::Serialize;
use tracing::{debug, warn};

use crate::addr::Addr;
use crate::addrspace::{AddressSpace, SearchOrder};
use crate::config::{AnalysisOptions, ThreadSelection};
use crate::consts::{DEFAULT_VM_LIMIT_MB, VM_LIMIT_MARGIN_MB, VM_LIMIT_SYMBOL};
use crate::elf::ElfObject;
use crate::errors::{AnalysisError, Result};
use crate::live::LiveProcess;
use crate::memory::{Residency, TargetMemory};
use crate::notes::{self, ProcessInfo};
use crate::symbols::SymbolResolver;
use crate::thread::Thread;

const MB: u64 = 1024 * 1024;
/// Longest library name read from the loader's list
const LIBRARY_NAME_LIMIT: usize = 1024;
/// Bytes of the executable name the kernel keeps in a core
const COMMAND_LEN: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessKind {
    Core,
    Live,
}

/// What happens when an object can not be attached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
    /// The error is returned
    Required,
    /// The object is skipped with a diagnostic
    Optional,
}

/// Everything known about the analyzed process
///
/// Dropping the image releases all files and maps first and then, for a live process,
/// detaches from every thread, which lets the process continue.
#[derive(Debug)]
pub struct ProcessImage {
    space: AddressSpace,
    symbols: SymbolResolver,
    threads: Vec<Thread>,
    kind: ProcessKind,
    pid: Option<i32>,
    info: Option<ProcessInfo>,
    binary: PathBuf,
    file_prefix: String,
    libraries: Vec<String>,
    // declared last so it is dropped after the objects
    live: Option<LiveProcess>,
}

impl ProcessImage {
    fn empty(kind: ProcessKind) -> Self {
        Self {
            space: AddressSpace::new(),
            symbols: SymbolResolver::new(),
            threads: Vec::new(),
            kind,
            pid: None,
            info: None,
            binary: PathBuf::new(),
            file_prefix: String::new(),
            libraries: Vec::new(),
            live: None,
        }
    }

    /// Opens a core file and the binary that produced it
    ///
    /// If `binary` is [`None`], the binary recorded in the core's process information is used.
    ///
    /// # Errors
    ///
    /// Fails if the core or the binary can not be opened, if no binary is given and none is
    /// recorded, or if the binary doesn't match the core and `options.force` is not set.
    pub fn open_core(
        core: impl AsRef<Path>,
        binary: Option<&Path>,
        options: &AnalysisOptions,
    ) -> Result<Self> {
        let core = core.as_ref();
        let mut image = Self::empty(ProcessKind::Core);

        // the core is huge and only needed for its headers and notes, data is read with pread
        image.attach_required(core, Addr::NULL, true)?;
        let core_notes = image
            .space
            .object(0)
            .ok_or(AnalysisError::NoSuchObject(0))?
            .notes()?;
        let (threads, info) = match notes::HOST_LAYOUT {
            Some(layout) => notes::threads_from_notes(&core_notes, &layout),
            None => {
                warn!("Thread registers can not be read from cores on this architecture");
                (Vec::new(), None)
            }
        };
        image.threads = threads;
        image.pid = info.as_ref().map(|info| info.pid).filter(|pid| *pid != 0);

        let binary = match binary {
            Some(binary) => binary.to_path_buf(),
            None => info
                .as_ref()
                .and_then(ProcessInfo::binary)
                .map(PathBuf::from)
                .ok_or_else(|| AnalysisError::BinaryUnknown(core.to_path_buf()))?,
        };
        image.info = info;

        image.file_prefix = match image.pid {
            Some(pid) if core == Path::new("core") => format!("core_{pid}"),
            _ => core.display().to_string(),
        };

        let index = image.attach_required(&binary, Addr::NULL, false)?;
        image.binary = binary;
        image.load_symbols(index);
        image.check_core_size();
        image.load_libraries(index, &options.sysroot);
        image.check_consistency(core, options.force)?;

        if let Some(prefix) = &options.output_prefix {
            image.file_prefix = prefix.clone();
        }

        Ok(image)
    }

    /// Attaches to a running process and stops it
    ///
    /// If `binary` is [`None`], the executable is taken from `/proc/<pid>/exe`.
    ///
    /// # Errors
    ///
    /// Fails if the process can not be attached or its binary can not be opened. The process
    /// is released again on failure.
    pub fn open_pid(pid: i32, binary: Option<&Path>, options: &AnalysisOptions) -> Result<Self> {
        let (live, threads) = LiveProcess::attach(pid)?;
        let binary = binary
            .map(Path::to_path_buf)
            .unwrap_or_else(|| live.executable());

        let mut image = Self::empty(ProcessKind::Live);
        image.live = Some(live);
        image.pid = Some(pid);
        image.threads = threads;
        image.file_prefix = format!("corescope.pid{pid}");

        let index = image.attach_required(&binary, Addr::NULL, false)?;
        image.binary = binary;
        image.load_symbols(index);
        image.load_libraries(index, live_sysroot(options));

        if let Some(prefix) = &options.output_prefix {
            image.file_prefix = prefix.clone();
        }

        Ok(image)
    }

    /// Opens an ELF file and adds it to the address space
    ///
    /// Returns the index of the new object, or [`None`] if an [`Attach::Optional`] object
    /// could not be opened.
    ///
    /// # Errors
    ///
    /// Fails if an [`Attach::Required`] object can not be opened.
    pub fn attach(
        &mut self,
        path: &Path,
        base: Addr,
        headers_only: bool,
        policy: Attach,
    ) -> Result<Option<usize>> {
        let object = match ElfObject::open(path, base, headers_only) {
            Ok(object) => object,
            Err(e) => {
                return match policy {
                    Attach::Required => Err(e),
                    Attach::Optional => {
                        debug!("Skipping {}: {e}", path.display());
                        Ok(None)
                    }
                }
            }
        };

        if self.kind == ProcessKind::Core {
            if let Some(core) = self.space.object(0) {
                if let (Some(core_time), Some(time)) = (core.modified(), object.modified()) {
                    if time > core_time {
                        warn!(
                            "{} is newer than {}. Has the environment been upgraded?",
                            path.display(),
                            core.path().display()
                        );
                    }
                }
            }
        }

        Ok(Some(self.space.push(object)))
    }

    fn attach_required(&mut self, path: &Path, base: Addr, headers_only: bool) -> Result<usize> {
        self.attach(path, base, headers_only, Attach::Required)?
            .ok_or(AnalysisError::NoSuchObject(self.space.len()))
    }

    /// Adds the symbols of object `index`, and those of its split debug file if there is one
    pub fn load_symbols(&mut self, index: usize) {
        let Some(object) = self.space.object(index) else {
            return;
        };
        let tables = object.symbol_tables(index);
        let debuglink = object.debuglink();
        let base = object.base();
        let directory = object
            .path()
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        self.symbols.extend(tables);

        let Some(link) = debuglink else {
            return;
        };
        debug!("Found .gnu_debuglink with file [{link}]");
        let debug_file = directory.join(&link);
        if File::open(&debug_file).is_err() {
            debug!(
                "Unable to open Debug File [{}]. Symbols will be unavailable.",
                debug_file.display()
            );
            return;
        }

        debug!("Loading Symbols from Debug File [{}]", debug_file.display());
        match self.attach(&debug_file, base, false, Attach::Optional) {
            Ok(Some(debug_index)) => {
                if let Some(object) = self.space.object_mut(debug_index) {
                    object.discard_segments();
                    let tables = object.symbol_tables(debug_index);
                    self.symbols.extend(tables);
                }
            }
            _ => warn!(
                "Unable to open Debug File [{}]. Symbols will be unavailable.",
                debug_file.display()
            ),
        }
    }

    /// Attaches the shared libraries listed by the dynamic loader of the process
    ///
    /// The list is found through the `DT_DEBUG` entries of the binary's dynamic section.
    /// Absolute library paths are looked up below `sysroot`.
    pub fn load_libraries(&mut self, binary_index: usize, sysroot: &Path) {
        let Some(binary) = self.space.object(binary_index) else {
            return;
        };
        let slots = binary.dynamic_debug_slots();
        let binary_path = binary.path().to_string_lossy().into_owned();

        for slot in slots {
            let r_debug = match self.read_word(slot.word(1)) {
                Ok(0) => {
                    debug!("r_debug at {slot} is not initialized");
                    continue;
                }
                Ok(r_debug) => Addr::from(r_debug),
                Err(e) => {
                    debug!("Unable to read r_debug pointer at {slot}: {e}");
                    continue;
                }
            };
            debug!("Found r_debug at {r_debug}");

            let mut next = self.read_word(r_debug.word(1)).unwrap_or(0);
            let mut visited = HashSet::new();
            while next != 0 && visited.insert(next) {
                let entry = Addr::from(next);
                let l_addr = self.read_word(entry).unwrap_or(0);
                let l_name = self.read_word(entry.word(1)).unwrap_or(0);
                next = self.read_word(entry.word(3)).unwrap_or(0);

                if l_name == 0 {
                    continue;
                }
                let name = self.read_string(Addr::from(l_name), LIBRARY_NAME_LIMIT);
                if name.is_empty() {
                    continue;
                }
                if name == binary_path {
                    debug!("Found main binary [{name}] in the library list. Skipping.");
                    continue;
                }
                self.attach_library(&name, Addr::from(l_addr), sysroot);
            }
        }
    }

    fn attach_library(&mut self, name: &str, base: Addr, sysroot: &Path) {
        self.libraries.push(name.to_string());
        let path = match name.strip_prefix('/') {
            Some(relative) => sysroot.join(relative),
            None => PathBuf::from(name),
        };

        if File::open(&path).is_err() {
            warn!(
                "Unable to open [{}]. Symbols will be unavailable.",
                path.display()
            );
            return;
        }
        debug!("Loading library [{}] at {base}", path.display());
        if let Ok(Some(index)) = self.attach(&path, base, false, Attach::Optional) {
            self.load_symbols(index);
        }
    }

    /// Warns about cores that are truncated or that ran out of address space
    pub fn check_core_size(&self) {
        if self.kind != ProcessKind::Core {
            return;
        }
        let Some(core) = self.space.object(0) else {
            return;
        };

        let limit_mb = self.vm_limit_mb();
        let file_size = core.file_size();
        let mut vm_size = 0u64;
        let mut data_size = 0u64;
        let mut warned_header = false;

        for segment in core.segments().iter().filter(|s| s.p_type == PT_LOAD) {
            vm_size = vm_size.saturating_add(segment.memsz);
            data_size = data_size.saturating_add(segment.filesz);
            if segment.offset.saturating_add(segment.filesz) > file_size && !warned_header {
                warned_header = true;
                warn!(
                    "One or more program headers point beyond the end of the file. Is {} truncated?",
                    core.path().display()
                );
            }
        }

        debug!(
            "{} defines {vm_size} of vm space of which {data_size} is mapped to the file. It is {file_size} bytes in size",
            core.path().display()
        );
        if data_size > file_size {
            warn!(
                "{} defines {data_size} bytes of data but is only {file_size} bytes in size. The file appears to be truncated.",
                core.path().display()
            );
        }
        if vm_size >= limit_mb.saturating_sub(VM_LIMIT_MARGIN_MB) * MB {
            warn!(
                "{} contains {}MB of virtual memory space, and has possibly hit the {limit_mb}MB limit.",
                core.path().display(),
                vm_size / MB
            );
        }
    }

    #[cfg(target_pointer_width = "64")]
    fn vm_limit_mb(&self) -> u64 {
        let Some(addr) = self.symbols.name_to_address(VM_LIMIT_SYMBOL) else {
            debug!("{VM_LIMIT_SYMBOL} symbol not found. Assuming {DEFAULT_VM_LIMIT_MB}MB");
            return DEFAULT_VM_LIMIT_MB;
        };
        let limit = self.read_long(addr);
        debug!("Read {limit}B VM Limit from core");
        if limit <= 0 {
            debug!("VM limit of {limit}B doesn't make sense. Assuming {DEFAULT_VM_LIMIT_MB}MB");
            return DEFAULT_VM_LIMIT_MB;
        }
        limit as u64 / MB
    }

    #[cfg(not(target_pointer_width = "64"))]
    fn vm_limit_mb(&self) -> u64 {
        DEFAULT_VM_LIMIT_MB
    }

    /// Compares the binary with the executable name recorded in the core
    fn check_consistency(&self, core: &Path, force: bool) -> Result<()> {
        let Some(info) = &self.info else {
            return Ok(());
        };
        if info.command.is_empty() {
            return Ok(());
        }

        let name = self
            .binary
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let kept = &name.as_bytes()[..name.len().min(COMMAND_LEN)];
        if kept == info.command.as_bytes() {
            return Ok(());
        }

        if force {
            warn!(
                "{} doesn't match {} which was produced by {}. Continuing anyway.",
                self.binary.display(),
                core.display(),
                info.command
            );
            Ok(())
        } else {
            Err(AnalysisError::Inconsistent {
                binary: self.binary.clone(),
                core: core.to_path_buf(),
                recorded: info.command.clone(),
            })
        }
    }

    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    /// The process id, if it is known
    pub fn pid(&self) -> Option<i32> {
        self.pid
    }

    pub fn info(&self) -> Option<&ProcessInfo> {
        self.info.as_ref()
    }

    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    /// The threads matching `selection`, in the order the target reported them
    pub fn selected_threads(&self, selection: ThreadSelection) -> Vec<Thread> {
        self.threads
            .iter()
            .filter(|thread| selection.matches(thread.id, self.pid))
            .copied()
            .collect()
    }

    pub fn symbols(&self) -> &SymbolResolver {
        &self.symbols
    }

    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Prefix of the files long strings are written to
    pub fn file_prefix(&self) -> &str {
        &self.file_prefix
    }

    /// Library names as listed by the dynamic loader
    pub fn libraries(&self) -> &[String] {
        &self.libraries
    }

    /// Display name of the file an address belongs to
    pub fn file_name(&self, addr: Addr) -> String {
        self.space
            .object_for(addr)
            .map(|object| object.path().display().to_string())
            .unwrap_or_else(|| "??????".to_string())
    }

    /// Releases all objects, then the process
    pub fn close(self) {
        drop(self)
    }
}

/// Libraries of a running process are the ones installed on this host
fn live_sysroot(options: &AnalysisOptions) -> &'static Path {
    let host = Path::new("/");
    if options.sysroot != host {
        warn!(
            "Ignoring system root {} for a live process, libraries are loaded from /",
            options.sysroot.display()
        );
    }
    host
}

impl TargetMemory for ProcessImage {
    fn read_memory(&self, addr: Addr, buf: &mut [u8]) -> Result<()> {
        match &self.live {
            Some(live) => live.read_memory(addr, buf),
            None => self.space.read(addr, buf),
        }
    }

    fn residency(&self, addr: Addr) -> Residency {
        match self.kind {
            ProcessKind::Live => Residency::Unknown,
            ProcessKind::Core => match self.space.translate(addr, SearchOrder::CoreOnly) {
                Some(_) => Residency::InCore,
                None => Residency::Outside,
            },
        }
    }
}

#[cfg(all(test, target_arch = "x86_64", target_os = "linux"))]
mod test {
    use object::elf::{DT_DEBUG, PF_R, PF_W, PF_X};

    use super::*;
    use crate::testutil::{capture_logs, note, prpsinfo_x86_64, prstatus_x86_64, ElfBuilder};

    const LIB_BASE: u64 = 0x7f00_0000_0000;

    struct Fixture {
        dir: tempfile::TempDir,
        core: PathBuf,
        binary: PathBuf,
    }

    fn put(data: &mut [u8], at: usize, bytes: &[u8]) {
        data[at..at + bytes.len()].copy_from_slice(bytes);
    }

    fn fixture(command: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();

        let mut dynamic = Vec::new();
        for (tag, val) in [(DT_DEBUG as u64, 0u64), (0, 0)] {
            dynamic.extend_from_slice(&tag.to_ne_bytes());
            dynamic.extend_from_slice(&val.to_ne_bytes());
        }
        let binary = ElfBuilder::executable()
            .load(0x400000, vec![0x90; 0x1000], 0x1000, PF_R | PF_X)
            .dynamic(0x600e00, dynamic)
            .symbol("main", 0x400100, 0x40)
            .write(dir.path(), "prog");

        ElfBuilder::executable()
            .load(0, vec![0xcc; 0x1000], 0x1000, PF_R | PF_X)
            .symbol("lib_entry", 0x500, 0x20)
            .write(dir.path(), "libfake.so");

        // loader data: DT_DEBUG value, r_debug and two link_map entries
        let mut data = vec![0u8; 0x1000];
        put(&mut data, 0xe08, &0x600100u64.to_ne_bytes());
        put(&mut data, 0x100, &1u64.to_ne_bytes());
        put(&mut data, 0x108, &0x600200u64.to_ne_bytes());
        put(&mut data, 0x208, &0x600300u64.to_ne_bytes());
        put(&mut data, 0x218, &0x600240u64.to_ne_bytes());
        put(&mut data, 0x240, &LIB_BASE.to_ne_bytes());
        put(&mut data, 0x248, &0x600320u64.to_ne_bytes());
        put(&mut data, 0x320, b"/libfake.so\0");
        put(&mut data, 0x340, b"/missing.so\0");

        let psargs = format!("{} --flag", binary.display());
        let mut notes = note("CORE", notes::NT_PRSTATUS, &prstatus_x86_64(4711, 0x7ffd0f00, 0x7ffd0e00, 0x400110));
        notes.extend(note("CORE", notes::NT_PRPSINFO, &prpsinfo_x86_64(4711, command, &psargs)));
        notes.extend(note("CORE", notes::NT_PRSTATUS, &prstatus_x86_64(4712, 0, 0, 0)));

        let core = ElfBuilder::core()
            .note(notes)
            .load(0x600000, data, 0x1000, PF_R | PF_W)
            .load(0x7ffd0000, vec![0; 0x1000], 0x1000, PF_R | PF_W)
            .write(dir.path(), "core.4711");

        Fixture { dir, core, binary }
    }

    fn options(fixture: &Fixture) -> AnalysisOptions {
        AnalysisOptions {
            sysroot: fixture.dir.path().to_path_buf(),
            ..AnalysisOptions::default()
        }
    }

    #[test]
    fn test_open_core() {
        let fixture = fixture("prog");
        let image = ProcessImage::open_core(&fixture.core, None, &options(&fixture)).unwrap();

        assert_eq!(image.kind(), ProcessKind::Core);
        assert_eq!(image.pid(), Some(4711));
        assert_eq!(image.binary(), fixture.binary.as_path());
        assert_eq!(image.threads().len(), 2);
        assert_eq!(image.file_prefix(), fixture.core.display().to_string());

        let lookup = image.symbols().address_to_name(Addr::from(0x400110usize));
        assert_eq!(lookup.name(), "main");
        assert_eq!(lookup.offset(), 0x10);

        assert_eq!(image.libraries(), ["/libfake.so".to_string()]);
        let lookup = image
            .symbols()
            .address_to_name(Addr::from(LIB_BASE as usize + 0x510));
        assert_eq!(lookup.name(), "lib_entry");
        assert_eq!(lookup.offset(), 0x10);

        // library text is readable through the address space at its load bias
        let mut code = [0u8; 2];
        image
            .read_memory(Addr::from(LIB_BASE as usize + 0x10), &mut code)
            .unwrap();
        assert_eq!(code, [0xcc, 0xcc]);
        assert!(image.file_name(Addr::from(0x400010usize)).ends_with("prog"));
    }

    #[test]
    fn test_selected_threads() {
        let fixture = fixture("prog");
        let image = ProcessImage::open_core(&fixture.core, None, &options(&fixture)).unwrap();
        let main = image.selected_threads(ThreadSelection::Id(1));
        assert_eq!(main.len(), 1);
        assert_eq!(main[0].id, 4711);
        assert_eq!(image.selected_threads(ThreadSelection::Id(4712))[0].id, 4712);
        assert_eq!(image.selected_threads(ThreadSelection::All).len(), 2);
    }

    #[test]
    fn test_residency() {
        let fixture = fixture("prog");
        let image = ProcessImage::open_core(&fixture.core, None, &options(&fixture)).unwrap();
        assert_eq!(image.residency(Addr::from(0x7ffd0f00usize)), Residency::InCore);
        // binary text is not part of the core
        assert_eq!(image.residency(Addr::from(0x400100usize)), Residency::Outside);
    }

    #[test]
    fn test_dropped_text_is_reserved_in_core() {
        let fixture = fixture("prog");
        let psargs = format!("{} --flag", fixture.binary.display());
        let mut notes = note("CORE", notes::NT_PRSTATUS, &prstatus_x86_64(4711, 0x7ffd0f00, 0x7ffd0e00, 0x400110));
        notes.extend(note("CORE", notes::NT_PRPSINFO, &prpsinfo_x86_64(4711, "prog", &psargs)));
        let core = ElfBuilder::core()
            .note(notes)
            .load(0x400000, Vec::new(), 0x1000, PF_R | PF_X)
            .load(0x7ffd0000, vec![0; 0x1000], 0x1000, PF_R | PF_W)
            .write(fixture.dir.path(), "core.dropped");
        let image = ProcessImage::open_core(&core, None, &options(&fixture)).unwrap();

        // the core reserves the text range without its bytes, the binary supplies them
        assert_eq!(image.residency(Addr::from(0x400100usize)), Residency::InCore);
        assert_eq!(image.residency(Addr::from(0x500000usize)), Residency::Outside);
        let mut code = [0u8; 2];
        image.read_memory(Addr::from(0x400100usize), &mut code).unwrap();
        assert_eq!(code, [0x90, 0x90]);
    }

    #[test]
    fn test_live_sysroot() {
        let (root, logs) = capture_logs(|| live_sysroot(&AnalysisOptions::default()));
        assert_eq!(root, Path::new("/"));
        assert_eq!(logs.count("Ignoring system root"), 0);

        let options = AnalysisOptions {
            sysroot: PathBuf::from("/srv/sysroot"),
            ..AnalysisOptions::default()
        };
        let (root, logs) = capture_logs(|| live_sysroot(&options));
        assert_eq!(root, Path::new("/"));
        assert_eq!(logs.count("Ignoring system root /srv/sysroot"), 1);
    }

    #[test]
    fn test_output_prefix_override() {
        let fixture = fixture("prog");
        let options = AnalysisOptions {
            output_prefix: Some("/tmp/out".to_string()),
            ..options(&fixture)
        };
        let image = ProcessImage::open_core(&fixture.core, None, &options).unwrap();
        assert_eq!(image.file_prefix(), "/tmp/out");
    }

    #[test]
    fn test_inconsistent_binary() {
        let fixture = fixture("other");
        let err = ProcessImage::open_core(&fixture.core, None, &options(&fixture)).unwrap_err();
        assert!(matches!(err, AnalysisError::Inconsistent { .. }));

        let forced = AnalysisOptions {
            force: true,
            ..options(&fixture)
        };
        let (image, logs) =
            capture_logs(|| ProcessImage::open_core(&fixture.core, None, &forced));
        assert!(image.is_ok());
        assert_eq!(logs.count("Continuing anyway"), 1);
    }

    #[test]
    fn test_missing_library_warns() {
        let fixture = fixture("prog");
        let mut image = ProcessImage::open_core(&fixture.core, None, &options(&fixture)).unwrap();
        let (_, logs) = capture_logs(|| {
            image.attach_library("/missing.so", Addr::from(0x1000usize), fixture.dir.path())
        });
        assert_eq!(logs.count("Symbols will be unavailable"), 1);
        assert_eq!(image.libraries().len(), 2);
    }

    #[test]
    fn test_missing_binary_is_fatal() {
        let fixture = fixture("prog");
        let err = ProcessImage::open_core(
            &fixture.core,
            Some(Path::new("/nonexistent/prog")),
            &options(&fixture),
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::Io(_)));
    }
}
