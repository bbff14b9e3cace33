//! # Core Notes
//!
//! Extracts thread registers (`NT_PRSTATUS`) and process information (`NT_PRPSINFO`) from the
//! note segments of a core file. The layout of both records differs between architectures and
//! is described by a [`CoreLayout`].

use serde::Serialize;
use tracing::{debug, info};

use crate::addr::Addr;
use crate::elf::Note;
use crate::thread::Thread;

pub const NT_PRSTATUS: u32 = 1;
pub const NT_PRPSINFO: u32 = 3;

const FNAME_LEN: usize = 16;
const PSARGS_LEN: usize = 80;

/// Offsets into the `elf_prstatus` and `elf_prpsinfo` records of one architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreLayout {
    /// Width of one saved register
    pub register_bytes: usize,
    pub prstatus_pid: usize,
    pub prstatus_regs: usize,
    /// Register indexes inside `pr_reg`
    pub reg_fp: usize,
    pub reg_sp: usize,
    pub reg_ip: usize,
    pub prpsinfo_pid: usize,
    pub prpsinfo_fname: usize,
    pub prpsinfo_psargs: usize,
}

pub const X86_64_LAYOUT: CoreLayout = CoreLayout {
    register_bytes: 8,
    prstatus_pid: 32,
    prstatus_regs: 112,
    reg_fp: 4,
    reg_sp: 19,
    reg_ip: 16,
    prpsinfo_pid: 24,
    prpsinfo_fname: 40,
    prpsinfo_psargs: 56,
};

pub const X86_LAYOUT: CoreLayout = CoreLayout {
    register_bytes: 4,
    prstatus_pid: 24,
    prstatus_regs: 72,
    reg_fp: 5,
    reg_sp: 15,
    reg_ip: 12,
    prpsinfo_pid: 12,
    prpsinfo_fname: 28,
    prpsinfo_psargs: 44,
};

pub const AARCH64_LAYOUT: CoreLayout = CoreLayout {
    register_bytes: 8,
    prstatus_pid: 32,
    prstatus_regs: 112,
    reg_fp: 29,
    reg_sp: 31,
    reg_ip: 32,
    prpsinfo_pid: 24,
    prpsinfo_fname: 40,
    prpsinfo_psargs: 56,
};

#[cfg(target_arch = "x86_64")]
pub const HOST_LAYOUT: Option<CoreLayout> = Some(X86_64_LAYOUT);
#[cfg(target_arch = "x86")]
pub const HOST_LAYOUT: Option<CoreLayout> = Some(X86_LAYOUT);
#[cfg(target_arch = "aarch64")]
pub const HOST_LAYOUT: Option<CoreLayout> = Some(AARCH64_LAYOUT);
#[cfg(not(any(target_arch = "x86_64", target_arch = "x86", target_arch = "aarch64")))]
pub const HOST_LAYOUT: Option<CoreLayout> = None;

/// What the core recorded about the process that dumped it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub pid: i32,
    /// The executable's file name, truncated by the kernel to 15 bytes
    pub command: String,
    /// The start of the command line
    pub args: String,
}

impl ProcessInfo {
    /// The binary path, taken from the command line up to its first space
    pub fn binary(&self) -> Option<&str> {
        let binary = self.args.split(' ').next().unwrap_or("");
        (!binary.is_empty()).then_some(binary)
    }
}

fn c_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).trim_end().to_string()
}

fn read_i32(raw: &[u8], at: usize) -> Option<i32> {
    let bytes = raw.get(at..at + 4)?;
    Some(i32::from_ne_bytes(bytes.try_into().ok()?))
}

fn read_register(raw: &[u8], at: usize, width: usize) -> Option<Addr> {
    let bytes = raw.get(at..at + width)?;
    match width {
        8 => Some(Addr::from(u64::from_ne_bytes(bytes.try_into().ok()?))),
        4 => Some(Addr::from(u32::from_ne_bytes(bytes.try_into().ok()?) as usize)),
        _ => None,
    }
}

fn thread_from_prstatus(desc: &[u8], layout: &CoreLayout) -> Option<Thread> {
    let id = read_i32(desc, layout.prstatus_pid)?;
    let reg = |idx: usize| {
        read_register(
            desc,
            layout.prstatus_regs + idx * layout.register_bytes,
            layout.register_bytes,
        )
    };
    Some(Thread::new(
        id,
        reg(layout.reg_fp)?,
        reg(layout.reg_sp)?,
        reg(layout.reg_ip)?,
    ))
}

fn info_from_prpsinfo(desc: &[u8], layout: &CoreLayout) -> Option<ProcessInfo> {
    let pid = read_i32(desc, layout.prpsinfo_pid)?;
    let fname = desc.get(layout.prpsinfo_fname..layout.prpsinfo_fname + FNAME_LEN)?;
    let psargs_end = (layout.prpsinfo_psargs + PSARGS_LEN).min(desc.len());
    let psargs = desc.get(layout.prpsinfo_psargs..psargs_end)?;
    Some(ProcessInfo {
        pid,
        command: c_string(fname),
        args: c_string(psargs),
    })
}

/// The threads and the process information recorded in the notes of a core
///
/// Records that are too short for `layout` are skipped.
pub fn threads_from_notes(notes: &[Note], layout: &CoreLayout) -> (Vec<Thread>, Option<ProcessInfo>) {
    let mut threads = Vec::new();
    let mut info = None;

    for note in notes {
        match note.n_type {
            NT_PRSTATUS => match thread_from_prstatus(&note.desc, layout) {
                Some(thread) => {
                    debug!(
                        "Found thread {} fp {} sp {} ip {}",
                        thread.id, thread.fp, thread.sp, thread.ip
                    );
                    threads.push(thread);
                }
                None => debug!("Skipping short NT_PRSTATUS note of {} bytes", note.desc.len()),
            },
            NT_PRPSINFO => {
                info = info_from_prpsinfo(&note.desc, layout);
                if let Some(info) = &info {
                    info!("Loading core for PID: {} Command: {}", info.pid, info.args);
                }
            }
            _ => {}
        }
    }

    (threads, info)
}
