//! # Live Processes
//!
//! Attaches to a running process with [ptrace](nix::sys::ptrace), stops all of its threads
//! and reads their registers and memory. The process is detached when the [`LiveProcess`]
//! is dropped, whatever happened during the analysis.

use std::fs::{self, File};
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;

use nix::sys::ptrace::{self, AddressType};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::addr::Addr;
use crate::errors::{AnalysisError, Result};
use crate::thread::Thread;
use crate::WORD_BYTES;

/// A stopped process and all the tasks that were attached
#[derive(Debug)]
pub struct LiveProcess {
    pid: Pid,
    tasks: Vec<Pid>,
    mem: Option<File>,
}

impl LiveProcess {
    /// Attaches to `pid` and every other thread of the process
    ///
    /// # Errors
    ///
    /// Fails if a task can not be attached, or if the process doesn't stop.
    pub fn attach(pid: i32) -> Result<(Self, Vec<Thread>)> {
        let main = Pid::from_raw(pid);
        ptrace::attach(main).map_err(|source| AnalysisError::Attach { pid, source })?;
        // from here on, dropping the process detaches it again
        let mut process = Self {
            pid: main,
            tasks: vec![main],
            mem: None,
        };

        match waitpid(main, None)? {
            WaitStatus::Stopped(..) => {}
            status => {
                debug!("Process {pid} reported {status:?} after attach");
                return Err(AnalysisError::NotStopped(pid));
            }
        }

        let threads = process.attach_tasks()?;
        process.mem = match File::open(format!("/proc/{pid}/mem")) {
            Ok(file) => Some(file),
            Err(e) => {
                debug!("Unable to open memory of process {pid}, falling back to ptrace: {e}");
                None
            }
        };

        Ok((process, threads))
    }

    fn attach_tasks(&mut self) -> Result<Vec<Thread>> {
        let mut ids: Vec<i32> = fs::read_dir(format!("/proc/{}/task", self.pid))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str().and_then(|s| s.parse().ok()))
            .collect();
        ids.sort_unstable();

        let mut threads = Vec::with_capacity(ids.len());
        for id in ids {
            let task = Pid::from_raw(id);
            if task != self.pid {
                ptrace::attach(task).map_err(|source| AnalysisError::Attach { pid: id, source })?;
                self.tasks.push(task);
                // give the kernel a moment to deliver the stop
                sleep(Duration::from_millis(1));
                waitpid(task, Some(WaitPidFlag::__WALL))?;
            }
            let (fp, sp, ip) = registers(task)?;
            debug!("Attached LWP {id} fp {fp} sp {sp} ip {ip}");
            threads.push(Thread::new(id, fp, sp, ip));
        }

        Ok(threads)
    }

    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// Path of the executable the process runs
    pub fn executable(&self) -> PathBuf {
        let link = PathBuf::from(format!("/proc/{}/exe", self.pid));
        fs::read_link(&link).unwrap_or(link)
    }

    /// Reads process memory through `/proc/<pid>/mem`, or word by word with ptrace
    pub fn read_memory(&self, addr: Addr, buf: &mut [u8]) -> Result<()> {
        if let Some(mem) = &self.mem {
            match mem.read_exact_at(buf, addr.u64()) {
                Ok(()) => return Ok(()),
                Err(e) => debug!("Reading {} bytes at {addr} from memory file failed: {e}", buf.len()),
            }
        }
        let result = self.peek(addr, buf);
        if result.is_err() {
            buf.fill(0);
        }
        result
    }

    fn peek(&self, addr: Addr, buf: &mut [u8]) -> Result<()> {
        let end = addr.usize().wrapping_add(buf.len());
        let mut cursor = addr.usize() & !(WORD_BYTES - 1);
        let mut written = 0;

        while cursor < end && written < buf.len() {
            let word = ptrace::read(self.pid, cursor as AddressType)?;
            let bytes = word.to_ne_bytes();
            let skip = addr.usize().saturating_sub(cursor);
            let take = (bytes.len() - skip).min(buf.len() - written);
            buf[written..written + take].copy_from_slice(&bytes[skip..skip + take]);
            written += take;
            cursor += WORD_BYTES;
        }

        Ok(())
    }
}

impl Drop for LiveProcess {
    fn drop(&mut self) {
        for task in &self.tasks {
            match ptrace::detach(*task, None) {
                Ok(()) => debug!("Detached from LWP {task}"),
                Err(e) => warn!("Failed to detach from LWP {task}: {e}"),
            }
        }
    }
}

#[cfg(target_arch = "x86_64")]
fn registers(task: Pid) -> Result<(Addr, Addr, Addr)> {
    let regs = ptrace::getregs(task)?;
    Ok((
        Addr::from(regs.rbp),
        Addr::from(regs.rsp),
        Addr::from(regs.rip),
    ))
}

#[cfg(target_arch = "x86")]
fn registers(task: Pid) -> Result<(Addr, Addr, Addr)> {
    let regs = ptrace::getregs(task)?;
    Ok((
        Addr::from(regs.ebp as usize),
        Addr::from(regs.esp as usize),
        Addr::from(regs.eip as usize),
    ))
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "x86")))]
fn registers(_task: Pid) -> Result<(Addr, Addr, Addr)> {
    Err(AnalysisError::Unsupported("reading registers of a live process"))
}
