//! # Frame Pointer Unwinding
//!
//! Follows the chain of saved frame pointers of a thread. Every frame starts with the caller's
//! frame pointer, followed by the return address:
//!
//! ```text
//! fp + 1 word   return address
//! fp            caller's fp  ───>  next frame
//! ```
//!
//! Frame pointers are only trusted after [`FRAME_VALIDATION_DEPTH`] links can be followed
//! from them. When the chain breaks, the stack above the broken frame is searched for a frame
//! pointer that passes this check and unwinding resumes there, with a warning that frames are
//! missing.

use serde::Serialize;
use tracing::{debug, warn};

use crate::addr::Addr;
use crate::arch::FrameUnwinder;
use crate::consts::{
    FRAME_VALIDATION_DEPTH, LARGE_FRAME_GAP, STACK_OVERFLOW_WARNING_FRAMES,
    STACK_PROGRESS_INTERVAL,
};
use crate::memory::{Residency, TargetMemory};
use crate::thread::Thread;
use crate::WORD_BYTES;

/// One frame of a call stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BacktraceFrame {
    /// Instruction pointer inside the frame's function
    pub pc: Addr,
    /// Frame pointer of the frame's function
    pub frame: Addr,
    /// `pc` was recovered from the context of a signal handler
    pub signal_handler: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Backtrace {
    pub frames: Vec<BacktraceFrame>,
    /// How often the chain was broken and unwinding resumed further up
    pub corruptions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnwindState {
    Seed,
    Walking(Addr),
    Terminated,
}

/// Walks frame pointer chains in the memory of one target
pub struct Unwinder<'a> {
    memory: &'a dyn TargetMemory,
    arch: &'a dyn FrameUnwinder,
    /// Words searched for a valid frame pointer
    search_budget: usize,
}

impl<'a> Unwinder<'a> {
    pub fn new(memory: &'a dyn TargetMemory, arch: &'a dyn FrameUnwinder, search_budget: usize) -> Self {
        Self {
            memory,
            arch,
            search_budget,
        }
    }

    /// The caller's frame pointer saved at `fp`, if it looks like one
    fn next_frame(&self, fp: Addr, limit: Addr) -> Option<Addr> {
        // stack frames only live in the core itself, never in a mapped file
        if self.memory.residency(fp) == Residency::Outside {
            debug!("Unable to read next frame from ({fp})");
            return None;
        }

        let next = match self.memory.read_word(fp) {
            Ok(word) => Addr::from(word),
            Err(e) => {
                debug!("Unable to read next frame from ({fp}): {e}");
                return None;
            }
        };

        if next.is_null() {
            return None;
        }
        if next >= limit {
            debug!("Next frame goes beyond stack ({next} >= {limit})");
            return None;
        }
        if next <= fp {
            debug!("Next frame after current frame ({next} <= {fp})");
            return None;
        }
        if !next.is_word_aligned() {
            debug!("Next frame not on word boundary {next}");
            return None;
        }
        if next - fp > LARGE_FRAME_GAP {
            debug!("Next frame far from current frame ({next} - {fp} > {LARGE_FRAME_GAP:#x})");
        }

        debug!("Next frame is ok ({next})");
        Some(next)
    }

    /// How many links, up to [`FRAME_VALIDATION_DEPTH`], can be followed from `fp`
    pub fn verify(&self, fp: Addr, limit: Addr) -> usize {
        let mut current = fp;
        for depth in 0..FRAME_VALIDATION_DEPTH {
            match self.next_frame(current, limit) {
                Some(next) => current = next,
                None => return depth,
            }
        }
        FRAME_VALIDATION_DEPTH
    }

    /// Searches word by word from `start` for a frame pointer that verifies to `depth`
    fn scan(&self, start: Addr, limit: Addr, direction: Direction, depth: usize) -> Option<Addr> {
        let mut candidate = start;
        for _ in 0..self.search_budget {
            debug!("Testing frame {candidate} for {depth}");
            if self.verify(candidate, limit) >= depth {
                return Some(candidate);
            }
            candidate = match direction {
                Direction::Up => candidate + WORD_BYTES,
                Direction::Down => candidate - WORD_BYTES,
            };
        }
        None
    }

    /// The frame pointer unwinding starts from
    ///
    /// The saved frame pointer is not always valid in the innermost frame, so the stack around
    /// the stack pointer is searched as well, first for a fully verified frame, then for any
    /// frame with at least one valid link.
    fn seed(&self, thread: &Thread, limit: Addr) -> Option<Addr> {
        if self.verify(thread.fp, limit) >= FRAME_VALIDATION_DEPTH {
            return Some(thread.fp);
        }

        let found = self
            .scan(thread.sp, limit, Direction::Up, FRAME_VALIDATION_DEPTH)
            .or_else(|| self.scan(thread.sp, limit, Direction::Down, FRAME_VALIDATION_DEPTH))
            .or_else(|| self.scan(thread.sp, limit, Direction::Up, 1));

        match found {
            Some(fp) => debug!(
                "Starting stack trace at {fp} (fp {} {:+#x})",
                thread.fp,
                fp.usize() as isize - thread.fp.usize() as isize
            ),
            None => debug!("Couldn't find a good frame"),
        }
        found
    }

    /// Iterates over the frames of `thread`, innermost first
    pub fn frames(&self, thread: &Thread) -> Frames<'_, 'a> {
        Frames {
            unwinder: self,
            thread: *thread,
            limit: thread.stack_limit(),
            state: UnwindState::Seed,
            count: 0,
            corruptions: 0,
        }
    }

    pub fn backtrace(&self, thread: &Thread) -> Backtrace {
        let mut frames = self.frames(thread);
        let collected = frames.by_ref().collect();
        Backtrace {
            frames: collected,
            corruptions: frames.corruptions(),
        }
    }
}

/// Iterator over the frames of one thread, see [`Unwinder::frames`]
pub struct Frames<'u, 'a> {
    unwinder: &'u Unwinder<'a>,
    thread: Thread,
    limit: Addr,
    state: UnwindState,
    count: usize,
    corruptions: usize,
}

impl Frames<'_, '_> {
    /// Stack corruptions encountered so far
    pub fn corruptions(&self) -> usize {
        self.corruptions
    }

    fn seed(&mut self) -> Option<BacktraceFrame> {
        match self.unwinder.seed(&self.thread, self.limit) {
            Some(fp) => {
                self.state = UnwindState::Walking(fp);
                self.emit(BacktraceFrame {
                    pc: self.thread.ip,
                    frame: fp,
                    signal_handler: false,
                })
            }
            None => {
                self.state = UnwindState::Terminated;
                None
            }
        }
    }

    fn step(&mut self, fp: Addr) -> Option<BacktraceFrame> {
        debug!("Unwinding frame at {fp}");
        let memory = self.unwinder.memory;
        let return_addr = memory.read_word(fp.word(1)).map_or(Addr::NULL, Addr::from);
        let interrupted = self
            .unwinder
            .arch
            .signal_return_address(memory, fp, return_addr);

        let next = match self.unwinder.next_frame(fp, self.limit) {
            Some(next) => next,
            None => match self
                .unwinder
                .scan(fp, self.limit, Direction::Up, FRAME_VALIDATION_DEPTH)
            {
                Some(next) => {
                    warn!("Stack corruption detected. Some stack frames will be missing!");
                    self.corruptions += 1;
                    next
                }
                None => {
                    self.state = UnwindState::Terminated;
                    return None;
                }
            },
        };

        self.state = UnwindState::Walking(next);
        self.emit(BacktraceFrame {
            pc: interrupted.unwrap_or(return_addr),
            frame: next,
            signal_handler: interrupted.is_some(),
        })
    }

    fn emit(&mut self, frame: BacktraceFrame) -> Option<BacktraceFrame> {
        self.count += 1;
        if self.count == STACK_OVERFLOW_WARNING_FRAMES {
            warn!("Stack overflow detected. Unwinding may take a long time to complete.");
        } else if self.count % STACK_PROGRESS_INTERVAL == 0 {
            warn!("Processed {} frames, currently at {}", self.count, frame.frame);
        }
        Some(frame)
    }
}

impl Iterator for Frames<'_, '_> {
    type Item = BacktraceFrame;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            UnwindState::Seed => self.seed(),
            UnwindState::Walking(fp) => self.step(fp),
            UnwindState::Terminated => None,
        }
    }
}
