//! Raw dump of the words on a thread's stack, annotated with symbols and frame boundaries

use std::fmt::Display;

use serde::Serialize;
use tracing::debug;

use crate::addr::Addr;
use crate::memory::TargetMemory;
use crate::symbols::{demangle, SymbolResolver};
use crate::thread::Thread;
use crate::{Word, WORD_BYTES};

/// Annotation for values pointing back into the dumped stack
const STACK_POINTER: &str = "STACKPOINTER";

/// One word of a [`RawStack`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackWord {
    pub addr: Addr,
    pub value: Word,
    /// The symbol covering the value, or [`STACK_POINTER`] for values inside the dump
    pub symbol: String,
    pub offset: u64,
    /// The file the value points into
    pub file: String,
    /// The word holds the saved frame pointer of a frame
    pub frame: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawStack {
    thread: Thread,
    words: Vec<StackWord>,
}

impl RawStack {
    /// Reads the words from the stack pointer of `thread` upward
    ///
    /// The whole stack is read if its extent is known, `words` words otherwise. The saved frame
    /// pointers are marked by following the chain from the frame pointer of `thread`.
    pub fn capture(
        memory: &dyn TargetMemory,
        symbols: &SymbolResolver,
        file_name: impl Fn(Addr) -> String,
        thread: &Thread,
        words: usize,
    ) -> Self {
        let count = match thread.stack {
            Some(bounds) => bounds.size / WORD_BYTES,
            None => words,
        };
        debug!("Printing {count} words of stack");

        let dump_end = thread.sp.usize().saturating_add(count * WORD_BYTES);
        let mut next_frame = thread.fp;
        let mut out = Vec::with_capacity(count);

        for i in 0..count {
            let addr = thread.sp.word(i);
            // unreadable words show as zero
            let value = memory.read_word(addr).unwrap_or(0);

            let (symbol, offset) = if value > thread.sp.usize() && value < dump_end {
                (STACK_POINTER.to_string(), (value - thread.sp.usize()) as u64)
            } else {
                let lookup = symbols.address_to_name(Addr::from(value));
                (demangle(lookup.name()), lookup.offset())
            };

            let frame = addr == next_frame;
            if frame {
                next_frame = Addr::from(value);
            }

            out.push(StackWord {
                addr,
                value,
                symbol,
                offset,
                file: file_name(Addr::from(value)),
                frame,
            });
        }

        Self {
            thread: *thread,
            words: out,
        }
    }

    pub fn words(&self) -> &[StackWord] {
        &self.words
    }
}

impl Display for RawStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (base, size) = self
            .thread
            .stack
            .map_or((Addr::NULL, 0), |bounds| (bounds.base, bounds.size));
        write!(
            f,
            "Dumping Stack sp:{} fp:{} ip:{} stack:{} size:{:#018x}",
            self.thread.sp, self.thread.fp, self.thread.ip, base, size
        )?;

        for (idx, w) in self.words.iter().enumerate() {
            write!(
                f,
                "\n{}   {}: {:#018x} == {} + {:#x} ({}) [{}]",
                idx * WORD_BYTES,
                w.addr,
                w.value,
                w.symbol,
                w.offset,
                w.offset,
                w.file
            )?;
            if w.frame {
                write!(f, " ******** FRAME ********")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::FakeMemory;

    const SP: usize = 0x7ffe_0000;

    fn unknown_file(_: Addr) -> String {
        "??????".to_string()
    }

    #[test]
    fn test_frames_are_marked() {
        let w = WORD_BYTES;
        // fp at sp + 2 words, chained to sp + 4 words
        let memory = FakeMemory::default().with_words(
            SP,
            &[0, 0x1234, SP + 4 * w, 0x401000, 0, SP + 2 * w],
        );
        let thread = Thread::new(1, Addr::from(SP + 2 * w), Addr::from(SP), Addr::from(0x401000usize));
        let stack = RawStack::capture(&memory, &SymbolResolver::new(), unknown_file, &thread, 6);

        let frames: Vec<usize> = stack
            .words()
            .iter()
            .enumerate()
            .filter(|(_, word)| word.frame)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(frames, vec![2, 4]);

        // values pointing into the dump are annotated with their distance from sp
        assert_eq!(stack.words()[2].symbol, STACK_POINTER);
        assert_eq!(stack.words()[2].offset, 4 * w as u64);
        assert_eq!(stack.words()[5].offset, 2 * w as u64);
        assert_eq!(stack.words()[1].symbol, "??????");
    }

    #[test]
    fn test_dump_text() {
        let memory = FakeMemory::default().with_words(SP, &[0x10]);
        let thread = Thread::new(1, Addr::from(SP), Addr::from(SP), Addr::NULL);
        let text = RawStack::capture(&memory, &SymbolResolver::new(), unknown_file, &thread, 2)
            .to_string();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Dumping Stack sp:0x000000007ffe0000"));
        assert_eq!(
            lines[1],
            "0   0x000000007ffe0000: 0x0000000000000010 == ?????? + 0x0 (0) [??????] ******** FRAME ********"
        );
        // the second word isn't readable
        assert!(lines[2].contains(": 0x0000000000000000 == ??????"));
        assert!(!lines[2].contains("FRAME"));
    }
}
