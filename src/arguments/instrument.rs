//! Instrumented programs push their arguments between two tag words before calling into
//! interesting code:
//!
//! ```text
//! higher addresses   frame
//!                    ...
//!                    INSTRUMENT_END_TAG
//!                    argument n
//!                    ...
//!                    argument 1
//! lower addresses    INSTRUMENT_START_TAG
//! ```

use tracing::debug;

use super::ArgValue;
use crate::addr::Addr;
use crate::consts::{
    INSTRUMENT_END_SEARCH_WORDS, INSTRUMENT_END_TAG, INSTRUMENT_START_SEARCH_WORDS,
    INSTRUMENT_START_TAG,
};
use crate::memory::TargetMemory;
use crate::WORD_BYTES;

/// Finds instrumentation blocks below successive frames of one thread
///
/// A block is only reported once: the search for the next frame stops above the end tag of
/// the last block found.
#[derive(Debug, Clone, Default)]
pub struct InstrumentationScanner {
    last_tag: Addr,
}

impl InstrumentationScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Searches downward from `start`, at most `words` words, for `tag`
    fn find(&self, memory: &dyn TargetMemory, start: Addr, words: usize, tag: usize) -> Option<Addr> {
        let lowest = start.usize().saturating_sub(words * WORD_BYTES);
        let mut cursor = start;
        while cursor > self.last_tag && cursor.usize() > lowest {
            if memory.read_word(cursor).ok() == Some(tag) {
                return Some(cursor);
            }
            cursor -= WORD_BYTES;
        }
        None
    }

    /// The instrumented arguments belonging to the frame at `frame`, oldest first
    pub fn scan(&mut self, memory: &dyn TargetMemory, frame: Addr) -> Vec<ArgValue> {
        let Some(end) = self.find(memory, frame, INSTRUMENT_END_SEARCH_WORDS, INSTRUMENT_END_TAG)
        else {
            debug!("No instrumentation data below frame {frame}");
            return Vec::new();
        };
        debug!("Instrumentation end tag at {end}");

        let Some(start) = self.find(memory, end, INSTRUMENT_START_SEARCH_WORDS, INSTRUMENT_START_TAG)
        else {
            debug!("Failed to find the instrumentation start tag below {end}");
            return Vec::new();
        };
        debug!("Instrumentation start tag at {start}");
        self.last_tag = end;

        let count = (end - start) / WORD_BYTES;
        (1..count)
            .map(|i| match memory.read_word(start.word(i)) {
                Ok(word) => ArgValue::word(word),
                Err(e) => {
                    debug!("Error reading instrumented argument {i}: {e}");
                    ArgValue::unknown()
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::FakeMemory;

    const BASE: usize = 0x10000;

    fn stack(words: &[usize]) -> FakeMemory {
        FakeMemory::default().with_words(BASE, words)
    }

    fn at(index: usize) -> Addr {
        Addr::from(BASE).word(index)
    }

    #[test]
    fn test_block_below_frame() {
        let memory = stack(&[
            0,
            INSTRUMENT_START_TAG,
            11,
            22,
            INSTRUMENT_END_TAG,
            0,
            0,
        ]);
        let mut scanner = InstrumentationScanner::new();
        let values = scanner.scan(&memory, at(6));
        let values: Vec<u64> = values.iter().map(|v| v.as_u64().unwrap()).collect();
        assert_eq!(values, vec![11, 22]);
    }

    #[test]
    fn test_block_is_reported_once() {
        let memory = stack(&[
            INSTRUMENT_START_TAG,
            5,
            INSTRUMENT_END_TAG,
            0,
            0,
            0,
        ]);
        let mut scanner = InstrumentationScanner::new();
        assert_eq!(scanner.scan(&memory, at(3)).len(), 1);
        assert!(scanner.scan(&memory, at(5)).is_empty());
    }

    #[test]
    fn test_missing_start_tag() {
        let memory = stack(&[0, 1, 2, INSTRUMENT_END_TAG, 0]);
        let mut scanner = InstrumentationScanner::new();
        assert!(scanner.scan(&memory, at(4)).is_empty());
        // the end tag stays eligible for the next frame
        assert_eq!(scanner.last_tag, Addr::NULL);
    }

    #[test]
    fn test_empty_block() {
        let memory = stack(&[INSTRUMENT_START_TAG, INSTRUMENT_END_TAG, 0]);
        let mut scanner = InstrumentationScanner::new();
        assert!(scanner.scan(&memory, at(2)).is_empty());
        assert_eq!(scanner.last_tag, at(1));
    }
}
