//! # Address Space
//!
//! The ordered list of ELF objects that together describe the memory of the analyzed process,
//! and the translation of virtual addresses into file offsets of those objects.
//!
//! The core file, if any, is always object 0. It is followed by the binary and then by shared
//! libraries and debug files in the order they were attached.

use tracing::{debug, warn};

use crate::addr::Addr;
use crate::elf::ElfObject;
use crate::errors::{AnalysisError, Result};

/// The order in which objects are searched when translating an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOrder {
    /// Core first, then the other objects in attachment order
    CoreFirst,
    /// The last attached object first, the core last
    CoreLast,
    /// Only the core
    CoreOnly,
    /// Only the object with this index
    FileOnly(usize),
}

/// Where a virtual address is found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation {
    /// Backed by file content at `offset` of object `object`
    Mapped { object: usize, offset: u64 },
    /// Reserved by a segment of `object` without file content; reads as zeros
    Unbacked { object: usize },
}

impl Translation {
    pub fn object(&self) -> usize {
        match self {
            Translation::Mapped { object, .. } | Translation::Unbacked { object } => *object,
        }
    }
}

#[derive(Debug, Default)]
pub struct AddressSpace {
    objects: Vec<ElfObject>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an object at the end of the search order and returns its index
    pub fn push(&mut self, object: ElfObject) -> usize {
        self.objects.push(object);
        self.objects.len() - 1
    }

    pub fn objects(&self) -> &[ElfObject] {
        &self.objects
    }

    pub fn object(&self, index: usize) -> Option<&ElfObject> {
        self.objects.get(index)
    }

    pub fn object_mut(&mut self, index: usize) -> Option<&mut ElfObject> {
        self.objects.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn candidates(&self, order: SearchOrder) -> Vec<usize> {
        let count = self.objects.len();
        match order {
            SearchOrder::CoreFirst => (0..count).collect(),
            SearchOrder::CoreLast => (0..count).rev().collect(),
            SearchOrder::CoreOnly => (0..count.min(1)).collect(),
            SearchOrder::FileOnly(index) if index < count => vec![index],
            SearchOrder::FileOnly(_) => Vec::new(),
        }
    }

    /// Finds the object and file offset backing `addr`
    ///
    /// A segment whose file content covers the address wins over segments that only reserve
    /// it, so the search continues after such a hit.
    pub fn translate(&self, addr: Addr, order: SearchOrder) -> Option<Translation> {
        let addr = addr.u64();
        let mut unbacked = None;

        for index in self.candidates(order) {
            let object = &self.objects[index];
            for segment in object.load_segments() {
                let start = object.base().u64().wrapping_add(segment.vaddr);
                if addr < start {
                    continue;
                }
                let delta = addr - start;
                if delta < segment.filesz {
                    return Some(Translation::Mapped {
                        object: index,
                        offset: segment.offset + delta,
                    });
                }
                if delta < segment.memsz {
                    unbacked = Some(Translation::Unbacked { object: index });
                }
            }
        }

        unbacked
    }

    /// Reads memory, searching the core first
    ///
    /// # Errors
    ///
    /// Fails if either end of the range is unmapped or if the two ends lie in different
    /// objects. A range with one backed and one unbacked end is not an error, it reads as
    /// zeros with a warning.
    pub fn read(&self, addr: Addr, buf: &mut [u8]) -> Result<()> {
        self.read_ordered(addr, buf, SearchOrder::CoreFirst)
    }

    /// Reads memory from the object with index `index` only
    pub fn read_from_object(&self, addr: Addr, buf: &mut [u8], index: usize) -> Result<()> {
        if index >= self.objects.len() {
            return Err(AnalysisError::NoSuchObject(index));
        }
        self.read_ordered(addr, buf, SearchOrder::FileOnly(index))
    }

    fn read_ordered(&self, addr: Addr, buf: &mut [u8], order: SearchOrder) -> Result<()> {
        buf.fill(0);
        if buf.is_empty() {
            return Ok(());
        }

        let last = addr
            .checked_add(buf.len() - 1)
            .ok_or(AnalysisError::NotMapped(addr))?;
        let start = self.translate(addr, order).ok_or_else(|| {
            debug!("Could not find vm address {addr}. Check pmap.");
            AnalysisError::NotMapped(addr)
        })?;
        let end = self.translate(last, order).ok_or_else(|| {
            debug!("Could not find vm address {last}. Check pmap.");
            AnalysisError::NotMapped(last)
        })?;

        if start.object() != end.object() {
            debug!(
                "Read of {} bytes at {addr} goes across 2 elf files ({} and {})",
                buf.len(),
                start.object(),
                end.object()
            );
            return Err(AnalysisError::SpansObjects {
                addr,
                len: buf.len(),
            });
        }

        match (start, end) {
            (Translation::Mapped { object, offset }, Translation::Mapped { .. }) => {
                let result = self.objects[object].read_at(offset, buf);
                if result.is_err() {
                    buf.fill(0);
                }
                result
            }
            (Translation::Unbacked { .. }, Translation::Unbacked { .. }) => Ok(()),
            _ => {
                warn!(
                    "Reads across used/unused memory boundaries are not supported (base {addr} + size {:#x}).",
                    buf.len()
                );
                Ok(())
            }
        }
    }

    /// The object that most specifically describes `addr`, searching the core last
    pub fn object_for(&self, addr: Addr) -> Option<&ElfObject> {
        self.translate(addr, SearchOrder::CoreLast)
            .and_then(|t| self.objects.get(t.object()))
    }
}

#[cfg(all(test, target_pointer_width = "64"))]
mod test {
    use object::elf::{PF_R, PF_W, PF_X};

    use super::*;
    use crate::testutil::{capture_logs, ElfBuilder};

    fn space() -> (tempfile::TempDir, AddressSpace) {
        let dir = tempfile::tempdir().unwrap();
        let mut stack = vec![0u8; 0x1000];
        stack[..4].copy_from_slice(b"core");
        let core = ElfBuilder::core()
            // data with a zero-filled tail: 0x1000 in the file, 0x3000 in memory
            .load(0x600000, vec![0x11; 0x1000], 0x3000, PF_R | PF_W)
            .load(0x7ffd0000, stack, 0x1000, PF_R | PF_W)
            // text segment of the binary, dropped from the core
            .load(0x400000, Vec::new(), 0x2000, PF_R | PF_X)
            .write(dir.path(), "core");
        let binary = ElfBuilder::executable()
            .load(0x400000, vec![0x90; 0x2000], 0x2000, PF_R | PF_X)
            .write(dir.path(), "prog");

        let mut space = AddressSpace::new();
        space.push(ElfObject::open(core, Addr::NULL, true).unwrap());
        space.push(ElfObject::open(binary, Addr::NULL, false).unwrap());
        (dir, space)
    }

    #[test]
    fn test_translate_offset() {
        let (_dir, space) = space();
        let core = space.object(0).unwrap();
        for segment in core.load_segments().filter(|s| s.filesz > 0) {
            for delta in [0, 1, segment.filesz / 2, segment.filesz - 1] {
                let addr = Addr::from(segment.vaddr + delta);
                assert_eq!(
                    space.translate(addr, SearchOrder::CoreFirst),
                    Some(Translation::Mapped {
                        object: 0,
                        offset: segment.offset + delta
                    })
                );
            }
        }
    }

    #[test]
    fn test_full_hit_wins_over_sentinel() {
        let (_dir, space) = space();
        let text = Addr::from(0x400010usize);
        assert!(matches!(
            space.translate(text, SearchOrder::CoreFirst),
            Some(Translation::Mapped { object: 1, .. })
        ));
        assert_eq!(
            space.translate(text, SearchOrder::CoreOnly),
            Some(Translation::Unbacked { object: 0 })
        );
        assert!(matches!(
            space.translate(text, SearchOrder::CoreLast),
            Some(Translation::Mapped { object: 1, .. })
        ));
        assert_eq!(space.translate(text, SearchOrder::FileOnly(7)), None);
    }

    #[test]
    fn test_read_backed() {
        let (_dir, space) = space();
        let mut buf = [0u8; 4];
        space.read(Addr::from(0x7ffd0000usize), &mut buf).unwrap();
        assert_eq!(&buf, b"core");

        let mut code = [0u8; 2];
        space.read(Addr::from(0x400000usize), &mut code).unwrap();
        assert_eq!(code, [0x90, 0x90]);
    }

    #[test]
    fn test_read_unbacked_is_zero() {
        let (_dir, space) = space();
        let mut buf = [0xffu8; 16];
        space.read(Addr::from(0x601800usize), &mut buf).unwrap();
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn test_read_across_backing_boundary() {
        let (_dir, space) = space();
        let mut buf = [0xffu8; 16];
        let (result, logs) = capture_logs(|| space.read(Addr::from(0x600ff8usize), &mut buf));
        assert!(result.is_ok());
        assert_eq!(buf, [0u8; 16]);
        assert_eq!(logs.count("used/unused memory boundaries"), 1);
    }

    #[test]
    fn test_read_unmapped_fails() {
        let (_dir, space) = space();
        let mut buf = [0xffu8; 8];
        let err = space.read(Addr::from(0x10usize), &mut buf).unwrap_err();
        assert!(matches!(err, AnalysisError::NotMapped(_)));
        assert_eq!(buf, [0u8; 8]);
    }

    #[test]
    fn test_read_spanning_objects_fails() {
        let (_dir, space) = space();
        // nothing is mapped right after the binary's text
        let mut buf = [0u8; 8];
        let err = space
            .read(Addr::from(0x401ffcusize), &mut buf)
            .unwrap_err();
        assert!(matches!(err, AnalysisError::NotMapped(_)));

        let dir = tempfile::tempdir().unwrap();
        let first = ElfBuilder::core()
            .load(0x10000, vec![1; 0x1000], 0x1000, PF_R)
            .write(dir.path(), "a");
        let second = ElfBuilder::executable()
            .load(0x11000, vec![2; 0x1000], 0x1000, PF_R)
            .write(dir.path(), "b");
        let mut space = AddressSpace::new();
        space.push(ElfObject::open(first, Addr::NULL, true).unwrap());
        space.push(ElfObject::open(second, Addr::NULL, false).unwrap());
        let err = space.read(Addr::from(0x10ffcusize), &mut buf).unwrap_err();
        assert!(matches!(err, AnalysisError::SpansObjects { .. }));
        space.read(Addr::from(0x11000usize), &mut buf).unwrap();
        assert_eq!(buf, [2; 8]);
    }

    #[test]
    fn test_read_from_object() {
        let (_dir, space) = space();
        let mut buf = [0u8; 1];
        assert!(space
            .read_from_object(Addr::from(0x7ffd0000usize), &mut buf, 1)
            .is_err());
        assert!(matches!(
            space.read_from_object(Addr::NULL, &mut buf, 5),
            Err(AnalysisError::NoSuchObject(5))
        ));
    }

    #[test]
    fn test_object_for() {
        let (_dir, space) = space();
        let object = space.object_for(Addr::from(0x400100usize)).unwrap();
        assert!(object.path().ends_with("prog"));
        let object = space.object_for(Addr::from(0x600100usize)).unwrap();
        assert!(object.path().ends_with("core"));
    }
}
