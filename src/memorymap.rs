//! # Memory Map Module
//!
//! Reconstructs the memory map of the analyzed process from the loadable segments of every
//! attached object: the core, the binary and all shared libraries.
//!
//! Each region is printed on one line, like `pmap` does:
//!
//! ```text
//! 0x000000400000	    4k(   4k)	r-x	/usr/bin/app
//! ```
//!
//! The lines are sorted as text, which orders them by address since all addresses are printed
//! with the same width.

use std::fmt::{self, Display};

use serde::Serialize;

use crate::addr::Addr;
use crate::addrspace::AddressSpace;
use crate::elf::SegmentFlags;

/// One loadable segment of an attached object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryRegion {
    /// Virtual address of the segment, including the load bias of its object
    pub start_address: Addr,
    /// Size of the region in memory
    pub memsz: u64,
    /// Bytes of the region that are backed by the file
    pub filesz: u64,
    pub permissions: SegmentFlags,
    /// Path of the object the segment belongs to
    pub path: String,
}

impl Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#014x}\t {:4}k({:4}k)\t{}\t{}",
            self.start_address.usize(),
            self.memsz / 1024,
            self.filesz / 1024,
            self.permissions,
            self.path
        )
    }
}

/// The memory map of the analyzed process
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessMemoryMap {
    /// Regions in the order they are printed
    pub regions: Vec<MemoryRegion>,
}

impl ProcessMemoryMap {
    pub fn from_space(space: &AddressSpace) -> Self {
        let mut regions: Vec<MemoryRegion> = space
            .objects()
            .iter()
            .flat_map(|object| {
                object.load_segments().map(move |segment| MemoryRegion {
                    start_address: object.base() + segment.vaddr as usize,
                    memsz: segment.memsz,
                    filesz: segment.filesz,
                    permissions: segment.flags,
                    path: object.path().display().to_string(),
                })
            })
            .collect();
        regions.sort_by_cached_key(MemoryRegion::to_string);

        ProcessMemoryMap { regions }
    }
}

impl Display for ProcessMemoryMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, region) in self.regions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{region}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use object::elf::{PF_R, PF_W, PF_X};

    use super::*;
    use crate::elf::ElfObject;
    use crate::testutil::ElfBuilder;

    #[test]
    fn test_region_line() {
        let region = MemoryRegion {
            start_address: Addr::from(0x400000usize),
            memsz: 0x2800,
            filesz: 0x1000,
            permissions: SegmentFlags::from_bits(PF_R | PF_X),
            path: "/usr/bin/app".to_string(),
        };
        assert_eq!(region.to_string(), "0x000000400000\t   10k(   4k)\tr-x\t/usr/bin/app");
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_map_from_space() {
        let dir = tempfile::tempdir().unwrap();
        let binary = ElfBuilder::executable()
            .load(0x600000, vec![0; 0x800], 0x1000, PF_R | PF_W)
            .load(0x400000, vec![0x90; 0x1000], 0x1000, PF_R | PF_X)
            .write(dir.path(), "prog");
        let library = ElfBuilder::executable()
            .load(0, vec![0xcc; 0x1000], 0x3000, PF_R | PF_X)
            .write(dir.path(), "lib.so");

        let mut space = AddressSpace::new();
        space.push(ElfObject::open(&binary, Addr::NULL, false).unwrap());
        space.push(ElfObject::open(&library, Addr::from(0x7f0000000000usize), false).unwrap());

        let map = ProcessMemoryMap::from_space(&space);
        assert_eq!(map.regions.len(), 3);
        let lines: Vec<String> = map.to_string().lines().map(str::to_string).collect();
        assert!(lines[0].starts_with("0x000000400000\t    4k(   4k)\tr-x\t"));
        assert!(lines[1].starts_with("0x000000600000\t    4k(   2k)\trw-\t"));
        assert!(lines[2].starts_with("0x7f0000000000\t   12k(   4k)\tr-x\t"));
        assert!(lines[2].ends_with("lib.so"));
    }
}
