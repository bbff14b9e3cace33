//! # ELF Object Module
//!
//! Opens, validates and describes a single memory-mapped ELF file.
//!
//! Every file taking part in an analysis (the core, the binary, shared libraries and split
//! debug files) is represented by an [`ElfObject`]. The object keeps the file open for
//! positional reads and memory-maps either the whole file or, for potentially huge core
//! files, only the ELF, program and section headers.
//!
//! Only ELF files of the analyzing host's class, byte order and machine are accepted, since
//! all structures of the target are read with the host's layout.

use std::fmt::{self, Display};
use std::fs::{File, Metadata};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use memmap2::{Mmap, MmapOptions};
use object::elf;
use object::read::elf::{FileHeader, ProgramHeader as _, SectionHeader as _, Sym as _};
use object::Endianness;
use serde::Serialize;
use tracing::{debug, warn};

use crate::addr::Addr;
use crate::errors::{AnalysisError, Result};
use crate::symbols::{ElfSymbol, SymbolTable};
use crate::WORD_BYTES;

#[cfg(target_pointer_width = "64")]
pub type HostFileHeader = elf::FileHeader64<Endianness>;
#[cfg(target_pointer_width = "32")]
pub type HostFileHeader = elf::FileHeader32<Endianness>;

type HostProgramHeader = <HostFileHeader as FileHeader>::ProgramHeader;
type HostSectionHeader = <HostFileHeader as FileHeader>::SectionHeader;
type HostSym = <HostFileHeader as FileHeader>::Sym;

#[cfg(target_pointer_width = "64")]
pub const HOST_CLASS: u8 = elf::ELFCLASS64;
#[cfg(target_pointer_width = "32")]
pub const HOST_CLASS: u8 = elf::ELFCLASS32;

#[cfg(target_endian = "little")]
pub const HOST_DATA: u8 = elf::ELFDATA2LSB;
#[cfg(target_endian = "big")]
pub const HOST_DATA: u8 = elf::ELFDATA2MSB;

#[cfg(target_arch = "x86_64")]
pub const HOST_MACHINE: Option<u16> = Some(elf::EM_X86_64);
#[cfg(target_arch = "x86")]
pub const HOST_MACHINE: Option<u16> = Some(elf::EM_386);
#[cfg(target_arch = "aarch64")]
pub const HOST_MACHINE: Option<u16> = Some(elf::EM_AARCH64);
#[cfg(not(any(target_arch = "x86_64", target_arch = "x86", target_arch = "aarch64")))]
pub const HOST_MACHINE: Option<u16> = None;

const EHDR_SIZE: usize = std::mem::size_of::<HostFileHeader>();

// indexes into e_ident
const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const EI_VERSION: usize = 6;
const EI_OSABI: usize = 7;

/// Access permissions of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SegmentFlags {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl SegmentFlags {
    pub fn from_bits(p_flags: u32) -> Self {
        Self {
            read: p_flags & elf::PF_R != 0,
            write: p_flags & elf::PF_W != 0,
            execute: p_flags & elf::PF_X != 0,
        }
    }
}

impl Display for SegmentFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.read { "r" } else { "-" },
            if self.write { "w" } else { "-" },
            if self.execute { "x" } else { "-" }
        )
    }
}

/// One program header of an [`ElfObject`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub p_type: u32,
    pub flags: SegmentFlags,
    pub vaddr: u64,
    pub offset: u64,
    pub filesz: u64,
    pub memsz: u64,
}

impl Segment {
    pub fn is_load(&self) -> bool {
        self.p_type == elf::PT_LOAD
    }
}

/// A note record from a `PT_NOTE` segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub n_type: u32,
    pub name: Vec<u8>,
    pub desc: Vec<u8>,
}

/// One memory-mapped ELF file
///
/// The object owns the file handle and the mapping. Both are released when the object is
/// dropped, including on every error path of [`ElfObject::open`].
#[derive(Debug)]
pub struct ElfObject {
    path: PathBuf,
    file: File,
    map: Mmap,
    metadata: Metadata,
    base: Addr,
    segments: Vec<Segment>,
}

impl ElfObject {
    /// Opens and validates an ELF file
    ///
    /// # Parameters
    ///
    /// * `path` - The file to open
    /// * `base` - The load bias of the object, `0` for the core and the main binary
    /// * `headers_only` - Only map the headers, not the whole file
    ///
    /// # Errors
    ///
    /// Fails with [`AnalysisError::InvalidElf`] if the file is not an ELF file of the host's
    /// class, byte order and machine, and with [`AnalysisError::Io`] if it can not be read.
    pub fn open(path: impl AsRef<Path>, base: Addr, headers_only: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let metadata = file.metadata()?;
        let file_len = usize::try_from(metadata.len()).unwrap_or(usize::MAX);

        if file_len < EHDR_SIZE {
            return Err(invalid(path, "the file is too small to hold an ELF header"));
        }

        let mut map_len = if headers_only { EHDR_SIZE } else { file_len };
        let mut map = map_file(&file, map_len)?;
        debug!(
            "Opening Elf File [{}] with {} bytes mapped, base {}",
            path.display(),
            map_len,
            base
        );

        validate(path, &map)?;

        if headers_only {
            map_len = header_extent(path, &map, file_len)?;
            map = map_file(&file, map_len)?;
            debug!(
                "Reopening Elf File [{}] with {} bytes mapped",
                path.display(),
                map_len
            );
        }

        let segments = parse_segments(path, &map)?;
        for (idx, segment) in segments.iter().enumerate() {
            if segment.is_load() && segment.filesz > segment.memsz {
                warn!(
                    "Program Header {idx} of {} file size ({:#x}) is bigger than memory size ({:#x}). Ignoring.",
                    path.display(),
                    segment.filesz,
                    segment.memsz
                );
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            map,
            metadata,
            base,
            segments,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn base(&self) -> Addr {
        self.base
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.metadata.modified().ok()
    }

    /// Size of the file on disk
    pub fn file_size(&self) -> u64 {
        self.metadata.len()
    }

    /// Bytes of the file that are memory-mapped
    pub fn mapped_len(&self) -> usize {
        self.map.len()
    }

    /// All program headers
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The `PT_LOAD` segments that take part in address translation
    pub fn load_segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments
            .iter()
            .filter(|s| s.is_load() && s.filesz <= s.memsz)
    }

    /// Forgets all program headers, so the object never answers address translations
    ///
    /// Used for split debug files, whose segments only mirror the binary's.
    pub fn discard_segments(&mut self) {
        self.segments.clear();
    }

    /// Reads `buf.len()` bytes at file offset `offset`
    ///
    /// # Errors
    ///
    /// Fails if the file is shorter than requested.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    /// Copies the symbol tables (`SHT_SYMTAB` and `SHT_DYNSYM`) of this object
    ///
    /// Tables whose data lies outside the mapped part of the file are skipped, which happens
    /// for core files that were only mapped up to their headers.
    pub fn symbol_tables(&self, object_index: usize) -> Vec<SymbolTable> {
        let data: &[u8] = &self.map;
        let Ok((header, endian)) = parse_header(data) else {
            return Vec::new();
        };
        let sections: &[HostSectionHeader] = match header.section_headers(endian, data) {
            Ok(sections) => sections,
            Err(e) => {
                debug!(
                    "Not looking for symbols in {} as the section headers are not mapped: {e}",
                    self.path.display()
                );
                return Vec::new();
            }
        };

        let mut tables = Vec::new();
        for (idx, section) in sections.iter().enumerate() {
            let kind = section.sh_type(endian);
            let size: u64 = section.sh_size(endian).into();
            if (kind != elf::SHT_SYMTAB && kind != elf::SHT_DYNSYM) || size == 0 {
                continue;
            }

            let symbols: &[HostSym] = match section.data_as_array(endian, data) {
                Ok(symbols) => symbols,
                Err(e) => {
                    debug!(
                        "Not adding symbol table from section {idx} of {}: {e}",
                        self.path.display()
                    );
                    continue;
                }
            };
            let strings = sections
                .get(section.sh_link(endian) as usize)
                .and_then(|s| s.data(endian, data).ok())
                .unwrap_or(&[]);

            let symbols = symbols
                .iter()
                .map(|sym| ElfSymbol {
                    name: sym.st_name(endian),
                    value: sym.st_value(endian).into(),
                    size: sym.st_size(endian).into(),
                    shndx: sym.st_shndx(endian),
                })
                .collect::<Vec<_>>();

            debug!(
                "Adding symbol table from section {idx} of {} with {} symbols, base {}",
                self.path.display(),
                symbols.len(),
                self.base
            );
            tables.push(SymbolTable::new(
                object_index,
                self.base,
                symbols,
                strings.to_vec(),
            ));
        }

        tables
    }

    /// The file name recorded in a `.gnu_debuglink` section, if any
    pub fn debuglink(&self) -> Option<String> {
        let data: &[u8] = &self.map;
        let (header, endian) = parse_header(data).ok()?;
        let table = header.sections(endian, data).ok()?;

        for section in table.iter() {
            match table.section_name(endian, section) {
                Ok(name) if name == b".gnu_debuglink" => {}
                _ => continue,
            }
            let content = section.data(endian, data).ok()?;
            let end = content.iter().position(|b| *b == 0).unwrap_or(content.len());
            if end == 0 {
                return None;
            }
            return Some(String::from_utf8_lossy(&content[..end]).into_owned());
        }

        None
    }

    /// Virtual addresses of the `DT_DEBUG` entries of the dynamic section
    ///
    /// The dynamic loader stores the address of its `r_debug` structure in these entries at
    /// run time, so they have to be read through the process memory, not from the file.
    pub fn dynamic_debug_slots(&self) -> Vec<Addr> {
        let entry_size = 2 * WORD_BYTES;
        let mut slots = Vec::new();

        for segment in self.segments.iter().filter(|s| s.p_type == elf::PT_DYNAMIC) {
            let (Ok(start), Ok(len)) = (
                usize::try_from(segment.offset),
                usize::try_from(segment.filesz),
            ) else {
                continue;
            };
            let Some(dynamic) = start
                .checked_add(len)
                .and_then(|end| self.map.get(start..end))
            else {
                continue;
            };

            for (idx, entry) in dynamic.chunks_exact(entry_size).enumerate() {
                let mut tag = [0u8; WORD_BYTES];
                tag.copy_from_slice(&entry[..WORD_BYTES]);
                let tag = usize::from_ne_bytes(tag);
                if tag == elf::DT_DEBUG as usize {
                    slots.push(self.base + segment.vaddr as usize + idx * entry_size);
                } else if tag == elf::DT_NULL as usize {
                    break;
                }
            }
        }

        slots
    }

    /// All note records of the `PT_NOTE` segments
    ///
    /// # Errors
    ///
    /// Fails if a note segment can not be read from the file.
    pub fn notes(&self) -> Result<Vec<Note>> {
        let mut notes = Vec::new();
        for segment in self
            .segments
            .iter()
            .filter(|s| s.p_type == elf::PT_NOTE && s.filesz != 0)
        {
            let len = usize::try_from(segment.filesz).unwrap_or(usize::MAX);
            let mut raw = vec![0u8; len];
            self.read_at(segment.offset, &mut raw)?;
            notes.extend(parse_notes(&raw));
        }
        Ok(notes)
    }
}

/// Splits the content of a `PT_NOTE` segment into its records
///
/// The name and the full record are both padded to 4 byte boundaries.
pub fn parse_notes(data: &[u8]) -> Vec<Note> {
    const NHDR_SIZE: usize = 12;

    let align4 = |n: usize| (n + 3) & !3;
    let read_u32 = |at: usize| {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&data[at..at + 4]);
        u32::from_ne_bytes(raw) as usize
    };

    let mut notes = Vec::new();
    let mut offset = 0;
    while offset + NHDR_SIZE <= data.len() {
        let namesz = read_u32(offset);
        let descsz = read_u32(offset + 4);
        let n_type = read_u32(offset + 8) as u32;

        let desc_offset = align4(NHDR_SIZE + namesz);
        let record_size = align4(desc_offset + descsz);

        let name_start = offset + NHDR_SIZE;
        let desc_start = offset + desc_offset;
        let Some(desc) = data.get(desc_start..desc_start + descsz) else {
            debug!("Note at offset {offset:#x} is truncated");
            break;
        };
        let mut name = data[name_start..name_start + namesz].to_vec();
        while name.last() == Some(&0) {
            name.pop();
        }

        notes.push(Note {
            n_type,
            name,
            desc: desc.to_vec(),
        });
        offset += record_size;
    }

    notes
}

/// Human readable name of an ELF machine type
pub fn machine_name(machine: u16) -> String {
    match machine {
        elf::EM_X86_64 => "x86-64".to_string(),
        elf::EM_386 => "i386".to_string(),
        elf::EM_AARCH64 => "aarch64".to_string(),
        elf::EM_SPARC => "sparc".to_string(),
        elf::EM_SPARCV9 => "sparcv9".to_string(),
        other => format!("machine type {other}"),
    }
}

fn invalid(path: &Path, reason: impl Into<String>) -> AnalysisError {
    AnalysisError::InvalidElf {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn map_file(file: &File, len: usize) -> Result<Mmap> {
    // SAFETY: the file is opened read-only and is not modified while the map is alive
    let map = unsafe { MmapOptions::new().len(len).map(file)? };
    Ok(map)
}

fn parse_header(data: &[u8]) -> Result<(&HostFileHeader, Endianness)> {
    let header = HostFileHeader::parse(data)?;
    let endian = header.endian()?;
    Ok((header, endian))
}

fn validate(path: &Path, data: &[u8]) -> Result<()> {
    if data.len() < EHDR_SIZE || data[..4] != elf::ELFMAG {
        return Err(invalid(path, "it doesn't appear to be an ELF file"));
    }
    if data[EI_VERSION] != elf::EV_CURRENT {
        return Err(invalid(
            path,
            format!("ELF version {} is not supported", data[EI_VERSION]),
        ));
    }
    if data[EI_CLASS] != HOST_CLASS {
        return Err(invalid(
            path,
            format!(
                "it is a {}-bit ELF file, this build reads {}-bit files",
                if data[EI_CLASS] == elf::ELFCLASS64 { 64 } else { 32 },
                WORD_BYTES * 8
            ),
        ));
    }
    if data[EI_DATA] != HOST_DATA {
        return Err(invalid(path, "its byte order differs from this machine's"));
    }

    let (header, endian) = parse_header(data).map_err(|e| invalid(path, e.to_string()))?;

    let machine = header.e_machine(endian);
    if let Some(host) = HOST_MACHINE {
        if machine != host {
            return Err(invalid(
                path,
                format!(
                    "it was built for {}, not {}",
                    machine_name(machine),
                    machine_name(host)
                ),
            ));
        }
    }
    if header.e_version(endian) != u32::from(elf::EV_CURRENT) {
        return Err(invalid(path, "the ELF header version is not supported"));
    }

    match data[EI_OSABI] {
        elf::ELFOSABI_SYSV | elf::ELFOSABI_GNU => {}
        other => debug!("{}: unexpected OS/ABI {other}", path.display()),
    }
    if header.e_phnum(endian) != 0
        && usize::from(header.e_phentsize(endian)) != std::mem::size_of::<HostProgramHeader>()
    {
        debug!(
            "{}: unexpected program header size {}",
            path.display(),
            header.e_phentsize(endian)
        );
    }
    if header.e_shnum(endian) != 0
        && usize::from(header.e_shentsize(endian)) != std::mem::size_of::<HostSectionHeader>()
    {
        debug!(
            "{}: unexpected section header size {}",
            path.display(),
            header.e_shentsize(endian)
        );
    }

    Ok(())
}

/// Bytes needed to map the ELF header plus program and section headers
fn header_extent(path: &Path, data: &[u8], file_len: usize) -> Result<usize> {
    let (header, endian) = parse_header(data)?;

    let phoff: u64 = header.e_phoff(endian).into();
    let shoff: u64 = header.e_shoff(endian).into();
    let ph_end = phoff.saturating_add(
        u64::from(header.e_phnum(endian)) * std::mem::size_of::<HostProgramHeader>() as u64,
    );
    let sh_end = shoff.saturating_add(
        u64::from(header.e_shnum(endian)) * std::mem::size_of::<HostSectionHeader>() as u64,
    );

    let ph_end = usize::try_from(ph_end).unwrap_or(usize::MAX);
    if ph_end > file_len {
        return Err(invalid(path, "the program headers go beyond the end of the file"));
    }
    let sh_end = usize::try_from(sh_end).unwrap_or(usize::MAX).min(file_len);

    Ok(EHDR_SIZE.max(ph_end).max(sh_end))
}

fn parse_segments(path: &Path, data: &[u8]) -> Result<Vec<Segment>> {
    let (header, endian) = parse_header(data)?;
    let headers: &[HostProgramHeader] = header
        .program_headers(endian, data)
        .map_err(|e| invalid(path, e.to_string()))?;

    Ok(headers
        .iter()
        .map(|ph| Segment {
            p_type: ph.p_type(endian),
            flags: SegmentFlags::from_bits(ph.p_flags(endian)),
            vaddr: ph.p_vaddr(endian).into(),
            offset: ph.p_offset(endian).into(),
            filesz: ph.p_filesz(endian).into(),
            memsz: ph.p_memsz(endian).into(),
        })
        .collect())
}
