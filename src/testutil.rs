//! Builders for synthetic ELF files and fake process memory used by the unit tests

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use object::elf;

use crate::addr::Addr;
use crate::elf::HOST_MACHINE;
use crate::errors::{AnalysisError, Result};
use crate::memory::{Residency, TargetMemory};

const EHDR: usize = 64;
const PHDR: usize = 56;
const SHDR: usize = 64;
const SYM: usize = 24;

struct SegmentSpec {
    p_type: u32,
    flags: u32,
    vaddr: u64,
    data: Vec<u8>,
    memsz: u64,
}

struct SymbolSpec {
    name: String,
    value: u64,
    size: u64,
    shndx: u16,
}

/// Writes minimal 64-bit ELF files for the host's machine
pub(crate) struct ElfBuilder {
    e_type: u16,
    segments: Vec<SegmentSpec>,
    symbols: Vec<SymbolSpec>,
    debuglink: Option<String>,
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_ne_bytes());
}
fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_ne_bytes());
}
fn push_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_ne_bytes());
}
fn align(out: &mut Vec<u8>, to: usize) {
    while out.len() % to != 0 {
        out.push(0);
    }
}

impl ElfBuilder {
    fn new(e_type: u16) -> Self {
        Self {
            e_type,
            segments: Vec::new(),
            symbols: Vec::new(),
            debuglink: None,
        }
    }

    pub(crate) fn core() -> Self {
        Self::new(elf::ET_CORE)
    }

    pub(crate) fn executable() -> Self {
        Self::new(elf::ET_EXEC)
    }

    pub(crate) fn load(mut self, vaddr: u64, data: Vec<u8>, memsz: u64, flags: u32) -> Self {
        self.segments.push(SegmentSpec {
            p_type: elf::PT_LOAD,
            flags,
            vaddr,
            data,
            memsz,
        });
        self
    }

    pub(crate) fn note(mut self, data: Vec<u8>) -> Self {
        self.segments.push(SegmentSpec {
            p_type: elf::PT_NOTE,
            flags: 0,
            vaddr: 0,
            memsz: 0,
            data,
        });
        self
    }

    pub(crate) fn dynamic(mut self, vaddr: u64, data: Vec<u8>) -> Self {
        let memsz = data.len() as u64;
        self.segments.push(SegmentSpec {
            p_type: elf::PT_DYNAMIC,
            flags: elf::PF_R | elf::PF_W,
            vaddr,
            data,
            memsz,
        });
        self
    }

    pub(crate) fn symbol(self, name: &str, value: u64, size: u64) -> Self {
        self.raw_symbol(name, value, size, 1)
    }

    pub(crate) fn raw_symbol(mut self, name: &str, value: u64, size: u64, shndx: u16) -> Self {
        self.symbols.push(SymbolSpec {
            name: name.to_string(),
            value,
            size,
            shndx,
        });
        self
    }

    pub(crate) fn debuglink(mut self, name: &str) -> Self {
        self.debuglink = Some(name.to_string());
        self
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let phnum = self.segments.len();
        let mut body = Vec::new();
        let body_start = EHDR + phnum * PHDR;

        // segment contents
        let mut offsets = Vec::new();
        for segment in &self.segments {
            align(&mut body, 8);
            offsets.push((body_start + body.len()) as u64);
            body.extend_from_slice(&segment.data);
        }

        // sections: null, [.symtab, .strtab], [.gnu_debuglink], .shstrtab
        let mut shstrtab = vec![0u8];
        let mut name_of = |name: &str| {
            let at = shstrtab.len() as u32;
            shstrtab.extend_from_slice(name.as_bytes());
            shstrtab.push(0);
            at
        };
        struct Section {
            name: u32,
            kind: u32,
            offset: u64,
            size: u64,
            link: u32,
            entsize: u64,
        }
        let mut sections = Vec::new();

        if !self.symbols.is_empty() {
            let mut strtab = vec![0u8];
            let mut symtab = vec![0u8; SYM];
            for symbol in &self.symbols {
                push_u32(&mut symtab, strtab.len() as u32);
                symtab.push((elf::STB_GLOBAL << 4) | elf::STT_FUNC);
                symtab.push(0);
                push_u16(&mut symtab, symbol.shndx);
                push_u64(&mut symtab, symbol.value);
                push_u64(&mut symtab, symbol.size);
                strtab.extend_from_slice(symbol.name.as_bytes());
                strtab.push(0);
            }

            align(&mut body, 8);
            let symtab_offset = (body_start + body.len()) as u64;
            body.extend_from_slice(&symtab);
            let strtab_offset = (body_start + body.len()) as u64;
            body.extend_from_slice(&strtab);

            sections.push(Section {
                name: name_of(".symtab"),
                kind: elf::SHT_SYMTAB,
                offset: symtab_offset,
                size: symtab.len() as u64,
                link: 2,
                entsize: SYM as u64,
            });
            sections.push(Section {
                name: name_of(".strtab"),
                kind: elf::SHT_STRTAB,
                offset: strtab_offset,
                size: strtab.len() as u64,
                link: 0,
                entsize: 0,
            });
        }

        if let Some(link) = &self.debuglink {
            let mut content = link.as_bytes().to_vec();
            content.push(0);
            align(&mut content, 4);
            content.extend_from_slice(&[0; 4]);
            align(&mut body, 4);
            let offset = (body_start + body.len()) as u64;
            body.extend_from_slice(&content);
            sections.push(Section {
                name: name_of(".gnu_debuglink"),
                kind: elf::SHT_PROGBITS,
                offset,
                size: content.len() as u64,
                link: 0,
                entsize: 0,
            });
        }

        let (shoff, shnum, shstrndx) = if sections.is_empty() {
            (0u64, 0u16, 0u16)
        } else {
            let name = name_of(".shstrtab");
            let offset = (body_start + body.len()) as u64;
            body.extend_from_slice(&shstrtab);
            sections.push(Section {
                name,
                kind: elf::SHT_STRTAB,
                offset,
                size: shstrtab.len() as u64,
                link: 0,
                entsize: 0,
            });
            align(&mut body, 8);
            let shoff = (body_start + body.len()) as u64;
            let shnum = sections.len() as u16 + 1;
            (shoff, shnum, shnum - 1)
        };

        let mut out = Vec::new();
        out.extend_from_slice(&elf::ELFMAG);
        out.extend_from_slice(&[
            elf::ELFCLASS64,
            elf::ELFDATA2LSB,
            elf::EV_CURRENT,
            elf::ELFOSABI_SYSV,
        ]);
        out.resize(16, 0);
        push_u16(&mut out, self.e_type);
        push_u16(&mut out, HOST_MACHINE.unwrap_or(elf::EM_X86_64));
        push_u32(&mut out, u32::from(elf::EV_CURRENT));
        push_u64(&mut out, 0);
        push_u64(&mut out, if phnum == 0 { 0 } else { EHDR as u64 });
        push_u64(&mut out, shoff);
        push_u32(&mut out, 0);
        push_u16(&mut out, EHDR as u16);
        push_u16(&mut out, PHDR as u16);
        push_u16(&mut out, phnum as u16);
        push_u16(&mut out, SHDR as u16);
        push_u16(&mut out, shnum);
        push_u16(&mut out, shstrndx);

        for (segment, offset) in self.segments.iter().zip(&offsets) {
            push_u32(&mut out, segment.p_type);
            push_u32(&mut out, segment.flags);
            push_u64(&mut out, *offset);
            push_u64(&mut out, segment.vaddr);
            push_u64(&mut out, segment.vaddr);
            push_u64(&mut out, segment.data.len() as u64);
            push_u64(&mut out, segment.memsz);
            push_u64(&mut out, 8);
        }

        out.extend_from_slice(&body);

        if shnum != 0 {
            out.extend_from_slice(&[0u8; SHDR]);
            for section in &sections {
                push_u32(&mut out, section.name);
                push_u32(&mut out, section.kind);
                push_u64(&mut out, 0);
                push_u64(&mut out, 0);
                push_u64(&mut out, section.offset);
                push_u64(&mut out, section.size);
                push_u32(&mut out, section.link);
                push_u32(&mut out, 0);
                push_u64(&mut out, 1);
                push_u64(&mut out, section.entsize);
            }
        }

        out
    }

    pub(crate) fn write(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).unwrap();
        path
    }
}

/// One ELF note record
pub(crate) fn note(name: &str, n_type: u32, desc: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    push_u32(&mut out, name.len() as u32 + 1);
    push_u32(&mut out, desc.len() as u32);
    push_u32(&mut out, n_type);
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    align(&mut out, 4);
    out.extend_from_slice(desc);
    align(&mut out, 4);
    out
}

/// An x86_64 `NT_PRSTATUS` descriptor
pub(crate) fn prstatus_x86_64(pid: i32, fp: u64, sp: u64, ip: u64) -> Vec<u8> {
    let mut desc = vec![0u8; 336];
    desc[32..36].copy_from_slice(&pid.to_ne_bytes());
    let reg = |idx: usize| 112 + idx * 8;
    desc[reg(4)..reg(4) + 8].copy_from_slice(&fp.to_ne_bytes());
    desc[reg(16)..reg(16) + 8].copy_from_slice(&ip.to_ne_bytes());
    desc[reg(19)..reg(19) + 8].copy_from_slice(&sp.to_ne_bytes());
    desc
}

/// An x86_64 `NT_PRPSINFO` descriptor
pub(crate) fn prpsinfo_x86_64(pid: i32, fname: &str, psargs: &str) -> Vec<u8> {
    let mut desc = vec![0u8; 136];
    desc[24..28].copy_from_slice(&pid.to_ne_bytes());
    desc[40..40 + fname.len()].copy_from_slice(fname.as_bytes());
    desc[56..56 + psargs.len()].copy_from_slice(psargs.as_bytes());
    desc
}

/// Process memory made of a few byte regions
#[derive(Debug, Default, Clone)]
pub(crate) struct FakeMemory {
    regions: BTreeMap<usize, Vec<u8>>,
}

impl FakeMemory {
    pub(crate) fn with_region(mut self, start: usize, bytes: Vec<u8>) -> Self {
        self.regions.insert(start, bytes);
        self
    }

    /// A region of machine words
    pub(crate) fn with_words(self, start: usize, words: &[usize]) -> Self {
        let bytes = words.iter().flat_map(|w| w.to_ne_bytes()).collect();
        self.with_region(start, bytes)
    }

    /// Overwrites a word inside an existing region
    pub(crate) fn set_word(&mut self, addr: usize, value: usize) {
        let bytes = value.to_ne_bytes();
        let (start, region) = self
            .regions
            .range_mut(..=addr)
            .next_back()
            .expect("address inside a region");
        let at = addr - *start;
        region[at..at + bytes.len()].copy_from_slice(&bytes);
    }

    fn region(&self, addr: usize, len: usize) -> Option<&[u8]> {
        let (start, region) = self.regions.range(..=addr).next_back()?;
        let at = addr - start;
        region.get(at..at.checked_add(len)?)
    }
}

impl TargetMemory for FakeMemory {
    fn read_memory(&self, addr: Addr, buf: &mut [u8]) -> Result<()> {
        buf.fill(0);
        let src = self
            .region(addr.usize(), buf.len())
            .ok_or(AnalysisError::NotMapped(addr))?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn residency(&self, addr: Addr) -> Residency {
        if self.region(addr.usize(), 1).is_some() {
            Residency::InCore
        } else {
            Residency::Outside
        }
    }
}

/// Log lines written while a closure ran
#[derive(Debug, Clone, Default)]
pub(crate) struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub(crate) fn count(&self, needle: &str) -> usize {
        self.contents().matches(needle).count()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `f` with a subscriber that records everything down to debug level
pub(crate) fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, LogCapture) {
    let capture = LogCapture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .without_time()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, capture)
}
