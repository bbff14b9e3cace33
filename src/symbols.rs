//! # Symbol Resolution
//!
//! Maps addresses to function names and names back to addresses, using the ELF symbol tables
//! of every attached object. Tables are searched in the order they were added, which is the
//! order the objects were attached: binary first, then its debug file, then the libraries.

use tracing::debug;

use crate::addr::Addr;
use crate::consts::UNKNOWN_SYMBOL;

/// One entry of an ELF symbol table, copied out of the mapped file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ElfSymbol {
    /// Offset of the name in the table's string section
    pub(crate) name: u32,
    pub(crate) value: u64,
    pub(crate) size: u64,
    pub(crate) shndx: u16,
}

/// The symbols of one section of one attached object, together with their names
#[derive(Debug, Clone)]
pub struct SymbolTable {
    object: usize,
    base: Addr,
    symbols: Vec<ElfSymbol>,
    strings: Vec<u8>,
}

impl SymbolTable {
    pub(crate) fn new(object: usize, base: Addr, symbols: Vec<ElfSymbol>, strings: Vec<u8>) -> Self {
        Self {
            object,
            base,
            symbols,
            strings,
        }
    }

    /// Index of the object in the address space this table was read from
    pub fn object(&self) -> usize {
        self.object
    }

    pub fn base(&self) -> Addr {
        self.base
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    fn name_of(&self, symbol: &ElfSymbol) -> &str {
        let start = symbol.name as usize;
        let Some(rest) = self.strings.get(start..) else {
            return "";
        };
        let end = rest.iter().position(|b| *b == 0).unwrap_or(rest.len());
        std::str::from_utf8(&rest[..end]).unwrap_or("")
    }

    /// The first defined symbol covering `addr` and the offset of `addr` into it
    fn covering(&self, addr: Addr) -> Option<(&str, u64)> {
        let addr = addr.u64();
        self.symbols
            .iter()
            .filter(|sym| sym.size != 0 && sym.value != 0 && sym.shndx != 0)
            .find_map(|sym| {
                let start = self.base.u64().wrapping_add(sym.value);
                (addr >= start && addr - start < sym.size).then(|| (self.name_of(sym), addr - start))
            })
    }

    /// Address of the first defined symbol whose demangled name, cut at the parameter list,
    /// equals `query`
    fn find(&self, query: &str) -> Option<Addr> {
        // mangled names carry the last path component verbatim
        let needle = query.rsplit("::").next().unwrap_or(query);
        self.symbols
            .iter()
            .filter(|sym| sym.shndx != 0)
            .find(|sym| {
                let name = self.name_of(sym);
                if !name.contains(needle) {
                    return false;
                }
                let demangled = demangle(name);
                let plain = demangled
                    .find('(')
                    .map_or(demangled.as_str(), |paren| &demangled[..paren]);
                plain == query
            })
            .map(|sym| self.base + sym.value as usize)
    }
}

/// Result of an address lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolLookup<'a> {
    /// The mangled name of the covering symbol and the offset into it
    Found { name: &'a str, offset: u64 },
    Unknown,
}

impl<'a> SymbolLookup<'a> {
    pub fn is_known(&self) -> bool {
        matches!(self, SymbolLookup::Found { .. })
    }

    /// The mangled name, or the unknown marker
    pub fn name(&self) -> &'a str {
        match self {
            SymbolLookup::Found { name, .. } => name,
            SymbolLookup::Unknown => UNKNOWN_SYMBOL,
        }
    }

    pub fn offset(&self) -> u64 {
        match self {
            SymbolLookup::Found { offset, .. } => *offset,
            SymbolLookup::Unknown => 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SymbolResolver {
    tables: Vec<SymbolTable>,
}

impl SymbolResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, table: SymbolTable) {
        self.tables.push(table);
    }

    pub fn tables(&self) -> &[SymbolTable] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Finds the symbol covering `addr`
    ///
    /// A covering symbol with an empty name doesn't end the search, the next table is tried.
    pub fn address_to_name(&self, addr: Addr) -> SymbolLookup<'_> {
        self.tables
            .iter()
            .filter_map(|table| table.covering(addr))
            .find(|(name, _)| !name.is_empty())
            .map_or(SymbolLookup::Unknown, |(name, offset)| SymbolLookup::Found {
                name,
                offset,
            })
    }

    /// Finds the address of the function or variable called `query`
    ///
    /// `query` is compared against demangled names without their parameter list, so both
    /// `main` and `ns::Class::method` work.
    pub fn name_to_address(&self, query: &str) -> Option<Addr> {
        let found = self
            .tables
            .iter()
            .find_map(|table| table.find(query).filter(|addr| !addr.is_null()));
        debug!("Symbol lookup for [{query}]: {found:?}");
        found
    }
}

impl Extend<SymbolTable> for SymbolResolver {
    fn extend<T: IntoIterator<Item = SymbolTable>>(&mut self, iter: T) {
        self.tables.extend(iter)
    }
}

/// Demangles a Rust or C++ symbol name, returning other names unchanged
pub fn demangle(name: &str) -> String {
    if let Ok(rust) = rustc_demangle::try_demangle(name) {
        return format!("{rust:#}");
    }
    if let Ok(symbol) = cpp_demangle::Symbol::new(name) {
        if let Ok(demangled) = symbol.demangle(&cpp_demangle::DemangleOptions::default()) {
            return demangled;
        }
    }
    name.to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    fn table(base: usize, entries: &[(&str, u64, u64)]) -> SymbolTable {
        let mut strings = vec![0u8];
        let mut symbols = vec![ElfSymbol {
            name: 0,
            value: 0,
            size: 0,
            shndx: 0,
        }];
        for (name, value, size) in entries {
            symbols.push(ElfSymbol {
                name: strings.len() as u32,
                value: *value,
                size: *size,
                shndx: 1,
            });
            strings.extend_from_slice(name.as_bytes());
            strings.push(0);
        }
        SymbolTable::new(0, Addr::from(base), symbols, strings)
    }

    #[test]
    fn test_address_to_name() {
        let mut resolver = SymbolResolver::new();
        resolver.add(table(0, &[("main", 0x1000, 0x40), ("helper", 0x1040, 0x10)]));

        let lookup = resolver.address_to_name(Addr::from(0x1044usize));
        assert_eq!(lookup, SymbolLookup::Found { name: "helper", offset: 4 });

        // end of a symbol is exclusive
        assert_eq!(
            resolver.address_to_name(Addr::from(0x1050usize)),
            SymbolLookup::Unknown
        );
        assert_eq!(
            resolver.address_to_name(Addr::from(0x1050usize)).name(),
            "??????"
        );
    }

    #[test]
    fn test_base_is_applied() {
        let mut resolver = SymbolResolver::new();
        resolver.add(table(0x7f00_0000, &[("lib_func", 0x500, 0x20)]));
        let lookup = resolver.address_to_name(Addr::from(0x7f00_0510usize));
        assert_eq!(lookup.name(), "lib_func");
        assert_eq!(lookup.offset(), 0x10);
        assert_eq!(
            resolver.name_to_address("lib_func"),
            Some(Addr::from(0x7f00_0500usize))
        );
    }

    #[test]
    fn test_empty_name_continues() {
        let mut resolver = SymbolResolver::new();
        resolver.add(table(0, &[("", 0x1000, 0x100)]));
        resolver.add(table(0, &[("real_name", 0x1000, 0x100)]));
        assert_eq!(
            resolver.address_to_name(Addr::from(0x1010usize)).name(),
            "real_name"
        );
    }

    #[test]
    fn test_name_round_trip() {
        let entries = [
            ("alpha", 0x1000, 0x30),
            ("beta", 0x1030, 0x8),
            ("gamma", 0x2000, 0x100),
        ];
        let mut resolver = SymbolResolver::new();
        resolver.add(table(0x400000, &entries));

        for (name, _, size) in entries {
            let addr = resolver.name_to_address(name).unwrap();
            for delta in [0, size / 2, size - 1] {
                let lookup = resolver.address_to_name(addr + delta as usize);
                assert_eq!(lookup.name(), name);
                assert_eq!(lookup.offset(), delta);
            }
        }
    }

    #[test]
    fn test_name_to_address_matches_demangled() {
        let mut resolver = SymbolResolver::new();
        resolver.add(table(
            0,
            &[
                ("_ZN2ns5Klass3runEi", 0x3000, 0x10),
                ("_ZN2ns5Klass3runEv_extra", 0x3100, 0x10),
            ],
        ));
        assert_eq!(
            resolver.name_to_address("ns::Klass::run"),
            Some(Addr::from(0x3000usize))
        );
        assert_eq!(resolver.name_to_address("ns::Klass"), None);
        assert_eq!(resolver.name_to_address("missing"), None);
    }

    #[test]
    fn test_demangle() {
        assert_eq!(demangle("_ZN2ns5Klass3runEi"), "ns::Klass::run(int)");
        assert_eq!(
            demangle("_ZN4core3ptr13drop_in_place17h0123456789abcdefE"),
            "core::ptr::drop_in_place"
        );
        assert_eq!(demangle("main"), "main");
    }
}
