//! Read-only view of the loaded binary.
//!
//! Loaders live outside the core; they hand over sections, symbols,
//! relocations and an entry point through this trait. [`MemoryImage`] is a
//! byte-backed implementation used by the tests and by embedders that load
//! images themselves.

use std::collections::BTreeMap;

use reloom_types::{Address, Word};
use strum::Display;

use crate::error::{DecompileError, Result};

/// Byte order of a section.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

/// Machine architecture of the image.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Machine {
    X86,
    Sparc,
    Ppc,
    St20,
    Hppa,
    M68k,
    Unknown,
}

/// Container format the image was loaded from.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Platform {
    Elf,
    Pe,
    MachO,
    Som,
    Exe,
    Lx,
    Prc,
    Unknown,
}

/// One section of the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section name.
    pub name: String,
    /// Native start address.
    pub addr: Address,
    /// Size in bytes.
    pub size: u64,
    /// Whether the section holds code.
    pub is_code: bool,
    /// Whether the section holds initialised data.
    pub is_data: bool,
    /// Whether the section is mapped read-only.
    pub is_read_only: bool,
    /// Whether the section is zero-initialised.
    pub is_bss: bool,
    /// Byte order of multi-byte reads.
    pub endian: Endian,
}

impl Section {
    /// Whether `addr` falls inside this section.
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.addr && (addr.value() - self.addr.value()) < self.size
    }
}

/// The loader-facing view the core consumes.
pub trait Image {
    /// All sections.
    fn sections(&self) -> &[Section];

    /// Read `len` (1, 2, 4 or 8) bytes at `addr` as an integer in the
    /// owning section's byte order.
    fn read(&self, addr: Address, len: u8) -> Result<Word>;

    /// Symbol covering `addr`, if any.
    fn symbol_at(&self, addr: Address) -> Option<&str>;

    /// Address of a named symbol.
    fn symbol_by_name(&self, name: &str) -> Option<Address>;

    /// Whether a relocation is recorded at `addr`.
    fn is_relocation_at(&self, addr: Address) -> bool;

    /// Program entry: `main` when the loader found it, the raw entry
    /// otherwise.
    fn entry_point(&self) -> Address;

    /// Machine architecture.
    fn machine(&self) -> Machine;

    /// Container format.
    fn platform(&self) -> Platform;

    /// Read a 32-bit IEEE-754 value.
    fn read_f32(&self, addr: Address) -> Result<f32> {
        self.read(addr, 4).map(|w| f32::from_bits(w as u32))
    }

    /// Read a 64-bit IEEE-754 value.
    fn read_f64(&self, addr: Address) -> Result<f64> {
        self.read(addr, 8).map(f64::from_bits)
    }

    /// The section containing `addr`.
    fn section_at(&self, addr: Address) -> Option<&Section> {
        self.sections().iter().find(|s| s.contains(addr))
    }

    /// Whether `addr` lies in a code section.
    fn is_code_addr(&self, addr: Address) -> bool {
        self.section_at(addr).is_some_and(|s| s.is_code)
    }

    /// Whether `addr` lies in a read-only section.
    fn is_read_only(&self, addr: Address) -> bool {
        self.section_at(addr).is_some_and(|s| s.is_read_only)
    }
}

/// An in-memory image: sections with backing bytes, a symbol table and a
/// relocation set.
#[derive(Debug, Default)]
pub struct MemoryImage {
    sections: Vec<Section>,
    bytes: Vec<Vec<u8>>,
    symbols: BTreeMap<Address, String>,
    symbol_addrs: BTreeMap<String, Address>,
    relocations: Vec<Address>,
    entry: Address,
    machine: Machine,
    platform: Platform,
}

impl Default for Machine {
    fn default() -> Self {
        Self::Unknown
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::Unknown
    }
}

impl MemoryImage {
    /// Empty image.
    pub fn new(machine: Machine, platform: Platform) -> Self {
        Self {
            machine,
            platform,
            entry: Address::INVALID,
            ..Self::default()
        }
    }

    /// Add a section backed by `bytes`; bss sections pass an empty slice
    /// and read as zero.
    pub fn add_section(&mut self, section: Section, bytes: Vec<u8>) {
        self.sections.push(section);
        self.bytes.push(bytes);
    }

    /// Record a symbol.
    pub fn add_symbol(&mut self, addr: Address, name: impl Into<String>) {
        let name = name.into();
        self.symbols.insert(addr, name.clone());
        self.symbol_addrs.insert(name, addr);
    }

    /// Record a relocation.
    pub fn add_relocation(&mut self, addr: Address) {
        self.relocations.push(addr);
    }

    /// Set the entry point.
    pub fn set_entry(&mut self, entry: Address) {
        self.entry = entry;
    }

    fn locate(&self, addr: Address) -> Option<(usize, usize)> {
        self.sections
            .iter()
            .position(|s| s.contains(addr))
            .map(|i| (i, (addr.value() - self.sections[i].addr.value()) as usize))
    }
}

impl Image for MemoryImage {
    fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn read(&self, addr: Address, len: u8) -> Result<Word> {
        debug_assert!(matches!(len, 1 | 2 | 4 | 8));
        let (sec, off) = self
            .locate(addr)
            .ok_or(DecompileError::OutOfImage { addr })?;
        let section = &self.sections[sec];
        let data = &self.bytes[sec];
        let mut out: Word = 0;
        for i in 0..len as usize {
            let byte = if section.is_bss {
                0
            } else {
                *data
                    .get(off + i)
                    .ok_or(DecompileError::OutOfImage { addr })?
            };
            match section.endian {
                Endian::Little => out |= (byte as Word) << (8 * i),
                Endian::Big => out = (out << 8) | byte as Word,
            }
        }
        Ok(out)
    }

    fn symbol_at(&self, addr: Address) -> Option<&str> {
        self.symbols.get(&addr).map(String::as_str)
    }

    fn symbol_by_name(&self, name: &str) -> Option<Address> {
        self.symbol_addrs.get(name).copied()
    }

    fn is_relocation_at(&self, addr: Address) -> bool {
        self.relocations.contains(&addr)
    }

    fn entry_point(&self) -> Address {
        self.symbol_by_name("main").unwrap_or(self.entry)
    }

    fn machine(&self) -> Machine {
        self.machine
    }

    fn platform(&self) -> Platform {
        self.platform
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn image() -> MemoryImage {
        let mut img = MemoryImage::new(Machine::X86, Platform::Elf);
        img.add_section(
            Section {
                name: ".text".into(),
                addr: Address::new(0x1000),
                size: 8,
                is_code: true,
                is_data: false,
                is_read_only: true,
                is_bss: false,
                endian: Endian::Little,
            },
            vec![0x78, 0x56, 0x34, 0x12, 0, 0, 0, 0],
        );
        img
    }

    #[test_case(1 => 0x78; "byte")]
    #[test_case(2 => 0x5678; "half")]
    #[test_case(4 => 0x1234_5678; "word")]
    fn little_endian_reads(len: u8) -> u64 {
        image().read(Address::new(0x1000), len).unwrap()
    }

    #[test]
    fn reads_outside_every_section_fail() {
        let img = image();
        assert_eq!(img.read(Address::new(0x1001), 2).unwrap(), 0x3456);
        assert!(img.read(Address::new(0x2000), 4).is_err());
    }

    #[test]
    fn entry_prefers_main_symbol() {
        let mut img = image();
        img.set_entry(Address::new(0x1000));
        assert_eq!(img.entry_point(), Address::new(0x1000));
        img.add_symbol(Address::new(0x1004), "main");
        assert_eq!(img.entry_point(), Address::new(0x1004));
    }
}
