//! Sections, including symbol-table and relocation-table parsing and the
//! `.mdebug` offset relocation.

use crate::elf::{
    ElfFormat, Relocation, Symbol, HDRR_MAGIC, SHF_LINK_ORDER, SHT_MIPS_DEBUG, SHT_NOBITS,
    SHT_REL, SHT_RELA, SHT_STRTAB,
};
use crate::error::{Error, Result};

/// Size of one `Elf32_Shdr` record.
pub const SIZEOF_SHDR: usize = 40;

/// Gated HDRR sub-table offsets: (count field, offset field), both byte
/// positions into the Symbolic header. An offset moves only when its count
/// is non-zero.
const HDRR_OFFSET_FIELDS: [(usize, usize); 11] = [
    (8, 12),  // cbLine / cbLineOffset
    (16, 20), // idnMax / cbDnOffset
    (24, 28), // ipdMax / cbPdOffset
    (32, 36), // isymMax / cbSymOffset
    (40, 44), // ioptMax / cbOptOffset
    (48, 52), // iauxMax / cbAuxOffset
    (56, 60), // issMax / cbSsOffset
    (64, 68), // issExtMax / cbSsExtOffset
    (72, 76), // ifdMax / cbFdOffset
    (80, 84), // crfd / cbRfdOffset
    (88, 92), // iextMax / cbExtOffset
];

/// One section: header fields, body bytes, and the parsed sub-structure for
/// symbol and relocation tables.
///
/// ```c
/// typedef struct {
///     Elf32_Word sh_name;
///     Elf32_Word sh_type;
///     Elf32_Word sh_flags;
///     Elf32_Addr sh_addr;
///     Elf32_Off  sh_offset;
///     Elf32_Word sh_size;
///     Elf32_Word sh_link;
///     Elf32_Word sh_info;
///     Elf32_Word sh_addralign;
///     Elf32_Word sh_entsize;
/// } Elf32_Shdr;
/// ```
///
/// Cross-references (`rel_target`, `relocated_by`) are indices into the
/// owning [`ElfFile`](crate::elf::ElfFile)'s section vector, filled in by a
/// post-parse pass.
#[derive(Debug, Clone)]
pub struct Section {
    pub fmt: ElfFormat,
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u32,
    pub sh_addr: u32,
    pub sh_offset: u32,
    pub sh_size: u32,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u32,
    pub sh_entsize: u32,
    pub data: Vec<u8>,
    pub index: usize,
    pub name: String,
    /// Relocation sections whose sh_info points here
    pub relocated_by: Vec<usize>,
    /// For relocation sections, the section the entries apply to
    pub rel_target: Option<usize>,
    /// Parsed entries when this is a SHT_SYMTAB section
    pub symbols: Vec<Symbol>,
    /// Parsed entries when this is a SHT_REL/SHT_RELA section
    pub relocations: Vec<Relocation>,
}

impl Section {
    /// Parses a section header and slices the body out of the file image.
    pub fn new(fmt: ElfFormat, header: &[u8], file_data: &[u8], index: usize) -> Result<Section> {
        if header.len() < SIZEOF_SHDR {
            return Err(Error::failure("truncated section header"));
        }
        let sh_type = fmt.unpack_u32(&header[4..]);
        let sh_flags = fmt.unpack_u32(&header[8..]);
        let sh_offset = fmt.unpack_u32(&header[16..]);
        let sh_size = fmt.unpack_u32(&header[20..]);
        let sh_entsize = fmt.unpack_u32(&header[36..]);
        if sh_flags & SHF_LINK_ORDER != 0 {
            return Err(Error::failure("SHF_LINK_ORDER sections are not supported"));
        }
        if sh_entsize != 0 && sh_size % sh_entsize != 0 {
            return Err(Error::failure(
                "section size is not a multiple of its entry size",
            ));
        }
        let data = if sh_type == SHT_NOBITS {
            Vec::new()
        } else {
            let start = sh_offset as usize;
            let end = start + sh_size as usize;
            file_data
                .get(start..end)
                .ok_or_else(|| Error::failure("section body lies outside the file"))?
                .to_vec()
        };
        Ok(Section {
            fmt,
            sh_name: fmt.unpack_u32(&header[0..]),
            sh_type,
            sh_flags,
            sh_addr: fmt.unpack_u32(&header[12..]),
            sh_offset,
            sh_size,
            sh_link: fmt.unpack_u32(&header[24..]),
            sh_info: fmt.unpack_u32(&header[28..]),
            sh_addralign: fmt.unpack_u32(&header[32..]),
            sh_entsize,
            data,
            index,
            name: String::new(),
            relocated_by: Vec::new(),
            rel_target: None,
            symbols: Vec::new(),
            relocations: Vec::new(),
        })
    }

    /// Builds a fresh section not originating from a file image.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        fmt: ElfFormat,
        sh_name: u32,
        sh_type: u32,
        sh_flags: u32,
        sh_link: u32,
        sh_info: u32,
        sh_addralign: u32,
        sh_entsize: u32,
        data: Vec<u8>,
        index: usize,
    ) -> Section {
        Section {
            fmt,
            sh_name,
            sh_type,
            sh_flags,
            sh_addr: 0,
            sh_offset: 0,
            sh_size: data.len() as u32,
            sh_link,
            sh_info,
            sh_addralign,
            sh_entsize,
            data,
            index,
            name: String::new(),
            relocated_by: Vec::new(),
            rel_target: None,
            symbols: Vec::new(),
            relocations: Vec::new(),
        }
    }

    pub fn is_rel(&self) -> bool {
        self.sh_type == SHT_REL || self.sh_type == SHT_RELA
    }

    /// Resolves a NUL-terminated string table entry. Latin-1 semantics: one
    /// byte per character, matching how the rest of the pipeline round-trips
    /// legacy encodings.
    pub fn lookup_str(&self, index: u32) -> Result<String> {
        if self.sh_type != SHT_STRTAB {
            return Err(Error::failure("string lookup in a non-strtab section"));
        }
        let start = index as usize;
        let rest = self
            .data
            .get(start..)
            .ok_or_else(|| Error::failure("string table index out of range"))?;
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::failure("unterminated string table entry"))?;
        Ok(rest[..len].iter().map(|&b| b as char).collect())
    }

    /// Appends a NUL-terminated entry, returning its offset.
    pub fn add_str(&mut self, string: &str) -> u32 {
        let ret = self.data.len() as u32;
        self.data.extend(string.chars().map(|c| c as u32 as u8));
        self.data.push(0);
        ret
    }

    /// Serialises the header, refreshing `sh_size` from the body.
    pub fn header_to_bin(&mut self) -> Vec<u8> {
        if self.sh_type != SHT_NOBITS {
            self.sh_size = self.data.len() as u32;
        }
        let fmt = self.fmt;
        let mut out = Vec::with_capacity(SIZEOF_SHDR);
        out.extend_from_slice(&fmt.pack_u32(self.sh_name));
        out.extend_from_slice(&fmt.pack_u32(self.sh_type));
        out.extend_from_slice(&fmt.pack_u32(self.sh_flags));
        out.extend_from_slice(&fmt.pack_u32(self.sh_addr));
        out.extend_from_slice(&fmt.pack_u32(self.sh_offset));
        out.extend_from_slice(&fmt.pack_u32(self.sh_size));
        out.extend_from_slice(&fmt.pack_u32(self.sh_link));
        out.extend_from_slice(&fmt.pack_u32(self.sh_info));
        out.extend_from_slice(&fmt.pack_u32(self.sh_addralign));
        out.extend_from_slice(&fmt.pack_u32(self.sh_entsize));
        out
    }

    /// Parses the symbol entries of a SHT_SYMTAB section against its
    /// string table.
    pub(super) fn parse_symbols(&self, strtab: &Section) -> Result<Vec<Symbol>> {
        if self.sh_entsize as usize != crate::elf::symbol::SIZEOF_SYM {
            return Err(Error::failure("unexpected symbol table entry size"));
        }
        self.data
            .chunks(self.sh_entsize as usize)
            .map(|chunk| Symbol::new(self.fmt, chunk, strtab))
            .collect()
    }

    /// Parses the entries of a SHT_REL/SHT_RELA section.
    pub(super) fn parse_relocations(&self) -> Result<Vec<Relocation>> {
        let entsize = Relocation::entsize(self.sh_type);
        if self.sh_entsize as usize != entsize {
            return Err(Error::failure("unexpected relocation table entry size"));
        }
        self.data
            .chunks(entsize)
            .map(|chunk| Relocation::new(self.fmt, chunk, self.sh_type))
            .collect()
    }

    /// Looks a symbol up by name in a symbol-table section, returning its
    /// section index and value.
    pub fn find_symbol(&self, name: &str) -> Option<(u16, u32)> {
        self.symbols
            .iter()
            .find(|s| s.name == name)
            .map(|s| (s.st_shndx, s.st_value))
    }

    /// Like [`find_symbol`](Section::find_symbol), but requires the symbol
    /// to live in the given section.
    pub fn find_symbol_in_section(&self, name: &str, section: &Section) -> Result<u32> {
        match self.find_symbol(name) {
            Some((shndx, value)) if shndx as usize == section.index => Ok(value),
            Some(_) => Err(Error::failure(format!(
                "symbol {} is not in section {}",
                name, section.name
            ))),
            None => Err(Error::failure(format!("symbol not found: {}", name))),
        }
    }

    /// Rewrites the 25-field Symbolic HDRR after the section body moved from
    /// `original_offset` to its current `sh_offset`. Each sub-table file
    /// offset shifts by the difference, gated on its count being non-zero.
    pub fn relocate_mdebug(&mut self, original_offset: u32) -> Result<()> {
        if self.sh_type != SHT_MIPS_DEBUG {
            return Err(Error::failure("relocate_mdebug on a non-.mdebug section"));
        }
        if self.data.len() < 0x60 {
            return Err(Error::failure(".mdebug section too small for its HDRR"));
        }
        let fmt = self.fmt;
        if fmt.unpack_u16(&self.data[0..]) != HDRR_MAGIC {
            return Err(Error::failure(
                "invalid magic value for .mdebug symbolic header",
            ));
        }
        let shift_by = self.sh_offset as i64 - original_offset as i64;
        for (count_pos, offset_pos) in HDRR_OFFSET_FIELDS {
            if fmt.unpack_u32(&self.data[count_pos..]) == 0 {
                continue;
            }
            let old = fmt.unpack_u32(&self.data[offset_pos..]);
            let new = (old as i64 + shift_by) as u32;
            self.data[offset_pos..offset_pos + 4].copy_from_slice(&fmt.pack_u32(new));
        }
        Ok(())
    }
}
