//! Whole-object parsing, editing and serialisation.

use std::fs;
use std::path::Path;

use crate::elf::header::SIZEOF_EHDR;
use crate::elf::{
    ElfFormat, ElfHeader, Section, SHN_LORESERVE, SHN_UNDEF, SHT_MIPS_DEBUG, SHT_NOBITS,
    SHT_NULL, SHT_SYMTAB,
};
use crate::error::{Error, Result};

/// A parsed relocatable object.
///
/// The original file image is retained in `data` because the `.mdebug`
/// symbol walk follows absolute file offsets.
#[derive(Debug, Clone)]
pub struct ElfFile {
    pub fmt: ElfFormat,
    pub header: ElfHeader,
    pub sections: Vec<Section>,
    pub symtab_index: usize,
    pub data: Vec<u8>,
}

impl ElfFile {
    /// Parses a relocatable object from its file image.
    pub fn new(data: &[u8]) -> Result<ElfFile> {
        let header = ElfHeader::new(data)?;
        let fmt = header.fmt;

        let offset = header.e_shoff as usize;
        let size = header.e_shentsize as usize;
        let null_header = data
            .get(offset..offset + size)
            .ok_or_else(|| Error::failure("section header table lies outside the file"))?;
        let null_section = Section::new(fmt, null_header, data, 0)?;
        // ELF extended numbering: a zero e_shnum stores the real count in
        // the null section's sh_size.
        let num_sections = if header.e_shnum == 0 {
            null_section.sh_size as usize
        } else {
            header.e_shnum as usize
        };

        let mut sections = vec![null_section];
        for i in 1..num_sections {
            let ind = offset + i * size;
            let shdr = data
                .get(ind..ind + size)
                .ok_or_else(|| Error::failure("section header table lies outside the file"))?;
            sections.push(Section::new(fmt, shdr, data, i)?);
        }

        let mut symtab_index = None;
        for s in &sections {
            if s.sh_type == SHT_SYMTAB {
                if symtab_index.is_some() {
                    return Err(Error::failure("multiple symbol tables"));
                }
                symtab_index = Some(s.index);
            }
        }
        let symtab_index =
            symtab_index.ok_or_else(|| Error::failure("object has no symbol table"))?;

        let mut elf = ElfFile {
            fmt,
            header,
            sections,
            symtab_index,
            data: data.to_vec(),
        };
        elf.assign_names()?;
        for i in 0..elf.sections.len() {
            elf.late_init(i)?;
        }
        elf.link_relocation_targets()?;
        Ok(elf)
    }

    fn assign_names(&mut self) -> Result<()> {
        let shstrndx = self.header.e_shstrndx as usize;
        if shstrndx >= self.sections.len() {
            return Err(Error::failure("bad section name table index"));
        }
        for i in 0..self.sections.len() {
            let name = self.sections[shstrndx].lookup_str(self.sections[i].sh_name)?;
            self.sections[i].name = name;
        }
        Ok(())
    }

    /// Parses the sub-structure of section `index` (symbols or relocations).
    fn late_init(&mut self, index: usize) -> Result<()> {
        let sh_type = self.sections[index].sh_type;
        if sh_type == SHT_SYMTAB {
            let link = self.sections[index].sh_link as usize;
            if link >= self.sections.len() {
                return Err(Error::failure("symbol table has a bad string table link"));
            }
            let symbols = self.sections[index].parse_symbols(&self.sections[link])?;
            self.sections[index].symbols = symbols;
        } else if self.sections[index].is_rel() {
            let relocations = self.sections[index].parse_relocations()?;
            self.sections[index].relocations = relocations;
        }
        Ok(())
    }

    /// Recomputes `rel_target` and `relocated_by` back-references from the
    /// relocation sections' `sh_info` fields.
    fn link_relocation_targets(&mut self) -> Result<()> {
        for s in &mut self.sections {
            s.relocated_by.clear();
            s.rel_target = None;
        }
        for i in 0..self.sections.len() {
            if !self.sections[i].is_rel() {
                continue;
            }
            let target = self.sections[i].sh_info as usize;
            if target >= self.sections.len() {
                return Err(Error::failure(
                    "relocation section points at a missing target",
                ));
            }
            self.sections[i].rel_target = Some(target);
            self.sections[target].relocated_by.push(i);
        }
        Ok(())
    }

    pub fn symtab(&self) -> &Section {
        &self.sections[self.symtab_index]
    }

    pub fn symtab_mut(&mut self) -> &mut Section {
        let index = self.symtab_index;
        &mut self.sections[index]
    }

    /// The string table backing the symbol table.
    pub fn strtab_index(&self) -> usize {
        self.symtab().sh_link as usize
    }

    pub fn find_section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn find_section_mut(&mut self, name: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.name == name)
    }

    pub fn find_section_index(&self, name: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.name == name)
    }

    /// Appends a section: registers its name in the shstrtab, allocates the
    /// next index, and parses its sub-structure so it behaves identically to
    /// an originally-present section. Returns the new index.
    #[allow(clippy::too_many_arguments)]
    pub fn add_section(
        &mut self,
        name: &str,
        sh_type: u32,
        sh_flags: u32,
        sh_link: u32,
        sh_info: u32,
        sh_addralign: u32,
        sh_entsize: u32,
        data: Vec<u8>,
    ) -> Result<usize> {
        let shstrndx = self.header.e_shstrndx as usize;
        let sh_name = self.sections[shstrndx].add_str(name);
        let index = self.sections.len();
        let mut section = Section::from_parts(
            self.fmt,
            sh_name,
            sh_type,
            sh_flags,
            sh_link,
            sh_info,
            sh_addralign,
            sh_entsize,
            data,
            index,
        );
        section.name = name.to_string();
        self.sections.push(section);
        self.late_init(index)?;
        self.link_relocation_targets()?;
        Ok(index)
    }

    /// Removes `.mdebug`-typed sections and any section whose name contains
    /// `.gptab.`, then re-indexes every surviving reference: `sh_link`
    /// always, `sh_info` for relocation sections, symbol `st_shndx` in the
    /// normal range, the section name table index, and the symtab index.
    pub fn drop_mdebug_gptab(&mut self) -> Result<()> {
        let dropped: Vec<bool> = self
            .sections
            .iter()
            .map(|s| s.sh_type == SHT_MIPS_DEBUG || s.name.contains(".gptab."))
            .collect();
        if !dropped.iter().any(|&d| d) {
            return Ok(());
        }

        let mut index_map: Vec<Option<usize>> = Vec::with_capacity(self.sections.len());
        let mut next = 0;
        for &d in &dropped {
            if d {
                index_map.push(None);
            } else {
                index_map.push(Some(next));
                next += 1;
            }
        }
        let remap = |old: usize| -> Result<usize> {
            index_map
                .get(old)
                .copied()
                .flatten()
                .ok_or_else(|| Error::failure("a dropped section is still referenced"))
        };

        let mut sections = Vec::with_capacity(next);
        for (i, mut s) in std::mem::take(&mut self.sections).into_iter().enumerate() {
            if dropped[i] {
                continue;
            }
            s.index = remap(i)?;
            if s.sh_link != 0 {
                s.sh_link = remap(s.sh_link as usize)? as u32;
            }
            if s.is_rel() {
                s.sh_info = remap(s.sh_info as usize)? as u32;
            }
            for sym in &mut s.symbols {
                if sym.st_shndx != SHN_UNDEF && sym.st_shndx < SHN_LORESERVE {
                    sym.st_shndx = remap(sym.st_shndx as usize)? as u16;
                }
            }
            sections.push(s);
        }
        self.sections = sections;
        self.symtab_index = remap(self.symtab_index)?;
        self.header.e_shstrndx = remap(self.header.e_shstrndx as usize)? as u16;
        self.link_relocation_targets()
    }

    /// Serialises the object: header, bodies aligned to `sh_addralign`
    /// (relocating `.mdebug` offsets if that section moved), then the
    /// section header table, with the completed header patched in at
    /// offset 0.
    pub fn write(&mut self, path: &Path) -> Result<()> {
        let mut out: Vec<u8> = Vec::new();
        self.header.e_shnum = self.sections.len() as u16;
        out.extend_from_slice(&self.header.to_bin());

        for s in &mut self.sections {
            if s.sh_type == SHT_NOBITS || s.sh_type == SHT_NULL {
                continue;
            }
            let align = s.sh_addralign as usize;
            if align > 1 && out.len() % align != 0 {
                out.resize(out.len() + align - out.len() % align, 0);
            }
            let old_offset = s.sh_offset;
            s.sh_offset = out.len() as u32;
            if s.sh_type == SHT_MIPS_DEBUG && s.sh_offset != old_offset {
                s.relocate_mdebug(old_offset)?;
            }
            out.extend_from_slice(&s.data);
        }

        if out.len() % 4 != 0 {
            out.resize(out.len() + 4 - out.len() % 4, 0);
        }
        self.header.e_shoff = out.len() as u32;
        for s in &mut self.sections {
            let shdr = s.header_to_bin();
            out.extend_from_slice(&shdr);
        }

        out[..SIZEOF_EHDR].copy_from_slice(&self.header.to_bin());
        fs::write(path, out)?;
        Ok(())
    }
}
