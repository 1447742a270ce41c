//! The 52-byte ELF32 file header.

use crate::elf::{
    ElfFormat, EI_CLASS, EI_DATA, EI_NIDENT, ELFCLASS32, ELFDATA2LSB, ELFDATA2MSB, ET_REL,
};
use crate::error::{Error, Result};

/// Size of the ELF32 header in bytes.
pub const SIZEOF_EHDR: usize = 52;

/// Parsed ELF32 header.
///
/// ```c
/// typedef struct {
///     unsigned char e_ident[EI_NIDENT];
///     Elf32_Half    e_type;
///     Elf32_Half    e_machine;
///     Elf32_Word    e_version;
///     Elf32_Addr    e_entry;
///     Elf32_Off     e_phoff;
///     Elf32_Off     e_shoff;
///     Elf32_Word    e_flags;
///     Elf32_Half    e_ehsize;
///     Elf32_Half    e_phentsize;
///     Elf32_Half    e_phnum;
///     Elf32_Half    e_shentsize;
///     Elf32_Half    e_shnum;
///     Elf32_Half    e_shstrndx;
/// } Elf32_Ehdr;
/// ```
#[derive(Debug, Clone)]
pub struct ElfHeader {
    pub fmt: ElfFormat,
    pub e_ident: [u8; EI_NIDENT],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u32,
    pub e_phoff: u32,
    pub e_shoff: u32,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

impl ElfHeader {
    /// Parses and validates the header. Only 32-bit relocatable objects are
    /// accepted; the byte order is decoded from `e_ident[EI_DATA]`.
    pub fn new(data: &[u8]) -> Result<ElfHeader> {
        if data.len() < SIZEOF_EHDR {
            return Err(Error::failure("truncated ELF header"));
        }
        if &data[..4] != b"\x7fELF" {
            return Err(Error::failure("not an ELF file"));
        }

        let mut e_ident = [0u8; EI_NIDENT];
        e_ident.copy_from_slice(&data[..EI_NIDENT]);
        if e_ident[EI_CLASS] != ELFCLASS32 {
            return Err(Error::failure("only 32-bit ELF objects are supported"));
        }
        let fmt = match e_ident[EI_DATA] {
            ELFDATA2LSB => ElfFormat::new(false),
            ELFDATA2MSB => ElfFormat::new(true),
            other => {
                return Err(Error::failure(format!(
                    "unknown ELF data encoding: {}",
                    other
                )))
            }
        };

        let header = ElfHeader {
            fmt,
            e_ident,
            e_type: fmt.unpack_u16(&data[16..]),
            e_machine: fmt.unpack_u16(&data[18..]),
            e_version: fmt.unpack_u32(&data[20..]),
            e_entry: fmt.unpack_u32(&data[24..]),
            e_phoff: fmt.unpack_u32(&data[28..]),
            e_shoff: fmt.unpack_u32(&data[32..]),
            e_flags: fmt.unpack_u32(&data[36..]),
            e_ehsize: fmt.unpack_u16(&data[40..]),
            e_phentsize: fmt.unpack_u16(&data[42..]),
            e_phnum: fmt.unpack_u16(&data[44..]),
            e_shentsize: fmt.unpack_u16(&data[46..]),
            e_shnum: fmt.unpack_u16(&data[48..]),
            e_shstrndx: fmt.unpack_u16(&data[50..]),
        };
        if header.e_type != ET_REL {
            return Err(Error::failure("not a relocatable object file"));
        }
        Ok(header)
    }

    pub fn to_bin(&self) -> Vec<u8> {
        let fmt = self.fmt;
        let mut out = Vec::with_capacity(SIZEOF_EHDR);
        out.extend_from_slice(&self.e_ident);
        out.extend_from_slice(&fmt.pack_u16(self.e_type));
        out.extend_from_slice(&fmt.pack_u16(self.e_machine));
        out.extend_from_slice(&fmt.pack_u32(self.e_version));
        out.extend_from_slice(&fmt.pack_u32(self.e_entry));
        out.extend_from_slice(&fmt.pack_u32(self.e_phoff));
        out.extend_from_slice(&fmt.pack_u32(self.e_shoff));
        out.extend_from_slice(&fmt.pack_u32(self.e_flags));
        out.extend_from_slice(&fmt.pack_u16(self.e_ehsize));
        out.extend_from_slice(&fmt.pack_u16(self.e_phentsize));
        out.extend_from_slice(&fmt.pack_u16(self.e_phnum));
        out.extend_from_slice(&fmt.pack_u16(self.e_shentsize));
        out.extend_from_slice(&fmt.pack_u16(self.e_shnum));
        out.extend_from_slice(&fmt.pack_u16(self.e_shstrndx));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(big_endian: bool) -> Vec<u8> {
        let fmt = ElfFormat::new(big_endian);
        let mut data = vec![0u8; SIZEOF_EHDR];
        data[..4].copy_from_slice(b"\x7fELF");
        data[EI_CLASS] = ELFCLASS32;
        data[EI_DATA] = if big_endian { ELFDATA2MSB } else { ELFDATA2LSB };
        data[16..18].copy_from_slice(&fmt.pack_u16(ET_REL));
        data[18..20].copy_from_slice(&fmt.pack_u16(8)); // EM_MIPS
        data[46..48].copy_from_slice(&fmt.pack_u16(40));
        data
    }

    #[test]
    fn parses_and_serialises_both_endiannesses() {
        for &big in &[false, true] {
            let data = sample_header(big);
            let header = ElfHeader::new(&data).unwrap();
            assert_eq!(header.fmt.is_big_endian, big);
            assert_eq!(header.e_machine, 8);
            assert_eq!(header.to_bin(), data);
        }
    }

    #[test]
    fn rejects_bad_magic() {
        let mut data = sample_header(true);
        data[0] = 0x7e;
        assert!(ElfHeader::new(&data).is_err());
    }

    #[test]
    fn rejects_64_bit_objects() {
        let mut data = sample_header(true);
        data[EI_CLASS] = 2;
        assert!(ElfHeader::new(&data).is_err());
    }
}
