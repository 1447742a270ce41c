//! Symbol-table entries.

use crate::elf::{ElfFormat, Section, SHN_XINDEX};
use crate::error::{Error, Result};

/// Size of one `Elf32_Sym` record.
pub const SIZEOF_SYM: usize = 16;

/// One symbol-table entry, with the name resolved through the string table.
///
/// ```c
/// typedef struct {
///     Elf32_Word    st_name;
///     Elf32_Addr    st_value;
///     Elf32_Word    st_size;
///     unsigned char st_info;
///     unsigned char st_other;
///     Elf32_Half    st_shndx;
/// } Elf32_Sym;
/// ```
///
/// Binding and type are kept unpacked; `to_bin` re-packs them as
/// `(bind << 4) | type`.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub fmt: ElfFormat,
    pub st_name: u32,
    pub st_value: u32,
    pub st_size: u32,
    pub bind: u8,
    pub sym_type: u8,
    pub st_other: u8,
    pub st_shndx: u16,
    pub name: String,
}

impl Symbol {
    /// Parses one record, resolving the name in `strtab`.
    pub fn new(fmt: ElfFormat, data: &[u8], strtab: &Section) -> Result<Symbol> {
        if data.len() < SIZEOF_SYM {
            return Err(Error::failure("truncated symbol record"));
        }
        let st_name = fmt.unpack_u32(&data[0..]);
        let st_info = data[12];
        let st_shndx = fmt.unpack_u16(&data[14..]);
        if st_shndx == SHN_XINDEX {
            return Err(Error::failure(
                "too many sections (SHN_XINDEX not supported)",
            ));
        }
        Ok(Symbol {
            fmt,
            st_name,
            st_value: fmt.unpack_u32(&data[4..]),
            st_size: fmt.unpack_u32(&data[8..]),
            bind: st_info >> 4,
            sym_type: st_info & 15,
            st_other: data[13],
            st_shndx,
            name: strtab.lookup_str(st_name)?,
        })
    }

    /// Builds a symbol from already-known fields. The `name` is the logical
    /// name used for deduplication; `st_name` must point at whatever entry
    /// the caller appends to the string table.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        fmt: ElfFormat,
        st_name: u32,
        st_value: u32,
        st_size: u32,
        bind: u8,
        sym_type: u8,
        st_other: u8,
        st_shndx: u16,
        name: String,
    ) -> Symbol {
        Symbol {
            fmt,
            st_name,
            st_value,
            st_size,
            bind,
            sym_type,
            st_other,
            st_shndx,
            name,
        }
    }

    pub fn to_bin(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SIZEOF_SYM);
        out.extend_from_slice(&self.fmt.pack_u32(self.st_name));
        out.extend_from_slice(&self.fmt.pack_u32(self.st_value));
        out.extend_from_slice(&self.fmt.pack_u32(self.st_size));
        out.push((self.bind << 4) | self.sym_type);
        out.push(self.st_other);
        out.extend_from_slice(&self.fmt.pack_u16(self.st_shndx));
        out
    }
}
