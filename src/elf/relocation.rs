//! Relocation records, REL and RELA.

use crate::elf::{ElfFormat, SHT_REL};
use crate::error::{Error, Result};

/// One relocation entry. `r_info` is kept unpacked as `sym_index` and
/// `rel_type`; `r_addend` is present only for `SHT_RELA` records.
#[derive(Debug, Clone)]
pub struct Relocation {
    pub fmt: ElfFormat,
    sh_type: u32,
    pub r_offset: u32,
    pub sym_index: usize,
    pub rel_type: u8,
    pub r_addend: u32,
}

impl Relocation {
    pub fn new(fmt: ElfFormat, data: &[u8], sh_type: u32) -> Result<Relocation> {
        let entsize = Relocation::entsize(sh_type);
        if data.len() < entsize {
            return Err(Error::failure("truncated relocation record"));
        }
        let r_info = fmt.unpack_u32(&data[4..]);
        Ok(Relocation {
            fmt,
            sh_type,
            r_offset: fmt.unpack_u32(&data[0..]),
            sym_index: (r_info >> 8) as usize,
            rel_type: (r_info & 0xff) as u8,
            r_addend: if sh_type == SHT_REL {
                0
            } else {
                fmt.unpack_u32(&data[8..])
            },
        })
    }

    /// Record size for a relocation section of the given type.
    pub fn entsize(sh_type: u32) -> usize {
        if sh_type == SHT_REL {
            8
        } else {
            12
        }
    }

    pub fn to_bin(&self) -> Vec<u8> {
        let r_info = ((self.sym_index as u32) << 8) | self.rel_type as u32;
        let mut out = Vec::with_capacity(Relocation::entsize(self.sh_type));
        out.extend_from_slice(&self.fmt.pack_u32(self.r_offset));
        out.extend_from_slice(&self.fmt.pack_u32(r_info));
        if self.sh_type != SHT_REL {
            out.extend_from_slice(&self.fmt.pack_u32(self.r_addend));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::SHT_RELA;

    #[test]
    fn rel_and_rela_round_trip() {
        let fmt = ElfFormat::new(true);
        let rel = Relocation::new(fmt, &[0, 0, 0, 8, 0, 0, 3, 5], SHT_REL).unwrap();
        assert_eq!(rel.r_offset, 8);
        assert_eq!(rel.sym_index, 3);
        assert_eq!(rel.rel_type, 5);
        assert_eq!(rel.to_bin(), vec![0, 0, 0, 8, 0, 0, 3, 5]);

        let bytes = [0, 0, 0, 12, 0, 0, 1, 2, 0, 0, 0, 9];
        let rela = Relocation::new(fmt, &bytes, SHT_RELA).unwrap();
        assert_eq!(rela.r_addend, 9);
        assert_eq!(rela.to_bin(), bytes.to_vec());
    }
}
