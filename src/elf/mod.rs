//! Minimal ELF32 object model: enough parsing, editing and serialising to
//! splice assembled bytes, symbols and relocations into a compiler's output.
//!
//! Only the features the splice needs are supported; this is not a general
//! ELF editor.

mod file;
mod format;
mod header;
mod relocation;
mod section;
mod symbol;

pub use file::ElfFile;
pub use format::ElfFormat;
pub use header::ElfHeader;
pub use relocation::Relocation;
pub use section::Section;
pub use symbol::Symbol;

/// Number of bytes in the e_ident array.
pub const EI_NIDENT: usize = 16;
/// File class byte index.
pub const EI_CLASS: usize = 4;
/// Data encoding byte index.
pub const EI_DATA: usize = 5;
/// 32-bit objects.
pub const ELFCLASS32: u8 = 1;
/// 2's complement, little endian.
pub const ELFDATA2LSB: u8 = 1;
/// 2's complement, big endian.
pub const ELFDATA2MSB: u8 = 2;

/// Relocatable file.
pub const ET_REL: u16 = 1;

/// Undefined section.
pub const SHN_UNDEF: u16 = 0;
/// Start of reserved section indices.
pub const SHN_LORESERVE: u16 = 0xff00;
/// Associated symbol is absolute.
pub const SHN_ABS: u16 = 0xfff1;
/// Index is in the extra table (unsupported here).
pub const SHN_XINDEX: u16 = 0xffff;

/// Symbol is a data object.
pub const STT_OBJECT: u8 = 1;
/// Symbol is a code object.
pub const STT_FUNC: u8 = 2;

/// Local symbol.
pub const STB_LOCAL: u8 = 0;
/// Global symbol.
pub const STB_GLOBAL: u8 = 1;

/// Default symbol visibility.
pub const STV_DEFAULT: u8 = 0;

/// Section header table entry unused.
pub const SHT_NULL: u32 = 0;
/// Program data.
pub const SHT_PROGBITS: u32 = 1;
/// Symbol table.
pub const SHT_SYMTAB: u32 = 2;
/// String table.
pub const SHT_STRTAB: u32 = 3;
/// Relocation entries with addends.
pub const SHT_RELA: u32 = 4;
/// Program space with no data (bss).
pub const SHT_NOBITS: u32 = 8;
/// Relocation entries, no addends.
pub const SHT_REL: u32 = 9;
/// MIPS global-pointer table.
pub const SHT_MIPS_GPTAB: u32 = 0x7000_0003;
/// MIPS ECOFF-style debug section (`.mdebug`).
pub const SHT_MIPS_DEBUG: u32 = 0x7000_0005;
/// MIPS register-usage section (`.reginfo`).
pub const SHT_MIPS_REGINFO: u32 = 0x7000_0006;

/// Preserve section order after combining (unsupported here).
pub const SHF_LINK_ORDER: u32 = 0x80;

/// Direct 32-bit relocation.
pub const R_MIPS_32: u8 = 2;
/// 26-bit jump-target relocation.
pub const R_MIPS_26: u8 = 4;
/// High 16 bits of a symbol address.
pub const R_MIPS_HI16: u8 = 5;
/// Low 16 bits of a symbol address.
pub const R_MIPS_LO16: u8 = 6;

/// Magic of the `.mdebug` Symbolic HDRR.
pub const HDRR_MAGIC: u16 = 0x7009;

// Symbol-type field of .mdebug symbol records.
pub const MIPS_DEBUG_ST_STATIC: u32 = 2;
pub const MIPS_DEBUG_ST_PROC: u32 = 6;
pub const MIPS_DEBUG_ST_BLOCK: u32 = 7;
pub const MIPS_DEBUG_ST_END: u32 = 8;
pub const MIPS_DEBUG_ST_FILE: u32 = 11;
pub const MIPS_DEBUG_ST_STATIC_PROC: u32 = 14;
pub const MIPS_DEBUG_ST_STRUCT: u32 = 26;
pub const MIPS_DEBUG_ST_UNION: u32 = 27;
pub const MIPS_DEBUG_ST_ENUM: u32 = 28;
