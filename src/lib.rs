//! # asmpp
//!
//! Embed hand-written MIPS assembly in C or Pascal sources compiled by a
//! legacy toolchain (the SGI IDO compiler) that has no inline-assembly
//! support.
//!
//! The tool runs in two phases around the external compile step:
//!
//! 1. **Pre-processing** ([`parse_source`]): `GLOBAL_ASM`/`INCLUDE_ASM`/
//!    `INCLUDE_RODATA` blocks are measured directive by directive and
//!    replaced with dummy function bodies whose compiled output occupies
//!    exactly the same byte ranges in `.text`, `.data`, `.rodata`,
//!    `.late_rodata` and `.bss`. Line numbers are preserved so compiler
//!    diagnostics stay accurate.
//! 2. **Post-processing** ([`fixup_objfile`]): the extracted assembly is
//!    run through the real assembler, and the resulting bytes, symbols and
//!    relocations are spliced over the dummy positions in the compiler's
//!    object, leaving a relocatable object the linker cannot tell from
//!    native output.
//!
//! ## Library usage
//!
//! ```no_run
//! use std::path::Path;
//! use asmpp::{parse_source, Encoding, OptLevel, Opts};
//!
//! # fn main() -> asmpp::Result<()> {
//! let enc = Encoding::from_label("latin1")?;
//! let opts = Opts {
//!     opt: OptLevel::O2,
//!     framepointer: false,
//!     mips1: false,
//!     kpic: false,
//!     pascal: false,
//!     input_enc: enc,
//!     output_enc: enc,
//!     enable_cutscene_data_float_encoding: false,
//! };
//! let result = parse_source(Path::new("src/game/main.c"), &opts)?;
//! print!("{}", result.output_lines.join("\n"));
//! # Ok(())
//! # }
//! ```

pub mod asm;
pub mod elf;
pub mod error;
pub mod fixup;
pub mod options;
pub mod preprocess;
pub mod state;

pub use asm::{Function, FunctionData, GlobalAsmBlock};
pub use error::{Error, Result};
pub use fixup::fixup_objfile;
pub use options::{ConvertStatics, Encoding, OptLevel, Opts};
pub use preprocess::{parse_source, RunResult};
pub use state::GlobalState;
