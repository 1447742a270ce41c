//! Embedded-assembly handling: the per-block accumulator that measures the
//! byte footprint of a `GLOBAL_ASM` block, and the record describing the
//! replacement function it turns into.

mod block;
mod function;

pub use block::GlobalAsmBlock;
pub use function::{Function, FunctionData};
