//! The record a finished assembly block leaves behind for object fixup.

/// Temp-symbol name and byte size reserved per output section.
///
/// The name is the identifier of the dummy declaration the compiler will
/// emit (the dummy function itself for `.text`); `None` when the block put
/// nothing in that section.
#[derive(Debug, Clone, Default)]
pub struct FunctionData {
    pub text: (Option<String>, usize),
    pub data: (Option<String>, usize),
    pub rodata: (Option<String>, usize),
    pub bss: (Option<String>, usize),
}

impl FunctionData {
    /// Entries in the order the dummy source declares them.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &(Option<String>, usize))> {
        [
            (".text", &self.text),
            (".data", &self.data),
            (".rodata", &self.rodata),
            (".bss", &self.bss),
        ]
        .into_iter()
    }
}

/// Everything object fixup needs to know about one finished block.
#[derive(Debug, Clone)]
pub struct Function {
    /// Global labels declared in the block's `.text`
    pub text_glabels: Vec<String>,
    /// Verbatim assembly destined for the assembler (everything but `.late_rodata`)
    pub asm_conts: Vec<String>,
    /// 4-byte magic constants standing in for `.late_rodata` words
    pub late_rodata_dummy_bytes: Vec<[u8; 4]>,
    /// Bytes of `.late_rodata` covered by a generated jump table
    pub jtbl_rodata_size: usize,
    /// Verbatim `.late_rodata` assembly
    pub late_rodata_asm_conts: Vec<String>,
    /// Diagnostic tag naming the block's origin
    pub fn_desc: String,
    pub data: FunctionData,
}
