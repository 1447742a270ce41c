//! Per-file build context: unique-name and late-rodata magic counters plus
//! the instruction-count scalars derived from the compiler flags.

use crate::options::{OptLevel, Opts};

/// Mutable state threaded through one preprocessing run.
///
/// Born fresh for every source file; nothing leaks across files.
pub struct GlobalState {
    /// A value that hopefully never appears as a 32-bit rodata constant (or
    /// we miscompile late rodata). Increases by 1 in each step.
    late_rodata_hex: u32,
    valuectr: usize,
    namectr: usize,
    /// Smallest `.text` block the dummy-code strategy can represent
    pub min_instr_count: usize,
    /// Leading instruction slots left empty to absorb the function prologue
    pub skip_instr_count: usize,
    /// Whether `switch`-generated jump tables may stand in for late rodata
    pub use_jtbl_for_rodata: bool,
    /// Extra prologue slots that appear only when late rodata is present
    pub prelude_if_late_rodata: usize,
    pub mips1: bool,
    pub pascal: bool,
}

impl GlobalState {
    /// Derives the per-run scalars from the compiler-matching flags.
    ///
    /// The instruction counts mirror how many prologue instructions the IDO
    /// compiler emits for an empty function under each flag combination.
    pub fn new(opts: &Opts) -> GlobalState {
        let (mut min_instr_count, mut skip_instr_count) = match (opts.opt, opts.framepointer) {
            (OptLevel::O1 | OptLevel::O2, false) => (2, 1),
            (OptLevel::O1 | OptLevel::O2, true) => (6, 5),
            (OptLevel::O0, false) => (4, 4),
            (OptLevel::O0, true) => (8, 8),
            (OptLevel::G, false) => (4, 4),
            (OptLevel::G, true) => (7, 7),
            (OptLevel::G3, false) => (2, 2),
            (OptLevel::G3, true) => (4, 4),
        };

        let mut prelude_if_late_rodata = 0;
        if opts.kpic {
            // Without optimizations, the PIC prelude always takes up three
            // instructions. With optimizations, the prelude is optimized out
            // if there's no late rodata.
            if matches!(opts.opt, OptLevel::O2 | OptLevel::G3) {
                prelude_if_late_rodata = 3;
            } else {
                min_instr_count += 3;
                skip_instr_count += 3;
            }
        }

        let use_jtbl_for_rodata = matches!(opts.opt, OptLevel::O2 | OptLevel::G3)
            && !opts.framepointer
            && !opts.kpic;

        GlobalState {
            late_rodata_hex: 0xE012_3456,
            valuectr: 0,
            namectr: 0,
            min_instr_count,
            skip_instr_count,
            use_jtbl_for_rodata,
            prelude_if_late_rodata,
            mips1: opts.mips1,
            pascal: opts.pascal,
        }
    }

    /// Hands out the next 4-byte late-rodata magic, big-endian.
    ///
    /// Values whose low half is zero are skipped so the assembler never
    /// reaches for a bare `lui` encoding that a later byte search could
    /// mistake for the constant.
    pub fn next_late_rodata_hex(&mut self) -> [u8; 4] {
        if self.late_rodata_hex & 0xffff == 0 {
            self.late_rodata_hex += 1;
        }
        let value = self.late_rodata_hex;
        self.late_rodata_hex += 1;
        value.to_be_bytes()
    }

    /// Produces a unique temp identifier of shape `_asmpp_<cat>_<n>`.
    pub fn make_name(&mut self, cat: &str) -> String {
        self.namectr += 1;
        format!("_asmpp_{}_{}", cat, self.namectr)
    }

    /// Opening of a replacement dummy function.
    pub fn func_prologue(&self, name: &str) -> String {
        if self.pascal {
            [
                &format!("procedure {}();", name),
                "type",
                " pi = ^integer;",
                " pf = ^single;",
                " pd = ^double;",
                "var",
                " vi: pi;",
                " vf: pf;",
                " vd: pd;",
                "begin",
                " vi := vi;",
                " vf := vf;",
                " vd := vd;",
            ]
            .join(" ")
        } else {
            format!("void {}(void) {{", name)
        }
    }

    /// Closing of a replacement dummy function.
    pub fn func_epilogue(&self) -> String {
        if self.pascal {
            "end;".to_string()
        } else {
            "}".to_string()
        }
    }

    pub fn pascal_assignment_float(&mut self, val: f32) -> String {
        self.pascal_assignment('f', &format!("{:?}", val))
    }

    pub fn pascal_assignment_double(&mut self, val: f64) -> String {
        self.pascal_assignment('d', &format!("{:?}", val))
    }

    pub fn pascal_assignment_int(&mut self, val: i32) -> String {
        self.pascal_assignment('i', &val.to_string())
    }

    // Pascal cannot dereference a literal address, so each dummy statement
    // assigns through a typed pointer variable at a small unique address.
    fn pascal_assignment(&mut self, tp: char, val: &str) -> String {
        self.valuectr += 1;
        let address = (8 * self.valuectr) & 0x7FFF;
        format!("v{} := p{}({}); v{}^ := {};", tp, tp, address, tp, val)
    }
}
