//! The assembly block accumulator.
//!
//! `GlobalAsmBlock` does not assemble anything: it pattern-matches each
//! stripped line against the directives it recognises and predicts the byte
//! footprint a real assembler would produce per output section, then
//! `finish` emits a replacement high-level function body reserving exactly
//! those sizes.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::asm::function::{Function, FunctionData};
use crate::error::{Error, Result};
use crate::options::Encoding;
use crate::state::GlobalState;

/// Filler statements per dummy function before a fresh one is opened.
/// Around 284 instructions the IRIX compiler switches to a heavier
/// optimisation mode with a different prologue, and Pascal runs out of
/// distinct statements; stay well below both.
const MAX_FN_SIZE: usize = 100;

lazy_static! {
    // Comments and string literals in one pass: matches starting with '/'
    // or '#' are comments and collapse to a space, string matches survive.
    static ref RE_COMMENT_OR_STRING: Regex =
        Regex::new(r#"#.*|/\*.*?\*/|"(?:\\.|[^\\"])*""#).unwrap();
    static ref RE_LABEL: Regex = Regex::new(r"^[a-zA-Z0-9_]+:\s*").unwrap();
}

fn comment_replacer(caps: &Captures) -> String {
    let s = &caps[0];
    if s.starts_with('/') || s.starts_with('#') {
        " ".to_string()
    } else {
        s.to_string()
    }
}

/// Integer literal in the directive syntax: decimal, or prefixed
/// hex/octal/binary.
fn parse_int(text: &str) -> Option<isize> {
    let text = text.trim();
    let (negative, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = if let Some(rest) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        isize::from_str_radix(rest, 16)
    } else if let Some(rest) = text.strip_prefix("0o").or_else(|| text.strip_prefix("0O")) {
        isize::from_str_radix(rest, 8)
    } else if let Some(rest) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        isize::from_str_radix(rest, 2)
    } else {
        text.parse()
    };
    value.ok().map(|v| if negative { -v } else { v })
}

/// Output sections an embedded block may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Text,
    Data,
    Rodata,
    LateRodata,
    Bss,
}

impl Section {
    fn from_name(name: &str) -> Option<Section> {
        match name {
            ".text" => Some(Section::Text),
            ".data" => Some(Section::Data),
            ".rdata" | ".rodata" => Some(Section::Rodata),
            ".late_rodata" => Some(Section::LateRodata),
            ".bss" => Some(Section::Bss),
            _ => None,
        }
    }
}

/// Byte footprint accumulated per section.
#[derive(Debug, Clone, Copy, Default)]
struct SectionSizes {
    text: usize,
    data: usize,
    rodata: usize,
    late_rodata: usize,
    bss: usize,
}

impl SectionSizes {
    fn get_mut(&mut self, section: Section) -> &mut usize {
        match section {
            Section::Text => &mut self.text,
            Section::Data => &mut self.data,
            Section::Rodata => &mut self.rodata,
            Section::LateRodata => &mut self.late_rodata,
            Section::Bss => &mut self.bss,
        }
    }
}

/// One embedded assembly block, alive from its opening delimiter until
/// [`finish`](GlobalAsmBlock::finish) turns it into a [`Function`].
pub struct GlobalAsmBlock {
    fn_desc: String,
    cur_section: Section,
    asm_conts: Vec<String>,
    late_rodata_asm_conts: Vec<String>,
    late_rodata_alignment: usize,
    late_rodata_alignment_from_content: bool,
    text_glabels: Vec<String>,
    fn_section_sizes: SectionSizes,
    /// (line index within the block, instruction count) pairs used to place
    /// dummy statements back onto the source lines they came from
    fn_ins_inds: Vec<(usize, usize)>,
    glued_line: String,
    num_lines: usize,
}

impl GlobalAsmBlock {
    pub fn new(fn_desc: String) -> GlobalAsmBlock {
        GlobalAsmBlock {
            fn_desc,
            cur_section: Section::Text,
            asm_conts: Vec::new(),
            late_rodata_asm_conts: Vec::new(),
            late_rodata_alignment: 0,
            late_rodata_alignment_from_content: false,
            text_glabels: Vec::new(),
            fn_section_sizes: SectionSizes::default(),
            fn_ins_inds: Vec::new(),
            glued_line: String::new(),
            num_lines: 0,
        }
    }

    fn fail(&self, message: &str, line: Option<&str>) -> Error {
        let mut context = self.fn_desc.clone();
        if let Some(line) = line {
            context.push_str(&format!(", at line \"{}\"", line));
        }
        Error::failure(format!("{}\nwithin {}", message, context))
    }

    /// Counts the bytes the string arguments of `.ascii`-family directives
    /// occupy, in the output encoding, with escape sequences resolved.
    fn count_quoted_size(
        &self,
        line: &str,
        z: bool,
        real_line: &str,
        output_enc: &Encoding,
    ) -> Result<usize> {
        let bytes = output_enc.encode(line)?;
        let mut in_quote = false;
        let mut has_comma = true;
        let mut num_parts = 0usize;
        let mut ret = 0usize;
        let mut i = 0;
        while i < bytes.len() {
            let c = bytes[i];
            i += 1;
            if !in_quote {
                if c == b'"' {
                    in_quote = true;
                    if z && !has_comma {
                        return Err(self.fail(
                            ".asciiz with glued strings is not supported due to GNU as version diffs",
                            Some(real_line),
                        ));
                    }
                    num_parts += 1;
                } else if c == b',' {
                    has_comma = true;
                }
            } else {
                if c == b'"' {
                    in_quote = false;
                    has_comma = false;
                    continue;
                }
                ret += 1;
                if c != b'\\' {
                    continue;
                }
                if i == bytes.len() {
                    return Err(
                        self.fail("backslash at end of line not supported", Some(real_line))
                    );
                }
                let c = bytes[i];
                i += 1;
                // (a "bfnrtv" escape is already counted as one byte)
                if c == b'x' {
                    // hex literal, consume any number of hex chars, possibly none
                    while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
                        i += 1;
                    }
                } else if c.is_ascii_digit() {
                    // octal literal, consume up to two more digits; 0-9
                    // rather than 0-7 matches GNU as
                    let mut it = 0;
                    while i < bytes.len() && bytes[i].is_ascii_digit() && it < 2 {
                        i += 1;
                        it += 1;
                    }
                }
            }
        }
        if in_quote {
            return Err(self.fail("unterminated string literal", Some(real_line)));
        }
        if num_parts == 0 {
            return Err(self.fail(".ascii with no string", Some(real_line)));
        }
        Ok(ret + if z { num_parts } else { 0 })
    }

    fn align(&mut self, n: usize) {
        let size = self.fn_section_sizes.get_mut(self.cur_section);
        *size = (*size + n - 1) / n * n;
    }

    fn add_sized(&mut self, size: isize, line: &str) -> Result<()> {
        if matches!(self.cur_section, Section::Text | Section::LateRodata) && size % 4 != 0 {
            return Err(self.fail("size must be a multiple of 4", Some(line)));
        }
        if size < 0 {
            return Err(self.fail("size cannot be negative", Some(line)));
        }
        let size = size as usize;
        *self.fn_section_sizes.get_mut(self.cur_section) += size;
        if self.cur_section == Section::Text {
            if self.text_glabels.is_empty() {
                return Err(self.fail(".text block without an initial glabel", Some(line)));
            }
            self.fn_ins_inds.push((self.num_lines - 1, size / 4));
        }
        Ok(())
    }

    /// Consumes one physical source line.
    pub fn process_line(&mut self, raw_line: &str, output_enc: &Encoding) -> Result<()> {
        self.num_lines += 1;
        if let Some(stripped) = raw_line.strip_suffix('\\') {
            self.glued_line.push_str(stripped);
            return Ok(());
        }
        let joined = format!("{}{}", self.glued_line, raw_line);
        self.glued_line.clear();

        let real_line = joined.clone();
        let stripped = RE_COMMENT_OR_STRING.replace_all(&joined, comment_replacer);
        let stripped = stripped.trim();
        let line: &str = &RE_LABEL.replace(stripped, "");

        let mut changed_section = false;
        let mut emitting_double = false;

        if (line.starts_with("glabel ") || line.starts_with("jlabel "))
            && self.cur_section == Section::Text
        {
            let name = line
                .split_whitespace()
                .nth(1)
                .ok_or_else(|| self.fail("label directive with no name", Some(&real_line)))?;
            self.text_glabels.push(name.to_string());
        }
        if line.is_empty() {
            // empty line
        } else if line.starts_with("glabel ")
            || line.starts_with("dlabel ")
            || line.starts_with("jlabel ")
            || line.starts_with("endlabel ")
            || (!line.contains(' ') && line.ends_with(':'))
        {
            // label
        } else if line.starts_with(".section")
            || matches!(
                line,
                ".text" | ".data" | ".rdata" | ".rodata" | ".bss" | ".late_rodata"
            )
        {
            let first_arg = line.split(',').next().unwrap_or(line);
            let name = first_arg
                .split_whitespace()
                .last()
                .ok_or_else(|| self.fail("unrecognized .section directive", Some(&real_line)))?;
            self.cur_section = Section::from_name(name)
                .ok_or_else(|| self.fail("unrecognized .section directive", Some(&real_line)))?;
            changed_section = true;
        } else if line.starts_with(".late_rodata_alignment") {
            if self.cur_section != Section::LateRodata {
                return Err(self.fail(
                    ".late_rodata_alignment must occur within .late_rodata section",
                    Some(&real_line),
                ));
            }
            let value = line
                .split_whitespace()
                .nth(1)
                .and_then(|arg| arg.parse::<usize>().ok());
            let value = match value {
                Some(v @ (4 | 8)) => v,
                _ => {
                    return Err(self.fail(
                        ".late_rodata_alignment argument must be 4 or 8",
                        Some(&real_line),
                    ))
                }
            };
            if self.late_rodata_alignment != 0 && self.late_rodata_alignment != value {
                return Err(self.fail(
                    ".late_rodata_alignment alignment assumption conflicts with earlier \
                     .double directive. Make sure to provide explicit alignment padding.",
                    None,
                ));
            }
            self.late_rodata_alignment = value;
            changed_section = true;
        } else if line.starts_with(".incbin") {
            let size = line
                .split(',')
                .last()
                .and_then(parse_int)
                .ok_or_else(|| self.fail("invalid .incbin size", Some(&real_line)))?;
            self.add_sized(size, &real_line)?;
        } else if line.starts_with(".word") || line.starts_with(".gpword") || line.starts_with(".float")
        {
            self.align(4);
            self.add_sized(4 * line.split(',').count() as isize, &real_line)?;
        } else if line.starts_with(".double") {
            self.align(4);
            if self.cur_section == Section::LateRodata {
                let align8 = self.fn_section_sizes.late_rodata % 8;
                // Infer the block alignment, so the generated C code uses
                // doubles. This gives correct alignment for the transferred
                // doubles even when the compiler shifted the section, e.g.
                // for non-matching compilation.
                if self.late_rodata_alignment == 0 {
                    self.late_rodata_alignment = 8 - align8;
                    self.late_rodata_alignment_from_content = true;
                } else if self.late_rodata_alignment != 8 - align8 {
                    if self.late_rodata_alignment_from_content {
                        return Err(self.fail(
                            "found two .double directives with different start addresses \
                             mod 8. Make sure to provide explicit alignment padding.",
                            Some(&real_line),
                        ));
                    } else {
                        return Err(self.fail(
                            ".double at address that is not 0 mod 8 (based on \
                             .late_rodata_alignment assumption). Make sure to provide \
                             explicit alignment padding.",
                            Some(&real_line),
                        ));
                    }
                }
            }
            self.add_sized(8 * line.split(',').count() as isize, &real_line)?;
            emitting_double = true;
        } else if line.starts_with(".space") {
            let size = line
                .split_whitespace()
                .nth(1)
                .and_then(parse_int)
                .ok_or_else(|| self.fail("invalid .space size", Some(&real_line)))?;
            self.add_sized(size, &real_line)?;
        } else if line.starts_with(".balign") {
            let arg = line.split_whitespace().nth(1).and_then(parse_int);
            if arg != Some(4) {
                return Err(self.fail("only .balign 4 is supported", Some(&real_line)));
            }
            self.align(4);
        } else if line.starts_with(".align") {
            let arg = line.split_whitespace().nth(1).and_then(parse_int);
            if arg != Some(2) {
                return Err(self.fail("only .align 2 is supported", Some(&real_line)));
            }
            self.align(4);
        } else if line.starts_with(".asci") {
            let z = line.starts_with(".asciz") || line.starts_with(".asciiz");
            let size = self.count_quoted_size(line, z, &real_line, output_enc)?;
            self.add_sized(size as isize, &real_line)?;
        } else if line.starts_with(".byte") {
            self.add_sized(line.split(',').count() as isize, &real_line)?;
        } else if line.starts_with(".half") || line.starts_with(".hword") || line.starts_with(".short")
        {
            self.align(2);
            self.add_sized(2 * line.split(',').count() as isize, &real_line)?;
        } else if line.starts_with(".size") {
            // no-op
        } else if line.starts_with('.') {
            // .macro, ...
            return Err(self.fail("asm directive not supported", Some(&real_line)));
        } else {
            // Macros are hard to support for data sections: how much space
            // they expand to is only known after running the assembler, and
            // the dummy C code needs the answer first. The same goes for
            // pseudo-instructions that expand to several real instructions.
            if self.cur_section != Section::Text {
                return Err(self.fail(
                    "instruction or macro call in non-.text section? not supported",
                    Some(&real_line),
                ));
            }
            self.add_sized(4, &real_line)?;
        }

        if self.cur_section == Section::LateRodata {
            if !changed_section {
                if emitting_double {
                    self.late_rodata_asm_conts.push(".align 0".to_string());
                }
                self.late_rodata_asm_conts.push(real_line);
                if emitting_double {
                    self.late_rodata_asm_conts.push(".align 2".to_string());
                }
            }
        } else {
            self.asm_conts.push(real_line);
        }
        Ok(())
    }

    /// Closes the block: plans the late-rodata strategy, lays dummy
    /// statements over the block's source lines, and produces the
    /// [`Function`] record.
    ///
    /// Returns one source line per input line plus a final one, so the
    /// caller can splice the result back while preserving line numbers.
    pub fn finish(&self, state: &mut GlobalState) -> Result<(Vec<String>, Function)> {
        let mut src = vec![String::new(); self.num_lines + 1];
        let mut late_rodata_dummy_bytes: Vec<[u8; 4]> = Vec::new();
        let mut jtbl_rodata_size = 0usize;
        let mut late_rodata_fn_output: Vec<String> = Vec::new();

        let num_instr = self.fn_section_sizes.text / 4;

        if self.fn_section_sizes.late_rodata > 0 {
            // Late rodata is reserved by emitting unique float constants,
            // three instructions for each 4 bytes of rodata. With known
            // alignment doubles halve that: three instructions per 8 bytes.
            let size = self.fn_section_sizes.late_rodata / 4;
            let mut skip_next = false;
            let mut needs_double = self.late_rodata_alignment != 0;
            let mut extra_mips1_nop = false;
            let (jtbl_size, jtbl_min_rodata_size) = match (state.pascal, state.mips1) {
                (true, true) => (9, 2),
                (true, false) => (8, 2),
                (false, true) => (11, 5),
                (false, false) => (9, 5),
            };

            for i in 0..size {
                if skip_next {
                    skip_next = false;
                    continue;
                }
                // A jump table covers all remaining rodata with one switch,
                // but only once the first float/double is out (so the real
                // rodata can be located in the binary), once any .double
                // alignment is settled, with at least jtbl_min_rodata_size
                // words left (IDO refuses smaller tables), and with enough
                // instruction budget that the unused delay slot does not
                // break the size computation.
                let instr_budget_left = num_instr
                    .checked_sub(late_rodata_fn_output.len())
                    .map_or(false, |left| left >= jtbl_size + 1);
                if !needs_double
                    && state.use_jtbl_for_rodata
                    && i >= 1
                    && size - i >= jtbl_min_rodata_size
                    && instr_budget_left
                {
                    let line = if state.pascal {
                        let cases: Vec<String> =
                            (0..size - i).map(|case| format!("{}: ;", case)).collect();
                        format!("case 0 of {} otherwise end;", cases.join(" "))
                    } else {
                        let cases: Vec<String> =
                            (0..size - i).map(|case| format!("case {}:", case)).collect();
                        format!("switch (*(volatile int*)0) {{ {} ; }}", cases.join(" "))
                    };
                    late_rodata_fn_output.push(line);
                    late_rodata_fn_output
                        .extend(std::iter::repeat(String::new()).take(jtbl_size - 1));
                    jtbl_rodata_size = (size - i) * 4;
                    extra_mips1_nop = i != 2;
                    break;
                }

                let dummy_bytes = state.next_late_rodata_hex();
                late_rodata_dummy_bytes.push(dummy_bytes);
                if self.late_rodata_alignment == 4 * ((i + 1) % 2 + 1) && i + 1 < size {
                    let dummy_bytes2 = state.next_late_rodata_hex();
                    late_rodata_dummy_bytes.push(dummy_bytes2);
                    let mut combined = [0u8; 8];
                    combined[..4].copy_from_slice(&dummy_bytes);
                    combined[4..].copy_from_slice(&dummy_bytes2);
                    let fval = f64::from_be_bytes(combined);
                    let line = if state.pascal {
                        state.pascal_assignment_double(fval)
                    } else {
                        format!("*(volatile double*)0 = {:?};", fval)
                    };
                    late_rodata_fn_output.push(line);
                    skip_next = true;
                    needs_double = false;
                    if state.mips1 {
                        // mips1 does not have ldc1/sdc1
                        late_rodata_fn_output.push(String::new());
                        late_rodata_fn_output.push(String::new());
                    }
                    extra_mips1_nop = false;
                } else {
                    let fval = f32::from_be_bytes(dummy_bytes);
                    let line = if state.pascal {
                        state.pascal_assignment_float(fval)
                    } else {
                        format!("*(volatile float*)0 = {:?}f;", fval)
                    };
                    late_rodata_fn_output.push(line);
                    extra_mips1_nop = true;
                }
                late_rodata_fn_output.push(String::new());
                late_rodata_fn_output.push(String::new());
            }

            if state.mips1 && extra_mips1_nop {
                late_rodata_fn_output.push(String::new());
            }
        }

        let mut text_name = None;
        if self.fn_section_sizes.text > 0 || !late_rodata_fn_output.is_empty() {
            let new_name = state.make_name("func");
            src[0] = state.func_prologue(&new_name);
            text_name = Some(new_name);
            src[self.num_lines] = state.func_epilogue();
            let instr_count = self.fn_section_sizes.text / 4;
            if instr_count < state.min_instr_count {
                return Err(self.fail("too short .text block", None));
            }

            let mut tot_emitted = 0usize;
            let mut tot_skipped = 0usize;
            let mut fn_emitted = 0usize;
            let mut fn_skipped = 0usize;
            let mut skipping = true;
            let mut rodata_stack: Vec<String> = late_rodata_fn_output.clone();
            rodata_stack.reverse();

            for &(line, count) in &self.fn_ins_inds {
                for _ in 0..count {
                    if fn_emitted > MAX_FN_SIZE
                        && instr_count - tot_emitted > state.min_instr_count
                        && rodata_stack.last().map_or(true, |top| !top.is_empty())
                    {
                        fn_emitted = 0;
                        fn_skipped = 0;
                        skipping = true;
                        let large_func_name = state.make_name("large_func");
                        let split = format!(
                            " {} {} ",
                            state.func_epilogue(),
                            state.func_prologue(&large_func_name)
                        );
                        src[line].push_str(&split);
                    }

                    let skip_budget = state.skip_instr_count
                        + if rodata_stack.is_empty() {
                            0
                        } else {
                            state.prelude_if_late_rodata
                        };
                    if skipping && fn_skipped < skip_budget {
                        fn_skipped += 1;
                        tot_skipped += 1;
                    } else {
                        skipping = false;
                        if let Some(top) = rodata_stack.pop() {
                            src[line].push_str(&top);
                        } else if state.pascal {
                            let assignment = state.pascal_assignment_int(0);
                            src[line].push_str(&assignment);
                        } else {
                            src[line].push_str("*(volatile int*)0 = 0;");
                        }
                    }
                    tot_emitted += 1;
                    fn_emitted += 1;
                }
            }

            if !rodata_stack.is_empty() {
                let size = late_rodata_fn_output.len() / 3;
                let available = instr_count - tot_skipped;
                return Err(self.fail(
                    &format!(
                        "late rodata to text ratio is too high: {} / {} must be <= 1/3\n\
                         add .late_rodata_alignment (4|8) to the .late_rodata block \
                         to double the allowed ratio.",
                        size, available
                    ),
                    None,
                ));
            }
        }

        let mut rodata_name = None;
        if self.fn_section_sizes.rodata > 0 {
            if state.pascal {
                return Err(self.fail(".rodata isn't supported with Pascal for now", None));
            }
            let new_name = state.make_name("rodata");
            src[self.num_lines].push_str(&format!(
                " const char {}[{}] = {{1}};",
                new_name, self.fn_section_sizes.rodata
            ));
            rodata_name = Some(new_name);
        }

        let mut data_name = None;
        if self.fn_section_sizes.data > 0 {
            let new_name = state.make_name("data");
            let line = if state.pascal {
                format!(
                    " var {}: packed array[1..{}] of char := [otherwise: 0];",
                    new_name, self.fn_section_sizes.data
                )
            } else {
                format!(" char {}[{}] = {{1}};", new_name, self.fn_section_sizes.data)
            };
            src[self.num_lines].push_str(&line);
            data_name = Some(new_name);
        }

        let mut bss_name = None;
        if self.fn_section_sizes.bss > 0 {
            if state.pascal {
                return Err(self.fail(".bss isn't supported with Pascal", None));
            }
            let new_name = state.make_name("bss");
            src[self.num_lines]
                .push_str(&format!(" char {}[{}];", new_name, self.fn_section_sizes.bss));
            bss_name = Some(new_name);
        }

        let function = Function {
            text_glabels: self.text_glabels.clone(),
            asm_conts: self.asm_conts.clone(),
            late_rodata_dummy_bytes,
            jtbl_rodata_size,
            late_rodata_asm_conts: self.late_rodata_asm_conts.clone(),
            fn_desc: self.fn_desc.clone(),
            data: FunctionData {
                text: (text_name, self.fn_section_sizes.text),
                data: (data_name, self.fn_section_sizes.data),
                rodata: (rodata_name, self.fn_section_sizes.rodata),
                bss: (bss_name, self.fn_section_sizes.bss),
            },
        };
        Ok((src, function))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{OptLevel, Opts};

    fn enc() -> Encoding {
        Encoding::from_label("latin1").unwrap()
    }

    fn opts(opt: OptLevel) -> Opts {
        Opts {
            opt,
            framepointer: false,
            mips1: false,
            kpic: false,
            pascal: false,
            input_enc: enc(),
            output_enc: enc(),
            enable_cutscene_data_float_encoding: false,
        }
    }

    fn block_from(lines: &[&str]) -> GlobalAsmBlock {
        let mut block = GlobalAsmBlock::new("test block".to_string());
        for line in lines {
            block.process_line(line, &enc()).unwrap();
        }
        block
    }

    #[test]
    fn instructions_count_four_bytes_each() {
        let block = block_from(&["glabel foo", "nop", "addiu $sp, $sp, -0x18", "jr $ra"]);
        assert_eq!(block.fn_section_sizes.text, 12);
        assert_eq!(block.fn_ins_inds, vec![(1, 1), (2, 1), (3, 1)]);
    }

    #[test]
    fn comments_and_labels_are_ignored() {
        let block = block_from(&[
            "glabel foo",
            "/* hello */ nop # trailing",
            "sublabel:",
            "inner_label: nop",
        ]);
        assert_eq!(block.fn_section_sizes.text, 8);
    }

    #[test]
    fn glued_lines_join_before_dispatch() {
        let block = block_from(&["glabel foo", "no\\", "p"]);
        assert_eq!(block.fn_section_sizes.text, 4);
        // the instruction lands on the final physical line of the splice
        assert_eq!(block.fn_ins_inds, vec![(2, 1)]);
    }

    #[test]
    fn data_directives_measure_bytes() {
        let block = block_from(&[
            ".data",
            "dcontents:",
            ".word 1, 2, 3",
            ".byte 4, 5",
            ".half 6",
            ".double 1.5",
        ]);
        // 12 (+pad to 14? no: word 12, byte 2 = 14, half aligns to 14, +2 = 16,
        // double aligns to 16, +8 = 24
        assert_eq!(block.fn_section_sizes.data, 24);
    }

    #[test]
    fn ascii_escapes_are_measured() {
        let block = block_from(&[".data", r#".ascii "ab\n\x41\102c""#]);
        assert_eq!(block.fn_section_sizes.data, 6);
        let block = block_from(&[".data", r#".asciz "ab", "cd""#]);
        assert_eq!(block.fn_section_sizes.data, 6);
    }

    #[test]
    fn asciiz_glued_strings_are_rejected() {
        let mut block = block_from(&[".data"]);
        let err = block
            .process_line(r#".asciz "ab" "cd""#, &enc())
            .unwrap_err();
        assert!(err.to_string().contains("glued strings"));
    }

    #[test]
    fn balign_8_is_rejected() {
        let mut block = block_from(&[".data"]);
        let err = block.process_line(".balign 8", &enc()).unwrap_err();
        assert!(err.to_string().contains("only .balign 4 is supported"));
    }

    #[test]
    fn unknown_directive_is_rejected() {
        let mut block = block_from(&[".data"]);
        assert!(block.process_line(".macro thing", &enc()).is_err());
    }

    #[test]
    fn text_requires_leading_glabel() {
        let mut block = GlobalAsmBlock::new("test block".to_string());
        let err = block.process_line("nop", &enc()).unwrap_err();
        assert!(err.to_string().contains("initial glabel"));
    }

    #[test]
    fn instructions_outside_text_are_rejected() {
        let mut block = block_from(&[".rodata"]);
        assert!(block.process_line("nop", &enc()).is_err());
    }

    #[test]
    fn incbin_takes_trailing_size() {
        let block = block_from(&[".data", ".incbin \"file.bin\", 0x10"]);
        assert_eq!(block.fn_section_sizes.data, 16);
    }

    #[test]
    fn rdata_aliases_rodata() {
        let block = block_from(&[".rdata", ".word 5"]);
        assert_eq!(block.fn_section_sizes.rodata, 4);
        let block = block_from(&[".section .rodata", ".word 5"]);
        assert_eq!(block.fn_section_sizes.rodata, 4);
    }

    #[test]
    fn late_rodata_alignment_conflict_with_double() {
        let mut block = block_from(&[".late_rodata", ".double 1.0"]);
        // first double inferred alignment 8; a second at 0 mod 8 is fine
        block.process_line(".double 2.0", &enc()).unwrap();
        // shifting by a word then a third double conflicts
        block.process_line(".word 0", &enc()).unwrap();
        assert!(block.process_line(".double 3.0", &enc()).is_err());
    }

    #[test]
    fn simple_text_block_finishes_into_dummy_function() {
        let mut state = GlobalState::new(&opts(OptLevel::O2));
        let block = block_from(&["glabel foo", "nop", "nop"]);
        let (src, function) = block.finish(&mut state).unwrap();
        assert_eq!(src.len(), 4);
        assert_eq!(src[0], "void _asmpp_func_1(void) {");
        assert_eq!(*src.last().unwrap(), "}".to_string());
        assert_eq!(function.text_glabels, vec!["foo"]);
        assert_eq!(
            function.data.text,
            (Some("_asmpp_func_1".to_string()), 8)
        );
        assert!(function.late_rodata_dummy_bytes.is_empty());
        assert_eq!(function.jtbl_rodata_size, 0);
    }

    #[test]
    fn too_short_text_block_fails() {
        let mut state = GlobalState::new(&opts(OptLevel::O2));
        let block = block_from(&["glabel foo", "nop"]);
        // O2 requires at least 2 instructions
        assert!(block.finish(&mut state).is_err());
    }

    #[test]
    fn late_rodata_floats_emit_three_slot_stores() {
        let mut state = GlobalState::new(&opts(OptLevel::O1));
        let lines: Vec<String> = std::iter::once("glabel foo".to_string())
            .chain(std::iter::repeat("nop".to_string()).take(12))
            .collect();
        let mut block = GlobalAsmBlock::new("test block".to_string());
        for line in &lines {
            block.process_line(line, &enc()).unwrap();
        }
        block.process_line(".late_rodata", &enc()).unwrap();
        block.process_line(".word 1, 2", &enc()).unwrap();
        let (src, function) = block.finish(&mut state).unwrap();
        assert_eq!(function.late_rodata_dummy_bytes.len(), 2);
        assert_eq!(function.jtbl_rodata_size, 0);
        let stores: Vec<&String> = src
            .iter()
            .filter(|l| l.contains("*(volatile float*)0"))
            .collect();
        assert_eq!(stores.len(), 2);
    }

    #[test]
    fn jump_table_strategy_consumes_remaining_words() {
        let mut state = GlobalState::new(&opts(OptLevel::O2));
        let mut block = GlobalAsmBlock::new("test block".to_string());
        block.process_line("glabel foo", &enc()).unwrap();
        for _ in 0..40 {
            block.process_line("nop", &enc()).unwrap();
        }
        block.process_line(".late_rodata", &enc()).unwrap();
        for _ in 0..6 {
            block.process_line(".word 7", &enc()).unwrap();
        }
        let (src, function) = block.finish(&mut state).unwrap();
        // one float first, then a 5-entry jump table for the rest
        assert_eq!(function.late_rodata_dummy_bytes.len(), 1);
        assert_eq!(function.jtbl_rodata_size, 20);
        let switches: Vec<&String> = src.iter().filter(|l| l.contains("switch")).collect();
        assert_eq!(switches.len(), 1);
        assert!(switches[0].contains("case 4:"));
    }

    #[test]
    fn double_pairing_uses_inferred_alignment() {
        let mut state = GlobalState::new(&opts(OptLevel::G3));
        let mut block = GlobalAsmBlock::new("test block".to_string());
        block.process_line("glabel foo", &enc()).unwrap();
        for _ in 0..8 {
            block.process_line("nop", &enc()).unwrap();
        }
        block.process_line(".late_rodata", &enc()).unwrap();
        block.process_line(".double 3.5", &enc()).unwrap();
        let (src, function) = block.finish(&mut state).unwrap();
        assert_eq!(function.late_rodata_dummy_bytes.len(), 2);
        let mut combined = [0u8; 8];
        combined[..4].copy_from_slice(&function.late_rodata_dummy_bytes[0]);
        combined[4..].copy_from_slice(&function.late_rodata_dummy_bytes[1]);
        let expected = f64::from_be_bytes(combined);
        let stores: Vec<&String> = src
            .iter()
            .filter(|l| l.contains("*(volatile double*)0"))
            .collect();
        assert_eq!(stores.len(), 1);
        assert!(stores[0].contains(&format!("{:?}", expected)));
        // the .double line is fenced so the assembler adds no padding
        assert_eq!(
            block.late_rodata_asm_conts,
            vec![".align 0", ".double 3.5", ".align 2"]
        );
    }

    #[test]
    fn late_rodata_ratio_error_mentions_alignment_hint() {
        let mut state = GlobalState::new(&opts(OptLevel::O1));
        let mut block = GlobalAsmBlock::new("test block".to_string());
        block.process_line("glabel foo", &enc()).unwrap();
        for _ in 0..3 {
            block.process_line("nop", &enc()).unwrap();
        }
        block.process_line(".late_rodata", &enc()).unwrap();
        for _ in 0..4 {
            block.process_line(".word 1", &enc()).unwrap();
        }
        let err = block.finish(&mut state).unwrap_err();
        assert!(err.to_string().contains("late rodata to text ratio"));
    }

    #[test]
    fn data_sections_reserve_named_arrays() {
        let mut state = GlobalState::new(&opts(OptLevel::O2));
        let block = block_from(&[
            "glabel foo",
            "nop",
            "nop",
            ".data",
            ".word 1, 2",
            ".bss",
            ".space 0x20",
            ".rodata",
            ".ascii \"hi\"",
        ]);
        let (src, function) = block.finish(&mut state).unwrap();
        assert_eq!(function.data.data, (Some("_asmpp_data_3".to_string()), 8));
        assert_eq!(function.data.bss, (Some("_asmpp_bss_4".to_string()), 32));
        assert_eq!(function.data.rodata, (Some("_asmpp_rodata_2".to_string()), 2));
        let last = src.last().unwrap();
        assert!(last.contains("const char _asmpp_rodata_2[2] = {1};"));
        assert!(last.contains("char _asmpp_data_3[8] = {1};"));
        assert!(last.contains("char _asmpp_bss_4[32];"));
    }
}
