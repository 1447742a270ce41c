//! Line-driven scan of a high-level source file.
//!
//! Each embedded assembly block is replaced by a dummy function body whose
//! compiled output occupies exactly the measured byte ranges; everything
//! else passes through unchanged. The output keeps one line per input line
//! so compiler diagnostics still point at the original source.

use std::fs;
use std::path::Path;

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use tracing::debug;

use crate::asm::{Function, GlobalAsmBlock};
use crate::error::{Error, Result};
use crate::options::Opts;
use crate::state::GlobalState;

lazy_static! {
    static ref RE_CUTSCENE_DATA: Regex = Regex::new(r"CutsceneData (.|\n)*\[\] = \{").unwrap();
    static ref RE_FLOAT: Regex =
        Regex::new(r"[-+]?[0-9]*\.?[0-9]+([eE][-+]?[0-9]+)?f").unwrap();
}

/// Everything one preprocessing run produces.
#[derive(Debug)]
pub struct RunResult {
    /// One record per embedded assembly block, in source order
    pub functions: Vec<Function>,
    /// Files the output depends on (`.s` includes, recursive includes)
    pub deps: Vec<String>,
    /// The transformed source, one entry per output line
    pub output_lines: Vec<String>,
}

impl RunResult {
    /// Encodes the transformed source for the compiler, surfacing the
    /// offending line when the output encoding cannot represent it.
    pub fn encode_output(&self, opts: &Opts) -> Result<Vec<u8>> {
        let newline = opts.output_enc.encode("\n")?;
        let mut out = Vec::new();
        for line in &self.output_lines {
            let encoded = opts.output_enc.encode(line).map_err(|_| {
                Error::Encode(format!(
                    "failed to encode a line to {}: {:?}",
                    opts.output_enc.name(),
                    line
                ))
            })?;
            out.extend_from_slice(&encoded);
            out.extend_from_slice(&newline);
        }
        Ok(out)
    }
}

/// Replaces a float literal with the decimal form of its big-endian
/// IEEE-754 bit pattern.
fn repl_float_hex(caps: &Captures) -> String {
    let literal = caps[0].trim().trim_end_matches('f');
    match literal.parse::<f32>() {
        Ok(value) => value.to_bits().to_string(),
        Err(_) => caps[0].to_string(),
    }
}

/// Preprocesses one source file.
///
/// The returned functions must later be handed to
/// [`fixup_objfile`](crate::fixup::fixup_objfile) so the real assembly can
/// replace the dummy bodies in the compiled object.
pub fn parse_source(infile_path: &Path, opts: &Opts) -> Result<RunResult> {
    let mut state = GlobalState::new(opts);

    let raw = fs::read(infile_path)?;
    let text = opts.input_enc.decode(&raw)?;

    let mut global_asm: Option<(GlobalAsmBlock, usize)> = None;
    let mut asm_functions: Vec<Function> = Vec::new();
    let mut output_lines: Vec<String> =
        vec![format!("#line 1 \"{}\"", infile_path.display())];
    let mut deps: Vec<String> = Vec::new();

    let mut is_cutscene_data = false;
    let mut is_early_include = false;

    for (line_no, raw_line) in text.lines().enumerate() {
        let line_no = line_no + 1;
        let mut raw_line = raw_line.trim_end().to_string();
        let line = raw_line.trim_start().to_string();

        // Exactly one output line per source line; block processing
        // overwrites the placeholders afterwards.
        output_lines.push(String::new());

        if let Some((ref mut gasm, start_index)) = global_asm {
            if line.starts_with(')') {
                let (src, function) = gasm.finish(&mut state)?;
                for (i, src_line) in src.into_iter().enumerate() {
                    output_lines[start_index + i] = src_line;
                }
                debug!(desc = %function.fn_desc, "finished GLOBAL_ASM block");
                asm_functions.push(function);
                global_asm = None;
            } else {
                gasm.process_line(&raw_line, &opts.output_enc)?;
            }
        } else if line == "GLOBAL_ASM(" || line == "#pragma GLOBAL_ASM(" {
            global_asm = Some((
                GlobalAsmBlock::new(format!("GLOBAL_ASM block at line {}", line_no)),
                output_lines.len(),
            ));
        } else if ((line.starts_with("GLOBAL_ASM(\"") || line.starts_with("#pragma GLOBAL_ASM(\""))
            && line.ends_with("\")"))
            || ((line.starts_with("INCLUDE_ASM(\"") || line.starts_with("INCLUDE_RODATA(\""))
                && line.contains("\",")
                && line.ends_with(");"))
        {
            let (prologue, fname) = if line.starts_with("INCLUDE_") {
                // INCLUDE_ASM("path/to", functionname);
                let (before, after) = line
                    .split_once("\",")
                    .ok_or_else(|| Error::failure(format!("malformed directive: {}", line)))?;
                let open = before
                    .find('(')
                    .ok_or_else(|| Error::failure(format!("malformed directive: {}", line)))?;
                let stem = after
                    .trim()
                    .strip_suffix(");")
                    .ok_or_else(|| Error::failure(format!("malformed directive: {}", line)))?;
                let fname = format!("{}/{}.s", &before[open + 2..], stem.trim());
                if line.starts_with("INCLUDE_RODATA") {
                    (vec![".section .rodata".to_string()], fname)
                } else {
                    (Vec::new(), fname)
                }
            } else {
                // GLOBAL_ASM("path/to/file.s")
                let open = line
                    .find('(')
                    .ok_or_else(|| Error::failure(format!("malformed directive: {}", line)))?;
                (Vec::new(), line[open + 2..line.len() - 2].to_string())
            };

            let mut gasm = GlobalAsmBlock::new(fname.clone());
            for prologue_line in &prologue {
                gasm.process_line(prologue_line, &opts.output_enc)?;
            }

            let asm_bytes = match fs::read(&fname) {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    // The block might sit behind an ifdef, so a missing file
                    // is not necessarily an error. Emit a bad include and let
                    // the compiler decide if it is ever reached. (IDO treats
                    // #error as a warning for some reason.) Still record the
                    // dependency so the build reruns when the file appears.
                    let last = output_lines.len() - 1;
                    output_lines[last] = format!("#include \"GLOBAL_ASM:{}\"", fname);
                    deps.push(fname);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            for asm_line in opts.input_enc.decode(&asm_bytes)?.lines() {
                gasm.process_line(asm_line.trim_end(), &opts.output_enc)?;
            }

            let (src, function) = gasm.finish(&mut state)?;
            let last = output_lines.len() - 1;
            output_lines[last] = src.join("");
            asm_functions.push(function);
            deps.push(fname);
        } else if line == "#pragma asmproc recurse" {
            // C includes qualified as
            //     #pragma asmproc recurse
            //     #include "file.c"
            // are preprocessed recursively when encountered
            is_early_include = true;
        } else if is_early_include {
            is_early_include = false;
            if !line.starts_with("#include ") {
                return Err(Error::failure(
                    "#pragma asmproc recurse must be followed by an #include ",
                ));
            }
            let space = line.find(' ').unwrap_or(0);
            let include_name = line
                .get(space + 2..line.len().saturating_sub(1))
                .unwrap_or("")
                .to_string();
            let parent = infile_path.parent().unwrap_or_else(|| Path::new(""));
            let include_path = parent.join(&include_name);
            deps.push(include_path.display().to_string());
            let mut inner = parse_source(&include_path, opts)?;
            deps.append(&mut inner.deps);
            // Inline the child's output into this one line slot, then
            // restore the outer numbering.
            let mut spliced = String::new();
            for inner_line in &inner.output_lines {
                spliced.push_str(inner_line);
                spliced.push('\n');
            }
            spliced.push_str(&format!(
                "#line {} \"{}\"",
                line_no + 1,
                infile_path.display()
            ));
            let last = output_lines.len() - 1;
            output_lines[last] = spliced;
        } else {
            if opts.enable_cutscene_data_float_encoding {
                // Replace floats inside CutsceneData array initialisers with
                // their IEEE-754 bit patterns, which the legacy compiler
                // would otherwise round-trip imprecisely.
                if RE_CUTSCENE_DATA.is_match(&line) {
                    is_cutscene_data = true;
                } else if line.ends_with("};") {
                    is_cutscene_data = false;
                }
                if is_cutscene_data {
                    raw_line = RE_FLOAT.replace_all(&raw_line, repl_float_hex).into_owned();
                }
            }
            let last = output_lines.len() - 1;
            output_lines[last] = raw_line;
        }
    }

    if global_asm.is_some() {
        return Err(Error::failure("unterminated GLOBAL_ASM block"));
    }

    debug!(
        functions = asm_functions.len(),
        deps = deps.len(),
        "preprocessed {}",
        infile_path.display()
    );
    Ok(RunResult {
        functions: asm_functions,
        deps,
        output_lines,
    })
}
