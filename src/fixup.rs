//! Object fixup: assembles the extracted blocks and splices the real bytes,
//! symbols and relocations into the dummy positions of the compiler's
//! object, in place.

use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::asm::Function;
use crate::elf::{
    ElfFile, Relocation, Symbol, MIPS_DEBUG_ST_BLOCK, MIPS_DEBUG_ST_END, MIPS_DEBUG_ST_ENUM,
    MIPS_DEBUG_ST_FILE, MIPS_DEBUG_ST_PROC, MIPS_DEBUG_ST_STATIC, MIPS_DEBUG_ST_STATIC_PROC,
    MIPS_DEBUG_ST_STRUCT, MIPS_DEBUG_ST_UNION, SHN_ABS, SHN_UNDEF, SHT_REL, STB_GLOBAL,
    STB_LOCAL, STT_FUNC, STT_OBJECT, STV_DEFAULT,
};
use crate::error::{Error, Result};
use crate::options::{ConvertStatics, Encoding};

/// Verify that each late-rodata magic occurs exactly once in `.rodata`.
/// Quadratic-ish on large files, hence off by default; flip on when
/// debugging a suspected magic collision.
const SLOW_CHECKS: bool = false;

const SECTIONS: [&str; 4] = [".data", ".text", ".rodata", ".bss"];

fn is_temp_name(name: &str) -> bool {
    name.starts_with("_asmpp_")
}

/// Scratch `.s`/`.o` paths, removed on every exit path. Removal is
/// idempotent; the `.o` may never have been created.
struct TempFiles {
    s_path: PathBuf,
    o_path: PathBuf,
}

impl TempFiles {
    fn new() -> TempFiles {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let dir = env::temp_dir();
        let tag = format!("asmpp-{}-{}", std::process::id(), nanos);
        TempFiles {
            s_path: dir.join(format!("{}.s", tag)),
            o_path: dir.join(format!("{}.o", tag)),
        }
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.s_path);
        let _ = fs::remove_file(&self.o_path);
    }
}

fn find_bytes(haystack: &[u8], needle: &[u8; 4], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(4)
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Symbols referenced by any relocation of the splice-relevant sections.
fn collect_relocated_symbols(obj: &ElfFile) -> HashSet<usize> {
    let mut set = HashSet::new();
    for sectype in SECTIONS.iter().copied().chain(std::iter::once(".late_rodata")) {
        if let Some(section) = obj.find_section(sectype) {
            for &reltab in &section.relocated_by {
                for rel in &obj.sections[reltab].relocations {
                    set.insert(rel.sym_index);
                }
            }
        }
    }
    set
}

/// Where a merged symbol came from, so relocation indices can be remapped
/// per source object after deduplication and reordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymOrigin {
    /// Index into the compiler object's original symbol table
    Target(usize),
    /// Index into the assembled object's symbol table
    Asm(usize),
    /// Synthesized from `.mdebug` static records
    Synthetic,
}

struct MergedSym {
    sym: Symbol,
    origin: SymOrigin,
}

struct CopyRange {
    pos: u32,
    size: u32,
    temp_name: String,
    fn_desc: String,
}

/// Splices the assembled output of `functions` into the object at
/// `objfile_path`, overwriting it.
#[allow(clippy::too_many_arguments)]
pub fn fixup_objfile(
    objfile_path: &Path,
    functions: &[Function],
    asm_prelude: &[u8],
    assembler: &str,
    output_enc: &Encoding,
    drop_mdebug_gptab: bool,
    convert_statics: ConvertStatics,
) -> Result<()> {
    let objfile_bytes = fs::read(objfile_path)?;
    let mut objfile = ElfFile::new(&objfile_bytes)?;
    let fmt = objfile.fmt;

    let mut prev_locs: HashMap<&str, u32> = SECTIONS.iter().map(|&s| (s, 0)).collect();
    let mut to_copy: HashMap<&str, Vec<CopyRange>> =
        SECTIONS.iter().map(|&s| (s, Vec::new())).collect();
    let mut asm: Vec<String> = Vec::new();
    let mut all_late_rodata_dummy_bytes: Vec<Vec<[u8; 4]>> = Vec::new();
    let mut all_jtbl_rodata_size: Vec<usize> = Vec::new();
    let mut late_rodata_asm: Vec<Vec<String>> = Vec::new();

    // Build the assembly file with everything that needs filling in. For
    // simplicity, pad with nops/.space so that addresses line up exactly
    // and relocations and symbol references need no adjustment.
    let mut all_text_glabels: HashSet<String> = HashSet::new();
    let mut func_sizes: HashMap<String, u32> = HashMap::new();
    for function in functions {
        let mut ifdefed = false;
        for (sectype, (temp_name, size)) in function.data.iter() {
            let Some(temp_name) = temp_name else { continue };
            if *size == 0 {
                return Err(Error::failure("empty dummy section piece"));
            }
            let Some((_, loc)) = objfile.symtab().find_symbol(temp_name) else {
                // The dummy function was compiled out (e.g. by an ifdef);
                // skip the whole block.
                ifdefed = true;
                break;
            };
            let prev_loc = prev_locs[sectype];
            if loc < prev_loc {
                // If the dummy C generates too little asm and two blocks
                // are consecutive, the error shows up here. Generating too
                // much is indistinguishable from a static symbol occurring
                // after the block, so that goes undetected.
                return Err(Error::failure(format!(
                    "Wrongly computed size for section {} (diff {}). This is an asmpp bug!",
                    sectype,
                    prev_loc - loc
                )));
            }
            if loc != prev_loc {
                asm.push(format!(".section {}", sectype));
                if sectype == ".text" {
                    for _ in 0..(loc - prev_loc) / 4 {
                        asm.push("nop".to_string());
                    }
                } else {
                    asm.push(format!(".space {}", loc - prev_loc));
                }
            }
            to_copy
                .get_mut(sectype)
                .expect("seeded with all section names")
                .push(CopyRange {
                    pos: loc,
                    size: *size as u32,
                    temp_name: temp_name.clone(),
                    fn_desc: function.fn_desc.clone(),
                });
            if !function.text_glabels.is_empty() && sectype == ".text" {
                func_sizes.insert(function.text_glabels[0].clone(), *size as u32);
            }
            prev_locs.insert(sectype, loc + *size as u32);
        }
        if !ifdefed {
            all_text_glabels.extend(function.text_glabels.iter().cloned());
            all_late_rodata_dummy_bytes.push(function.late_rodata_dummy_bytes.clone());
            all_jtbl_rodata_size.push(function.jtbl_rodata_size);
            late_rodata_asm.push(function.late_rodata_asm_conts.clone());
            for (sectype, (temp_name, _)) in function.data.iter() {
                if let Some(temp_name) = temp_name {
                    asm.push(format!(".section {}", sectype));
                    asm.push(format!("glabel {}_asm_start", temp_name));
                }
            }
            asm.push(".text".to_string());
            asm.extend(function.asm_conts.iter().cloned());
            for (sectype, (temp_name, _)) in function.data.iter() {
                if let Some(temp_name) = temp_name {
                    asm.push(format!(".section {}", sectype));
                    asm.push(format!("glabel {}_asm_end", temp_name));
                }
            }
        }
    }

    let late_rodata_source_name_start = "_asmpp_late_rodata_start";
    let late_rodata_source_name_end = "_asmpp_late_rodata_end";
    let have_late_rodata = late_rodata_asm.iter().any(|conts| !conts.is_empty());
    if have_late_rodata {
        asm.push(".section .late_rodata".to_string());
        // Padding at the start, so symbols are not conflated with
        // references to the whole section.
        asm.push(".word 0, 0".to_string());
        asm.push(format!("glabel {}", late_rodata_source_name_start));
        for conts in &late_rodata_asm {
            asm.extend(conts.iter().cloned());
        }
        asm.push(format!("glabel {}", late_rodata_source_name_end));
    }

    let temps = TempFiles::new();
    let mut s_contents: Vec<u8> = Vec::with_capacity(asm_prelude.len() + 16 * asm.len());
    s_contents.extend_from_slice(asm_prelude);
    s_contents.push(b'\n');
    for line in &asm {
        s_contents.extend_from_slice(&output_enc.encode(line)?);
        s_contents.push(b'\n');
    }
    fs::write(&temps.s_path, s_contents)?;

    let mut command_parts = assembler.split_whitespace();
    let program = command_parts
        .next()
        .ok_or_else(|| Error::failure("must pass assembler command"))?;
    debug!(assembler = program, "assembling {}", temps.s_path.display());
    let status = Command::new(program)
        .args(command_parts)
        .arg(&temps.s_path)
        .arg("-o")
        .arg(&temps.o_path)
        .status()?;
    if !status.success() {
        return Err(Error::failure("failed to assemble"));
    }
    let asm_objfile_bytes = fs::read(&temps.o_path)?;
    let asm_objfile = ElfFile::new(&asm_objfile_bytes)?;

    // Keep the .mdebug contents around for static conversion even if the
    // section itself is dropped from the output.
    let mdebug_data: Option<Vec<u8>> = objfile.find_section(".mdebug").map(|s| s.data.clone());
    if drop_mdebug_gptab {
        objfile.drop_mdebug_gptab()?;
    }

    // Unify reginfo sections.
    if let Some(target_idx) = objfile.find_section_index(".reginfo") {
        let source = asm_objfile
            .find_section(".reginfo")
            .ok_or_else(|| Error::failure("assembled object lacks a .reginfo section"))?;
        if source.data.len() < 20 || objfile.sections[target_idx].data.len() < 20 {
            return Err(Error::failure(".reginfo section is too small"));
        }
        for i in 0..20 {
            objfile.sections[target_idx].data[i] |= source.data[i];
        }
    }

    // Move over section contents.
    let mut modified_text_positions: HashSet<u32> = HashSet::new();
    let mut jtbl_rodata_positions: HashSet<u32> = HashSet::new();
    let mut last_rodata_pos: u32 = 0;
    for &sectype in &SECTIONS {
        if to_copy[sectype].is_empty() {
            continue;
        }
        let source = asm_objfile
            .find_section(sectype)
            .ok_or_else(|| Error::failure(format!("didn't find source section: {}", sectype)))?;
        for range in &to_copy[sectype] {
            let start_name = format!("{}_asm_start", range.temp_name);
            let end_name = format!("{}_asm_end", range.temp_name);
            let loc1 = asm_objfile
                .symtab()
                .find_symbol_in_section(&start_name, source)?;
            let loc2 = asm_objfile
                .symtab()
                .find_symbol_in_section(&end_name, source)?;
            if loc1 != range.pos {
                return Err(Error::failure(format!(
                    "assembly and C files don't line up for section {}, {}",
                    sectype, range.fn_desc
                )));
            }
            if loc2.checked_sub(loc1) != Some(range.size) {
                return Err(Error::failure(format!(
                    "incorrectly computed size for section {}, {}. If using .double, \
                     make sure to provide explicit alignment padding.",
                    sectype, range.fn_desc
                )));
            }
        }
        if sectype == ".bss" {
            continue;
        }

        let source_data = source.data.clone();
        let target_idx = objfile
            .find_section_index(sectype)
            .ok_or_else(|| Error::failure(format!("missing target section of type {}", sectype)))?;
        let target = &mut objfile.sections[target_idx];
        for range in &to_copy[sectype] {
            let (pos, count) = (range.pos as usize, range.size as usize);
            if pos + count > target.data.len() || pos + count > source_data.len() {
                return Err(Error::failure(format!(
                    "dummy range lies outside section {}, {}",
                    sectype, range.fn_desc
                )));
            }
            target.data[pos..pos + count].copy_from_slice(&source_data[pos..pos + count]);
            if sectype == ".text" {
                if pos % 4 != 0 || count % 4 != 0 {
                    return Err(Error::failure("misaligned .text splice"));
                }
                for i in 0..range.size / 4 {
                    modified_text_positions.insert(range.pos + 4 * i);
                }
            } else if sectype == ".rodata" {
                last_rodata_pos = range.pos + range.size;
            }
        }
        debug!(section = sectype, pieces = to_copy[sectype].len(), "spliced section bytes");
    }

    // Move over late rodata. This is heuristic, sadly, since the compiler
    // chose where the dummy floats went: locate each 4-byte magic in the
    // target .rodata and copy the real word over it.
    let mut moved_late_rodata: HashMap<u32, u32> = HashMap::new();
    let any_dummy = all_late_rodata_dummy_bytes.iter().any(|v| !v.is_empty());
    let any_jtbl = all_jtbl_rodata_size.iter().any(|&s| s > 0);
    if any_dummy || any_jtbl {
        let source = asm_objfile
            .find_section(".late_rodata")
            .ok_or_else(|| Error::failure("assembled object has no .late_rodata section"))?;
        let mut source_pos = asm_objfile
            .symtab()
            .find_symbol_in_section(late_rodata_source_name_start, source)?;
        let source_end = asm_objfile
            .symtab()
            .find_symbol_in_section(late_rodata_source_name_end, source)?;
        let expected: usize = all_late_rodata_dummy_bytes
            .iter()
            .map(|v| v.len() * 4)
            .sum::<usize>()
            + all_jtbl_rodata_size.iter().sum::<usize>();
        if source_end.checked_sub(source_pos).map(|d| d as usize) != Some(expected) {
            return Err(Error::failure("computed wrong size of .late_rodata"));
        }
        let source_data = source.data.clone();
        let target_idx = objfile
            .find_section_index(".rodata")
            .ok_or_else(|| Error::failure("object has no .rodata to hold late rodata"))?;
        let search_data = objfile.sections[target_idx].data.clone();
        let mut new_data = search_data.clone();

        for (dummy_bytes_list, &jtbl_size) in
            all_late_rodata_dummy_bytes.iter().zip(&all_jtbl_rodata_size)
        {
            for (index, dummy_bytes) in dummy_bytes_list.iter().enumerate() {
                let needle: [u8; 4] = if fmt.is_big_endian {
                    *dummy_bytes
                } else {
                    let mut reversed = *dummy_bytes;
                    reversed.reverse();
                    reversed
                };
                let found = find_bytes(&search_data, &needle, last_rodata_pos as usize)
                    .ok_or_else(|| Error::failure("didn't find late rodata hex magic"))?;
                if SLOW_CHECKS && find_bytes(&search_data, &needle, found + 4).is_some() {
                    return Err(Error::failure(
                        "multiple occurrences of late_rodata hex magic. Change asmpp to \
                         use something better than 0xE0123456!",
                    ));
                }
                let mut pos = found;
                if index == 0
                    && dummy_bytes_list.len() > 1
                    && search_data.get(found + 4..found + 8) == Some(&[0, 0, 0, 0][..])
                {
                    // The block said (or a .double implied) that its late
                    // rodata started 4 (mod 8), but it actually started
                    // 0 (mod 8), so the double moved by 4 bytes. Move the
                    // leading float by 4 as well to keep jump tables
                    // adjacent.
                    new_data[pos..pos + 4].copy_from_slice(&[0, 0, 0, 0]);
                    pos += 4;
                }
                new_data[pos..pos + 4]
                    .copy_from_slice(&source_data[source_pos as usize..source_pos as usize + 4]);
                moved_late_rodata.insert(source_pos, pos as u32);
                last_rodata_pos = pos as u32 + 4;
                source_pos += 4;
            }
            if jtbl_size > 0 {
                if dummy_bytes_list.is_empty() {
                    return Err(Error::failure(
                        "jump table rodata must be preceded by dummy bytes",
                    ));
                }
                let pos = last_rodata_pos as usize;
                let src = source_pos as usize;
                if pos + jtbl_size > new_data.len() || src + jtbl_size > source_data.len() {
                    return Err(Error::failure("jump table rodata lies outside the section"));
                }
                new_data[pos..pos + jtbl_size].copy_from_slice(&source_data[src..src + jtbl_size]);
                for i in (0..jtbl_size).step_by(4) {
                    moved_late_rodata.insert(source_pos + i as u32, (pos + i) as u32);
                    jtbl_rodata_positions.insert((pos + i) as u32);
                }
                last_rodata_pos += jtbl_size as u32;
                source_pos += jtbl_size as u32;
            }
        }
        objfile.sections[target_idx].data = new_data;
        debug!(words = moved_late_rodata.len(), "relocated late rodata");
    }

    // Merge string tables; every migrated symbol's st_name is rebased by
    // the old length.
    let strtab_idx = objfile.strtab_index();
    let strtab_adj = objfile.sections[strtab_idx].data.len() as u32;
    let asm_strtab_data = asm_objfile.sections[asm_objfile.strtab_index()].data.clone();
    objfile.sections[strtab_idx].data.extend_from_slice(&asm_strtab_data);

    // Find relocated symbols, so unreferenced locals can be skipped without
    // breaking anything.
    let asm_relocated = collect_relocated_symbols(&asm_objfile);

    // Move over symbols, deleting the temporary function labels.
    let empty_symbol = objfile
        .symtab()
        .symbols
        .first()
        .cloned()
        .ok_or_else(|| Error::failure("empty symbol table"))?;
    let mut merged: Vec<MergedSym> = Vec::new();
    for (i, s) in objfile.symtab().symbols.iter().enumerate().skip(1) {
        if !is_temp_name(&s.name) {
            merged.push(MergedSym {
                sym: s.clone(),
                origin: SymOrigin::Target(i),
            });
        }
    }

    let asm_local_count = asm_objfile.symtab().sh_info as usize;
    for (i, s) in asm_objfile.symtab().symbols.iter().enumerate() {
        let is_local = i < asm_local_count;
        if is_local && !asm_relocated.contains(&i) {
            continue;
        }
        if is_temp_name(&s.name) {
            if asm_relocated.contains(&i) {
                return Err(Error::failure(format!(
                    "temp symbol {} is referenced by a relocation",
                    s.name
                )));
            }
            continue;
        }
        let mut s = s.clone();
        if s.st_shndx != SHN_UNDEF && s.st_shndx != SHN_ABS {
            let section_name = asm_objfile
                .sections
                .get(s.st_shndx as usize)
                .map(|sec| sec.name.clone())
                .ok_or_else(|| {
                    Error::failure(format!("symbol {} has a bad section index", s.name))
                })?;
            let target_section_name = if section_name == ".late_rodata" {
                ".rodata".to_string()
            } else if !SECTIONS.contains(&section_name.as_str()) {
                return Err(Error::failure(format!(
                    "generated assembly .o must only have symbols for .text, .data, \
                     .rodata, .late_rodata, ABS and UNDEF, but found {}",
                    section_name
                )));
            } else {
                section_name.clone()
            };
            let target_section_idx = objfile
                .find_section_index(&target_section_name)
                .ok_or_else(|| {
                    Error::failure(format!(
                        "generated assembly .o has section that real objfile lacks: {}",
                        target_section_name
                    ))
                })?;
            s.st_shndx = target_section_idx as u16;
            // glabels aren't marked as functions, which makes objdump
            // output confusing. Fix that.
            if all_text_glabels.contains(&s.name) {
                s.sym_type = STT_FUNC;
                if let Some(&size) = func_sizes.get(&s.name) {
                    s.st_size = size;
                }
            }
            if section_name == ".late_rodata" {
                if s.st_value == 0 {
                    // This is a symbol for the whole .late_rodata section,
                    // referenced from a relocation. Moving it would require
                    // fixing up hi16/lo16 references; disallow it.
                    return Err(Error::failure(
                        "local symbols in .late_rodata are not allowed",
                    ));
                }
                s.st_value = *moved_late_rodata.get(&s.st_value).ok_or_else(|| {
                    Error::failure(format!("bad late rodata reference from symbol {}", s.name))
                })?;
            }
        }
        s.st_name += strtab_adj;
        merged.push(MergedSym {
            sym: s,
            origin: SymOrigin::Asm(i),
        });
    }

    // Add static symbols from .mdebug, so GLOBAL_ASM can refer to them.
    let make_statics_global = matches!(
        convert_statics,
        ConvertStatics::Global | ConvertStatics::GlobalWithFilename
    );
    if convert_statics != ConvertStatics::No {
        if let Some(mdebug_data) = &mdebug_data {
            let read_u32 = |data: &[u8], pos: usize| -> Result<u32> {
                data.get(pos..pos + 4)
                    .map(|b| fmt.unpack_u32(b))
                    .ok_or_else(|| Error::failure("truncated .mdebug data"))
            };
            let mut static_name_count: HashMap<String, usize> = HashMap::new();
            let mut strtab_index = objfile.sections[strtab_idx].data.len() as u32;
            let mut new_strtab_data: Vec<u8> = Vec::new();

            let ifd_max = read_u32(mdebug_data, 18 * 4)? as usize;
            let cb_fd_offset = read_u32(mdebug_data, 19 * 4)? as usize;
            let cb_sym_offset = read_u32(mdebug_data, 9 * 4)? as usize;
            let cb_ss_offset = read_u32(mdebug_data, 15 * 4)? as usize;
            for fd in 0..ifd_max {
                let offset = cb_fd_offset + 18 * 4 * fd;
                let iss_base = read_u32(&objfile.data, offset + 2 * 4)? as usize;
                let isym_base = read_u32(&objfile.data, offset + 4 * 4)? as usize;
                let csym = read_u32(&objfile.data, offset + 5 * 4)? as usize;
                let mut scope_level: i32 = 0;
                for j in 0..csym {
                    let offset2 = cb_sym_offset + 12 * (isym_base + j);
                    let iss = read_u32(&objfile.data, offset2)? as usize;
                    let value = read_u32(&objfile.data, offset2 + 4)?;
                    let st_sc_index = read_u32(&objfile.data, offset2 + 8)?;
                    let st = st_sc_index >> 26;
                    let sc = (st_sc_index >> 21) & 0x1f;
                    if st == MIPS_DEBUG_ST_STATIC || st == MIPS_DEBUG_ST_STATIC_PROC {
                        let name_offset = cb_ss_offset + iss_base + iss;
                        let rest = objfile
                            .data
                            .get(name_offset..)
                            .ok_or_else(|| Error::failure("bad .mdebug string offset"))?;
                        let name_len = rest
                            .iter()
                            .position(|&b| b == 0)
                            .ok_or_else(|| Error::failure("unterminated .mdebug name"))?;
                        let mut name_bytes = rest[..name_len].to_vec();
                        let base_name: String =
                            name_bytes.iter().map(|&b| b as char).collect();
                        if scope_level > 1 {
                            // In-function statics get an increasing counter
                            // appended, avoiding duplicate symbols.
                            let count = static_name_count.get(&base_name).copied().unwrap_or(0) + 1;
                            static_name_count.insert(base_name.clone(), count);
                            name_bytes.extend(format!(":{}", count).bytes());
                        }
                        let symbol_name: String =
                            name_bytes.iter().map(|&b| b as char).collect();
                        // The emitted strtab entry may carry a filename
                        // prefix, but deduplication keeps the bare name so
                        // GLOBAL_ASM references still resolve.
                        let mut emitted_bytes = Vec::new();
                        if convert_statics == ConvertStatics::GlobalWithFilename {
                            emitted_bytes
                                .extend(objfile_path.display().to_string().bytes());
                            emitted_bytes.push(b':');
                        }
                        emitted_bytes.extend_from_slice(&name_bytes);

                        let section_name = match sc {
                            1 => ".text",
                            2 => ".data",
                            3 => ".bss",
                            15 => ".rodata",
                            _ => {
                                return Err(Error::failure(format!(
                                    "unsupported storage class {} for static {}",
                                    sc, symbol_name
                                )))
                            }
                        };
                        let section_idx =
                            objfile.find_section_index(section_name).ok_or_else(|| {
                                Error::failure(format!(
                                    "object lacks section {} for .mdebug static",
                                    section_name
                                ))
                            })?;
                        let sym = Symbol::from_parts(
                            fmt,
                            strtab_index,
                            value,
                            0,
                            if make_statics_global { STB_GLOBAL } else { STB_LOCAL },
                            if sc == 1 { STT_FUNC } else { STT_OBJECT },
                            STV_DEFAULT,
                            section_idx as u16,
                            symbol_name,
                        );
                        strtab_index += emitted_bytes.len() as u32 + 1;
                        new_strtab_data.extend_from_slice(&emitted_bytes);
                        new_strtab_data.push(0);
                        merged.push(MergedSym {
                            sym,
                            origin: SymOrigin::Synthetic,
                        });
                    }
                    if st == MIPS_DEBUG_ST_FILE
                        || st == MIPS_DEBUG_ST_STRUCT
                        || st == MIPS_DEBUG_ST_UNION
                        || st == MIPS_DEBUG_ST_ENUM
                        || st == MIPS_DEBUG_ST_BLOCK
                        || st == MIPS_DEBUG_ST_PROC
                        || st == MIPS_DEBUG_ST_STATIC_PROC
                    {
                        scope_level += 1;
                    }
                    if st == MIPS_DEBUG_ST_END {
                        scope_level -= 1;
                    }
                }
                if scope_level != 0 {
                    return Err(Error::failure("unbalanced scopes in .mdebug"));
                }
            }
            objfile.sections[strtab_idx].data.extend_from_slice(&new_strtab_data);
        }
    }

    // Deduplicate, favoring entries that are not UNDEF. Defined symbols are
    // sorted to the front so they win; a loser must be undefined or agree
    // on (section, value).
    merged.sort_by_key(|m| m.sym.st_shndx == SHN_UNDEF);

    let mut name_to_slot: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<MergedSym> = Vec::new();
    let mut aliases: Vec<(SymOrigin, usize)> = Vec::new();
    for mut m in merged {
        if m.sym.name == "_gp_disp" {
            m.sym.sym_type = STT_OBJECT;
        }
        if m.sym.bind == STB_LOCAL && m.sym.st_shndx == SHN_UNDEF {
            return Err(Error::failure(format!(
                "local symbol \"{}\" is undefined",
                m.sym.name
            )));
        }
        if m.sym.name.is_empty() {
            if m.sym.bind != STB_LOCAL {
                return Err(Error::failure("global symbol with no name"));
            }
            kept.push(m);
            continue;
        }
        match name_to_slot.get(&m.sym.name) {
            None => {
                name_to_slot.insert(m.sym.name.clone(), kept.len());
                kept.push(m);
            }
            Some(&slot) => {
                let existing = &kept[slot].sym;
                if m.sym.st_shndx != SHN_UNDEF
                    && !(existing.st_shndx == m.sym.st_shndx
                        && existing.st_value == m.sym.st_value)
                {
                    return Err(Error::failure(format!(
                        "symbol \"{}\" defined twice",
                        m.sym.name
                    )));
                }
                aliases.push((m.origin, slot));
            }
        }
    }

    // Reorder: the reserved empty symbol first, locals before globals,
    // _gp_disp last.
    let mut ordered: Vec<(usize, MergedSym)> = Vec::with_capacity(kept.len() + 1);
    ordered.push((
        usize::MAX,
        MergedSym {
            sym: empty_symbol,
            origin: SymOrigin::Target(0),
        },
    ));
    ordered.extend(kept.into_iter().enumerate());
    ordered.sort_by_key(|(_, m)| (m.sym.bind != STB_LOCAL, m.sym.name == "_gp_disp"));

    let mut slot_to_final: HashMap<usize, usize> = HashMap::new();
    let mut target_map: HashMap<usize, usize> = HashMap::new();
    let mut asm_map: HashMap<usize, usize> = HashMap::new();
    for (final_idx, (slot, m)) in ordered.iter().enumerate() {
        slot_to_final.insert(*slot, final_idx);
        match m.origin {
            SymOrigin::Target(i) => {
                target_map.insert(i, final_idx);
            }
            SymOrigin::Asm(i) => {
                asm_map.insert(i, final_idx);
            }
            SymOrigin::Synthetic => {}
        }
    }
    for (origin, slot) in aliases {
        let final_idx = slot_to_final[&slot];
        match origin {
            SymOrigin::Target(i) => {
                target_map.insert(i, final_idx);
            }
            SymOrigin::Asm(i) => {
                asm_map.insert(i, final_idx);
            }
            SymOrigin::Synthetic => {}
        }
    }

    let num_local_syms = ordered.iter().filter(|(_, m)| m.sym.bind == STB_LOCAL).count();
    let final_syms: Vec<Symbol> = ordered.into_iter().map(|(_, m)| m.sym).collect();
    debug!(symbols = final_syms.len(), locals = num_local_syms, "merged symbol tables");
    let mut symtab_data = Vec::with_capacity(final_syms.len() * 16);
    for s in &final_syms {
        symtab_data.extend(s.to_bin());
    }
    let symtab_idx = objfile.symtab_index;
    objfile.sections[symtab_idx].data = symtab_data;
    objfile.sections[symtab_idx].sh_info = num_local_syms as u32;
    objfile.sections[symtab_idx].symbols = final_syms;

    // Fix up relocation symbol references in every relocation section of
    // the target, dropping relocations for dummy code whose bytes we
    // replaced above.
    for ri in 0..objfile.sections.len() {
        if !objfile.sections[ri].is_rel() {
            continue;
        }
        let target_idx = objfile.sections[ri].sh_info as usize;
        let target_name = objfile.sections[target_idx].name.clone();
        let mut rels = std::mem::take(&mut objfile.sections[ri].relocations);
        rels.retain(|rel| {
            !((target_name == ".text" && modified_text_positions.contains(&rel.r_offset))
                || (target_name == ".rodata" && jtbl_rodata_positions.contains(&rel.r_offset)))
        });
        for rel in &mut rels {
            rel.sym_index = *target_map.get(&rel.sym_index).ok_or_else(|| {
                Error::failure("relocation references a discarded symbol")
            })?;
        }
        let mut data = Vec::with_capacity(rels.len() * 12);
        for rel in &rels {
            data.extend(rel.to_bin());
        }
        objfile.sections[ri].data = data;
        objfile.sections[ri].relocations = rels;
    }

    // Move over relocations from the assembled object, creating target
    // relocation sections as needed.
    let symtab_link = objfile.symtab_index as u32;
    for sectype in SECTIONS.iter().copied().chain(std::iter::once(".late_rodata")) {
        let Some(source_idx) = asm_objfile.find_section_index(sectype) else {
            continue;
        };
        if asm_objfile.sections[source_idx].data.is_empty() {
            continue;
        }
        let target_sectype = if sectype == ".late_rodata" {
            ".rodata"
        } else {
            sectype
        };
        let target_idx = objfile
            .find_section_index(target_sectype)
            .ok_or_else(|| Error::failure(format!("missing target section {}", target_sectype)))?;
        for reltab_idx in asm_objfile.sections[source_idx].relocated_by.clone() {
            let reltab = &asm_objfile.sections[reltab_idx];
            let rel_sh_type = reltab.sh_type;
            let mut migrated = Vec::with_capacity(reltab.relocations.len() * 12);
            for rel in &reltab.relocations {
                let mut rel = rel.clone();
                rel.sym_index = *asm_map.get(&rel.sym_index).ok_or_else(|| {
                    Error::failure("assembled relocation references a discarded symbol")
                })?;
                if sectype == ".late_rodata" {
                    rel.r_offset = *moved_late_rodata.get(&rel.r_offset).ok_or_else(|| {
                        Error::failure("relocation references unmoved late rodata")
                    })?;
                }
                migrated.extend(rel.to_bin());
            }
            let prefix = if rel_sh_type == SHT_REL { ".rel" } else { ".rela" };
            let reltab_name = format!("{}{}", prefix, target_sectype);
            let target_reltab_idx = match objfile.find_section_index(&reltab_name) {
                Some(idx) => idx,
                None => objfile.add_section(
                    &reltab_name,
                    rel_sh_type,
                    0,
                    symtab_link,
                    target_idx as u32,
                    4,
                    Relocation::entsize(rel_sh_type) as u32,
                    Vec::new(),
                )?,
            };
            objfile.sections[target_reltab_idx].data.extend(migrated);
        }
    }

    objfile.write(objfile_path)?;
    debug!("wrote spliced object to {}", objfile_path.display());
    Ok(())
}
