//! End-to-end preprocessing scenarios: real files in, transformed source and
//! Function records out.

use std::fs;
use std::path::PathBuf;

use asmpp::{parse_source, Encoding, OptLevel, Opts};

fn latin1() -> Encoding {
    Encoding::from_label("latin1").unwrap()
}

fn opts(opt: OptLevel) -> Opts {
    Opts {
        opt,
        framepointer: false,
        mips1: false,
        kpic: false,
        pascal: false,
        input_enc: latin1(),
        output_enc: latin1(),
        enable_cutscene_data_float_encoding: false,
    }
}

fn write_temp(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("asmpp-test-{}-{}", std::process::id(), name));
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn two_nop_block_becomes_dummy_function() {
    let path = write_temp(
        "two_nop.c",
        "GLOBAL_ASM(\nglabel foo\nnop\nnop\n)\n",
    );
    let result = parse_source(&path, &opts(OptLevel::O2)).unwrap();

    assert_eq!(result.output_lines.len(), 6);
    assert_eq!(
        result.output_lines[0],
        format!("#line 1 \"{}\"", path.display())
    );
    assert_eq!(result.output_lines[2], "void _asmpp_func_1(void) {");
    assert_eq!(result.output_lines[5], "}");

    assert_eq!(result.functions.len(), 1);
    let function = &result.functions[0];
    assert_eq!(function.text_glabels, vec!["foo"]);
    assert_eq!(function.data.text, (Some("_asmpp_func_1".to_string()), 8));
    assert!(function.late_rodata_dummy_bytes.is_empty());
    assert_eq!(function.jtbl_rodata_size, 0);
    fs::remove_file(path).unwrap();
}

#[test]
fn output_line_count_matches_input() {
    let source = "int a;\n\nGLOBAL_ASM(\nglabel f\nnop\nnop\nnop\n)\nint b;\n";
    let path = write_temp("line_count.c", source);
    let result = parse_source(&path, &opts(OptLevel::O2)).unwrap();

    let input_lines = source.lines().count();
    assert_eq!(result.output_lines.len(), input_lines + 1);
    // untouched lines pass through verbatim
    assert_eq!(result.output_lines[1], "int a;");
    assert_eq!(result.output_lines[9], "int b;");
    let encoded = result.encode_output(&opts(OptLevel::O2)).unwrap();
    let newlines = encoded.iter().filter(|&&b| b == b'\n').count();
    assert_eq!(newlines, input_lines + 1);
    fs::remove_file(path).unwrap();
}

#[test]
fn jump_table_block_emits_single_switch() {
    let mut source = String::from("GLOBAL_ASM(\nglabel f\n");
    for _ in 0..40 {
        source.push_str("nop\n");
    }
    source.push_str(".late_rodata\n");
    for _ in 0..6 {
        source.push_str(".word 3\n");
    }
    source.push_str(")\n");
    let path = write_temp("jtbl.c", &source);
    let result = parse_source(&path, &opts(OptLevel::O2)).unwrap();

    let function = &result.functions[0];
    assert_eq!(function.late_rodata_dummy_bytes.len(), 1);
    assert_eq!(function.jtbl_rodata_size, 20);
    let switches = result
        .output_lines
        .iter()
        .filter(|l| l.contains("switch (*(volatile int*)0)"))
        .count();
    assert_eq!(switches, 1);
    fs::remove_file(path).unwrap();
}

#[test]
fn double_block_infers_alignment_and_pairs_magics() {
    let source = "GLOBAL_ASM(\nglabel f\nnop\nnop\nnop\nnop\nnop\nnop\nnop\nnop\n.late_rodata\n.double 1.25\n)\n";
    let path = write_temp("double.c", source);
    let result = parse_source(&path, &opts(OptLevel::G3)).unwrap();

    let function = &result.functions[0];
    assert_eq!(function.late_rodata_dummy_bytes.len(), 2);
    let mut bits = [0u8; 8];
    bits[..4].copy_from_slice(&function.late_rodata_dummy_bytes[0]);
    bits[4..].copy_from_slice(&function.late_rodata_dummy_bytes[1]);
    let expected = f64::from_be_bytes(bits);
    let stores = result
        .output_lines
        .iter()
        .filter(|l| l.contains("*(volatile double*)0"))
        .count();
    assert_eq!(stores, 1);
    assert!(result
        .output_lines
        .iter()
        .any(|l| l.contains(&format!("{:?}", expected))));
    fs::remove_file(path).unwrap();
}

#[test]
fn too_short_text_block_is_rejected() {
    let path = write_temp("short.c", "GLOBAL_ASM(\nglabel f\nnop\n)\n");
    let err = parse_source(&path, &opts(OptLevel::O2)).unwrap_err();
    assert!(err.to_string().contains("too short .text block"));
    fs::remove_file(path).unwrap();
}

#[test]
fn unterminated_block_is_rejected() {
    let path = write_temp("unterminated.c", "GLOBAL_ASM(\nglabel f\nnop\nnop\n");
    let err = parse_source(&path, &opts(OptLevel::O2)).unwrap_err();
    assert!(err.to_string().contains("unterminated GLOBAL_ASM block"));
    fs::remove_file(path).unwrap();
}

#[test]
fn missing_asm_file_becomes_guarded_include() {
    let path = write_temp(
        "missing.c",
        "GLOBAL_ASM(\"surely/not/a/real/file.s\")\n",
    );
    let result = parse_source(&path, &opts(OptLevel::O2)).unwrap();
    assert_eq!(
        result.output_lines[1],
        "#include \"GLOBAL_ASM:surely/not/a/real/file.s\""
    );
    assert!(result.functions.is_empty());
    assert_eq!(result.deps, vec!["surely/not/a/real/file.s".to_string()]);
    fs::remove_file(path).unwrap();
}

#[test]
fn include_asm_streams_external_file() {
    let dir = std::env::temp_dir().join(format!("asmpp-incdir-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("func_80801234.s"), "glabel func_80801234\nnop\nnop\n").unwrap();

    let source = format!("INCLUDE_ASM(\"{}\", func_80801234);\n", dir.display());
    let path = write_temp("include_asm.c", &source);
    let result = parse_source(&path, &opts(OptLevel::O2)).unwrap();

    assert_eq!(result.functions.len(), 1);
    assert_eq!(result.functions[0].text_glabels, vec!["func_80801234"]);
    assert_eq!(
        result.deps,
        vec![format!("{}/func_80801234.s", dir.display())]
    );
    assert!(result.output_lines[1].contains("void _asmpp_func_1(void) {"));
    fs::remove_file(path).unwrap();
    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn include_rodata_prepends_rodata_section() {
    let dir = std::env::temp_dir().join(format!("asmpp-rodir-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("data.s"), ".word 1, 2, 3\n").unwrap();

    let source = format!("INCLUDE_RODATA(\"{}\", data);\n", dir.display());
    let path = write_temp("include_rodata.c", &source);
    let result = parse_source(&path, &opts(OptLevel::O2)).unwrap();

    let function = &result.functions[0];
    assert_eq!(function.data.rodata.1, 12);
    assert_eq!(function.data.text, (None, 0));
    assert!(result.output_lines[1].contains("const char _asmpp_rodata_1[12] = {1};"));
    fs::remove_file(path).unwrap();
    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn recursive_include_is_inlined_with_line_reset() {
    let dir = std::env::temp_dir().join(format!("asmpp-recdir-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("inner.c"), "int inner_value = 5;\n").unwrap();
    let outer = dir.join("outer.c");
    fs::write(
        &outer,
        "#pragma asmproc recurse\n#include \"inner.c\"\nint after;\n",
    )
    .unwrap();

    let result = parse_source(&outer, &opts(OptLevel::O2)).unwrap();
    assert_eq!(result.output_lines.len(), 4);
    let spliced = &result.output_lines[2];
    assert!(spliced.contains("int inner_value = 5;"));
    assert!(spliced.ends_with(&format!("#line 3 \"{}\"", outer.display())));
    assert!(result
        .deps
        .iter()
        .any(|d| d.ends_with("inner.c")));
    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn cutscene_floats_are_rewritten_as_bit_patterns() {
    let mut options = opts(OptLevel::O2);
    options.enable_cutscene_data_float_encoding = true;
    let source = "CutsceneData thing[] = {\n    CS_TIME(1.0f),\n};\nfloat untouched = 2.0f;\n";
    let path = write_temp("cutscene.c", source);
    let result = parse_source(&path, &options).unwrap();

    assert!(result.output_lines[2].contains("CS_TIME(1065353216)"));
    assert_eq!(result.output_lines[4], "float untouched = 2.0f;");
    fs::remove_file(path).unwrap();
}

#[test]
fn pascal_blocks_use_pascal_dummies() {
    let mut options = opts(OptLevel::O2);
    options.pascal = true;
    let path = write_temp("pascal.p", "GLOBAL_ASM(\nglabel f\nnop\nnop\n)\n");
    let result = parse_source(&path, &options).unwrap();
    assert!(result.output_lines[2].starts_with("procedure _asmpp_func_1();"));
    assert_eq!(result.output_lines[5], "end;");
    fs::remove_file(path).unwrap();
}
