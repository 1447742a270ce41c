//! CLI: pre-process a source file to stdout, or post-process a compiled
//! object in place.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use asmpp::{
    fixup_objfile, parse_source, ConvertStatics, Encoding, Error, OptLevel, Opts, Result,
};

/// Pre-process .c files and post-process .o files to enable embedding
/// assembly into C.
#[derive(Parser, Debug)]
#[command(name = "asmpp", version, about)]
struct Args {
    /// Path to .c code (or .p/.pas/.pp for Pascal)
    filename: PathBuf,

    /// Path to .o file to post-process
    #[arg(long = "post-process", value_name = "OBJFILE")]
    post_process: Option<PathBuf>,

    /// Assembler command (e.g. "mips-linux-gnu-as -march=vr4300 -mabi=32")
    #[arg(long)]
    assembler: Option<String>,

    /// File with a prelude for the assembly file (.set and .macro
    /// directives, e.g.)
    #[arg(long = "asm-prelude", value_name = "PATH")]
    asm_prelude: Option<PathBuf>,

    /// Input encoding
    #[arg(long = "input-enc", default_value = "latin1")]
    input_enc: String,

    /// Output encoding
    #[arg(long = "output-enc", default_value = "latin1")]
    output_enc: String,

    /// Drop .mdebug and .gptab sections from the output object
    #[arg(long = "drop-mdebug-gptab")]
    drop_mdebug_gptab: bool,

    /// Change static symbol visibility
    #[arg(long = "convert-statics", value_enum, default_value = "local")]
    convert_statics: ConvertStatics,

    /// Force processing of files without GLOBAL_ASM blocks
    #[arg(long)]
    force: bool,

    /// Replace floats in CutsceneData arrays with their IEEE-754 bit patterns
    #[arg(long = "encode-cutscene-data-floats")]
    encode_cutscene_data_floats: bool,

    /// Match a compiler invocation using -framepointer
    #[arg(long)]
    framepointer: bool,

    /// Match a compiler invocation targeting MIPS I (no ldc1/sdc1)
    #[arg(long)]
    mips1: bool,

    /// Match a compiler invocation using -KPIC
    #[arg(long = "KPIC")]
    kpic: bool,

    /// Optimization level the compiler is invoked with (-O0, -O1, -O2)
    #[arg(short = 'O', value_name = "LEVEL", value_parser = ["0", "1", "2"])]
    opt: Option<String>,

    /// Match a compiler invocation using -g
    #[arg(short = 'g')]
    debug: bool,

    /// Match a compiler invocation using -g3 (only with -O2)
    #[arg(long = "g3")]
    g3: bool,
}

/// clap cannot express the multi-character single-dash flags the IDO build
/// systems pass; rewrite exactly those to their long forms.
fn canonicalize_flags() -> Vec<String> {
    std::env::args()
        .map(|arg| match arg.as_str() {
            "-framepointer" => "--framepointer".to_string(),
            "-mips1" => "--mips1".to_string(),
            "-KPIC" => "--KPIC".to_string(),
            "-g3" => "--g3".to_string(),
            _ => arg,
        })
        .collect()
}

fn resolve_opt_level(args: &Args) -> Result<OptLevel> {
    if args.opt.is_some() && args.debug {
        return Err(Error::failure("must pass exactly one of -g, -O0, -O1, -O2"));
    }
    let base = match (args.opt.as_deref(), args.debug) {
        (None, true) => OptLevel::G,
        (Some("0"), false) => OptLevel::O0,
        (Some("1"), false) => OptLevel::O1,
        (Some("2"), false) => OptLevel::O2,
        _ => {
            return Err(Error::failure(
                "must pass one of -g, -O0, -O1, -O2, -O2 -g3",
            ))
        }
    };
    if args.g3 {
        if base != OptLevel::O2 {
            return Err(Error::failure("-g3 is only supported together with -O2"));
        }
        return Ok(OptLevel::G3);
    }
    Ok(base)
}

fn run(args: &Args) -> Result<()> {
    let opt = resolve_opt_level(args)?;
    let pascal = matches!(
        args.filename.extension().and_then(|e| e.to_str()),
        Some("p") | Some("pas") | Some("pp")
    );
    if args.mips1 && (!matches!(opt, OptLevel::O1 | OptLevel::O2) || args.framepointer) {
        return Err(Error::failure(
            "-mips1 is only supported together with -O1 or -O2",
        ));
    }
    if pascal && !matches!(opt, OptLevel::O1 | OptLevel::O2 | OptLevel::G3) {
        return Err(Error::failure(
            "Pascal is only supported together with -O1, -O2 or -O2 -g3",
        ));
    }

    let opts = Opts {
        opt,
        framepointer: args.framepointer,
        mips1: args.mips1,
        kpic: args.kpic,
        pascal,
        input_enc: Encoding::from_label(&args.input_enc)?,
        output_enc: Encoding::from_label(&args.output_enc)?,
        enable_cutscene_data_float_encoding: args.encode_cutscene_data_floats,
    };

    match &args.post_process {
        None => {
            let result = parse_source(&args.filename, &opts)?;
            let encoded = result.encode_output(&opts)?;
            let stdout = std::io::stdout();
            stdout.lock().write_all(&encoded)?;
        }
        Some(objfile) => {
            let assembler = args
                .assembler
                .as_deref()
                .ok_or_else(|| Error::failure("must pass assembler command"))?;
            let result = parse_source(&args.filename, &opts)?;
            if result.functions.is_empty() && !args.force {
                return Ok(());
            }
            let asm_prelude = match &args.asm_prelude {
                Some(path) => fs::read(path)?,
                None => Vec::new(),
            };
            fixup_objfile(
                objfile,
                &result.functions,
                &asm_prelude,
                assembler,
                &opts.output_enc,
                args.drop_mdebug_gptab,
                args.convert_statics,
            )?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse_from(canonicalize_flags());
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::Failure(message)) => {
            eprintln!("Error: {}", message);
            ExitCode::FAILURE
        }
        Err(err) => {
            // Environment problems (I/O, encodings) are not user errors;
            // show the debug rendering.
            eprintln!("{:?}", err);
            ExitCode::FAILURE
        }
    }
}
