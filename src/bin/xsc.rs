use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use log::{LevelFilter, Log, Metadata, Record};
use turnip_shader_xc::{analyze_source, compile, lower_source, Artifact, CompileError, Target};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Emit {
    Hlsl,
    Msl,
    Spirv,
    /// Dump the lowered IR
    Ir,
    /// Only check the source
    Validate,
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Shader source path
    #[clap(value_parser)]
    input: PathBuf,
    #[clap(short, long, value_enum, default_value = "spirv")]
    target: Emit,
    /// Output path. Text goes to stdout when omitted, SPIR-V requires a path.
    #[clap(short, long, value_parser)]
    output: Option<PathBuf>,
    /// Log pipeline stages to stderr
    #[clap(short, long)]
    verbose: bool,
}

struct StderrLogger;
impl Log for StderrLogger {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        eprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
    }

    fn flush(&self) {}
}
static LOGGER: StderrLogger = StderrLogger;

enum Output {
    Text(String),
    Bytes(Vec<u8>),
    Nothing,
}

fn run(args: &Args, source: &str) -> Result<Output, CompileError> {
    let target = match args.target {
        Emit::Hlsl => Target::Hlsl,
        Emit::Msl => Target::Msl,
        Emit::Spirv => Target::SpirV,
        Emit::Ir => return Ok(Output::Text(lower_source(source)?.to_string())),
        Emit::Validate => {
            analyze_source(source)?;
            return Ok(Output::Nothing);
        }
    };
    Ok(match compile(source, target)? {
        Artifact::Text(text) => Output::Text(text),
        Artifact::Binary(words) => Output::Bytes(words.iter().flat_map(|w| w.to_le_bytes()).collect()),
    })
}

fn main() -> ExitCode {
    let args = Args::parse();
    if args.verbose && log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Trace);
    }

    let source = match std::fs::read_to_string(&args.input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("couldn't read {}: {}", args.input.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let output = match run(&args, &source) {
        Ok(output) => output,
        Err(e) => {
            eprintln!("{}: {}", args.input.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let written = match (output, &args.output) {
        (Output::Nothing, _) => {
            println!("{}: ok", args.input.display());
            Ok(())
        }
        (Output::Text(text), None) => {
            print!("{}", text);
            Ok(())
        }
        (Output::Text(text), Some(path)) => std::fs::write(path, text),
        (Output::Bytes(bytes), Some(path)) => std::fs::write(path, bytes),
        (Output::Bytes(_), None) => {
            eprintln!("SPIR-V output needs --output");
            return ExitCode::FAILURE;
        }
    };
    match written {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("couldn't write output: {}", e);
            ExitCode::FAILURE
        }
    }
}
