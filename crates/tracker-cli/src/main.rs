//! `tracker`: traces a target process under `ptrace`, builds its observed
//! control-flow graph, and writes it out as Graphviz `.dot` text.
//!
//! Flags are ported from `original_source/src/tracker.c`'s `getopt_long`
//! table; argument parsing itself uses `clap`'s derive API, grounded on
//! `gcrecomp-cli::main`'s `#[derive(Parser)]` style rather than
//! `tv-app::main`'s bare `std::env::args_os()` (that fits a GUI's single
//! "open this file" argument; this front end has real flags to parse).

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use tracker_cli::decode::Decoder;
use tracker_cli::tracer::{Step, Tracer};
use tracker_cli::{dot, elf};

#[derive(Parser)]
#[command(name = "tracker")]
#[command(about = "Trace a program under ptrace and emit its observed control-flow graph")]
#[command(version)]
struct Cli {
    /// Executable to trace.
    exec: PathBuf,

    /// Arguments passed through to the traced executable.
    args: Vec<String>,

    /// Write the rendered `.dot` graph to FILE instead of stdout.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Disassemble in Intel syntax (the default is AT&T, matching `tracker.c`).
    #[arg(short = 'i', long = "intel")]
    intel: bool,

    /// Verbose logging (`RUST_LOG=info`).
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Debug logging (`RUST_LOG=debug`), overrides `--verbose`.
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let text = elf::locate_text(&cli.exec).with_context(|| format!("locating .text in {}", cli.exec.display()))?;
    log::info!(
        "traced binary: .text at 0x{:x}, size 0x{:x}, {:?}",
        text.addr,
        text.size,
        text.bitness
    );

    let decoder = Decoder::new(text.bitness, cli.intel)?;
    let mut tracer = Tracer::spawn(&cli.exec, &cli.args)
        .with_context(|| format!("spawning {} under ptrace", cli.exec.display()))?;
    let mut builder = tracker_core::CfgBuilder::new(tracker_core::DEFAULT_TABLE_SIZE)?;

    let mut instructions_executed: u64 = 0;
    let mut exit_status = 0;

    if let Some((address, window)) = tracer.peek()? {
        observe_step(&mut builder, &decoder, address, &window, &mut instructions_executed);
    }

    loop {
        match tracer.step()? {
            Step::Exited { status } => {
                exit_status = status;
                break;
            }
            Step::Instruction { address, bytes } => {
                observe_step(&mut builder, &decoder, address, &bytes, &mut instructions_executed);
            }
        }
    }

    let unique_instructions = builder.table().entries();
    let bucket_count = builder.table().bucket_count();
    let collisions = builder.table().collisions();
    let cfg = builder.finish();
    let graphs = tracker_core::render_all(&cfg);

    let mut out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(io::stdout().lock()),
    };
    dot::write_all(&mut out, &graphs)?;
    out.flush()?;

    eprintln!("target exited with status {exit_status}");
    eprintln!("#instructions executed: {instructions_executed}");
    eprintln!("#unique instructions: {unique_instructions}");
    eprintln!("#functions: {}", cfg.functions().len());
    eprintln!("#hashtable buckets: {bucket_count}");
    eprintln!("#hashtable collisions: {collisions}");

    Ok(())
}

fn observe_step(
    builder: &mut tracker_core::CfgBuilder,
    decoder: &Decoder,
    address: u64,
    window: &[u8],
    instructions_executed: &mut u64,
) {
    let Some((size, label)) = decoder.decode_one(address, window) else {
        log::warn!("failed to decode instruction at 0x{address:x}, skipping observation");
        return;
    };
    let opcodes = &window[..size as usize];
    if let Err(e) = builder.observe(address, opcodes, size, label) {
        log::warn!("dropped observation at 0x{address:x}: {e}");
    }
    *instructions_executed += 1;
}

/// Maps `-v`/`-d` to a `RUST_LOG` level the way `tv-app::main`'s
/// `env_logger::init()` call expects it to already be set, except this front
/// end derives the level from its own flags instead of requiring the caller
/// to set the environment variable by hand.
fn init_logging(cli: &Cli) {
    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}
