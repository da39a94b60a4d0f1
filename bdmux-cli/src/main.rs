use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::exit;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use mux::{parse_meta_file, MuxContext};

/// BDAV MPEG-2 transport stream multiplexer.
#[derive(Parser, Debug)]
#[command(name = "bdmux", version, about)]
struct CliArgs {
    /// Input META description file.
    meta: PathBuf,

    /// Output transport stream file.
    #[arg(default_value = "out.m2ts")]
    output: PathBuf,

    /// Rebuild every ESMS script even when valid.
    #[arg(long)]
    force_esms: bool,

    /// Disable the BDAV-STD buffering model.
    #[arg(long)]
    disable_tstd: bool,

    /// Abort on decoder buffer underflow instead of warning.
    #[arg(long)]
    abort_on_underflow: bool,

    /// Verbose logging (DEBUG level; RUST_LOG overrides).
    #[arg(short, long)]
    verbose: bool,
}

fn run(args: &CliArgs) -> anyhow::Result<()> {
    let mut settings = parse_meta_file(&args.meta)
        .with_context(|| format!("reading META file '{}'", args.meta.display()))?;
    settings.options.force_script_generation |= args.force_esms;
    settings.options.disable_buffering_model |= args.disable_tstd;
    settings.options.abort_on_underflow |= args.abort_on_underflow;

    info!(
        tracks = settings.tracks.len(),
        mux_rate = settings.mux_rate,
        cbr = settings.options.cbr,
        "starting mux"
    );

    let mut ctx = MuxContext::new(settings)?;
    let file = File::create(&args.output)
        .with_context(|| format!("creating output file '{}'", args.output.display()))?;
    let mut out = BufWriter::new(file);

    let summary = ctx.mux(&mut out)?;
    println!("{summary}");
    Ok(())
}

fn main() {
    let args = CliArgs::parse();

    let default_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(&args) {
        error!("{err:#}");
        exit(1);
    }
}
