//! CLI front end for the `sdfw` binary (§4.9 "CLI / composition root"); the
//! actual wiring lives in `lib.rs` so it can be exercised from integration
//! tests too.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Cmd>,

    /// Directory holding `config.json`; overrides the platform default.
    #[arg(long, env = "CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand, Clone, Copy, Default)]
enum Cmd {
    /// Run the resident service in the foreground (default).
    #[default]
    Run,
    /// Like `run`, but always logs to stdout regardless of the platform log directory.
    RunDebug,
    /// Register this binary as a platform service. A stub outside Windows.
    Install,
}

fn main() {
    if let Err(e) = try_main() {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or_default();

    if matches!(command, Cmd::Install) {
        return install();
    }

    let directives = if matches!(command, Cmd::RunDebug) { "debug" } else { "info" };
    logging::init(directives).context("Failed to set up logging")?;

    let config_dir = cli
        .config_dir
        .or_else(known_dirs::config_dir)
        .context("Could not determine a config directory")?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    rt.block_on(service::run(config_dir))
}

/// §4.9: "on Linux/macOS it is a documented no-op" (see DESIGN.md's Open
/// Question decision — there is no Windows Service Control Manager
/// integration crate in this workspace, so it stays a stub everywhere).
fn install() -> Result<()> {
    println!("`install` is not implemented on this platform; run the service directly with `sdfw run`.");
    Ok(())
}
