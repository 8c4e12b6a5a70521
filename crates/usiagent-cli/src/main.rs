//! usiagent - USI engine host
//!
//! ## Commands
//!
//! - `serve`: speak USI on stdin/stdout with the built-in resigning player
//! - `version`: print the crate version
//!
//! Logs go to stderr so they never interleave with protocol output.

mod engine;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use engine::{ResignPlayer, UncheckedRules};
use usiagent_core::{AgentConfig, AgentRuntime, ProtocolReader, ProtocolWriter, RunEnd};

#[derive(Parser)]
#[command(name = "usiagent")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "USI engine host", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Agent configuration file (JSON)
    #[arg(short, long, global = true, env = "USIAGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Fail on malformed protocol lines instead of skipping them
    #[arg(long, global = true)]
    strict: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a USI engine on stdin/stdout
    Serve,

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    usiagent_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Serve => cmd_serve(cli.config.as_deref(), cli.strict),
        Commands::Version => {
            println!("usiagent {}", usiagent_core::VERSION);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>, strict: bool) -> Result<AgentConfig> {
    let mut config = match path {
        Some(path) => AgentConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AgentConfig::default(),
    };
    config.strict_protocol |= strict;
    Ok(config)
}

fn cmd_serve(config: Option<&Path>, strict: bool) -> Result<()> {
    let config = load_config(config, strict)?;
    let runtime = AgentRuntime::new(ResignPlayer::default(), Arc::new(UncheckedRules), config);

    let stdin = io::stdin();
    let mut reader = ProtocolReader::new(stdin.lock());
    let writer = ProtocolWriter::new(io::stdout());

    let outcome = runtime
        .start(&mut reader, writer)
        .context("Agent run failed")?;
    match outcome.end {
        RunEnd::Quit => info!(events = outcome.events, "quit received"),
        RunEnd::InputClosed => info!(events = outcome.events, "input closed"),
        RunEnd::Stopped => info!(events = outcome.events, "stopped"),
    }
    Ok(())
}
