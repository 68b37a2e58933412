//! Binary entry point: parses arguments, loads settings, builds a
//! [`Controller`] over a stub native-engine binding, and drives the chosen
//! protocol adapter's stdio loop.

mod shim_launcher;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use dbg_config::DebuggerSettings;
use dbg_engine::Controller;
use dbg_protocol::json::JsonAdapter;
use dbg_protocol::mi::MiAdapter;
use dbg_protocol::ProtocolAdapter;
use shim_launcher::ShimLauncher;
use tracing_subscriber::EnvFilter;

/// Which wire protocol to speak over stdio.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Protocol {
    Mi,
    Json,
}

/// A command-line front end for a managed-runtime debugger.
#[derive(Debug, Parser)]
#[command(name = "netdbg", version, about)]
struct Cli {
    /// Wire protocol to speak over stdin/stdout.
    #[arg(long, value_enum, default_value_t = Protocol::Mi)]
    protocol: Protocol,

    /// Path to a `netdbg.toml` settings file; missing files fall back to
    /// defaults rather than erroring (`DebuggerSettings::load`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase log verbosity; repeat for more detail. Overridden by
    /// `RUST_LOG` when set.
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("netdbg").join("netdbg.toml"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.or_else(default_config_path);
    let settings = match config_path {
        Some(path) => DebuggerSettings::load(&path).with_context(|| format!("loading {}", path.display()))?,
        None => DebuggerSettings::default(),
    };

    let launcher = ShimLauncher::new(settings.engine_shim);
    let controller = Arc::new(Controller::new(Box::new(launcher)));

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    match cli.protocol {
        Protocol::Mi => MiAdapter::new().run(controller, stdin, stdout).await,
        Protocol::Json => JsonAdapter::new().run(controller, stdin, stdout).await,
    }
}
