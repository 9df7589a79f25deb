//! # Arabica: shift handover automation + employee chat presence
//!
//! Usage:
//!   arabica                              # Start gateway + lifecycle runners (default)
//!   arabica serve --config ./arabica.toml
//!   arabica tick --kind envelope         # Run one lifecycle tick and print the summary
//!   arabica init                         # Write a default config file

use anyhow::Result;
use arabica_core::{ArabicaConfig, SystemClock};
use arabica_gateway::AppState;
use arabica_scheduler::ReportKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arabica", version, about = "☕ Arabica: shift handover automation and chat presence")]
struct Cli {
    /// Config file (default: ~/.arabica/config.toml)
    #[arg(short, long, env = "ARABICA_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP/WebSocket gateway and both lifecycle runners
    Serve,
    /// Run one lifecycle tick now
    Tick {
        /// shift | envelope
        #[arg(short, long, default_value = "shift")]
        kind: String,
    },
    /// Write a default config file if none exists
    Init,
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose {
        "arabica=debug,tower_http=debug"
    } else {
        "arabica=info,tower_http=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config.clone().unwrap_or_else(ArabicaConfig::default_path)
}

fn load_config(cli: &Cli) -> Result<ArabicaConfig> {
    let path = config_path(cli);
    if path.exists() {
        tracing::info!("⚙️  Config: {}", path.display());
        Ok(ArabicaConfig::load_from(&path)?)
    } else {
        tracing::info!("⚙️  No config at {}, using defaults", path.display());
        Ok(ArabicaConfig::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    match cli.command {
        None | Some(Command::Serve) => {
            let config = load_config(&cli)?;
            arabica_gateway::start(config).await
        }
        Some(Command::Tick { ref kind }) => {
            let kind: ReportKind = kind.parse()?;
            let config = load_config(&cli)?;
            let state = AppState::new(&config, Arc::new(SystemClock))?;
            let report = arabica_scheduler::run_tick(state.engine(kind))
                .await
                .ok_or_else(|| anyhow::anyhow!("{kind} tick crashed"))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Some(Command::Init) => {
            let path = config_path(&cli);
            if path.exists() {
                println!("⚠️  Config already exists: {}", path.display());
                return Ok(());
            }
            ArabicaConfig::default().save_to(&path)?;
            println!("✅ Wrote default config to {}", path.display());
            Ok(())
        }
    }
}
