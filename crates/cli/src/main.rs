use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use collaboration::EngineConfig;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod scenario;

#[derive(Parser)]
#[command(name = "board-sim")]
#[command(about = "Headless whiteboard collaboration simulator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scripted editing scenario and print a JSON report
    Run {
        /// Number of peers joining the board (at least 2)
        #[arg(short, long, default_value_t = 3)]
        peers: usize,

        /// Engine configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "board_sim=debug,collaboration=debug"
    } else {
        "board_sim=info,collaboration=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // Logs go to stderr so the report on stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { peers, config } => run_command(peers, config),
    }
}

fn run_command(peers: usize, config_path: Option<PathBuf>) -> Result<()> {
    let config = match config_path {
        Some(path) => EngineConfig::load(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    info!("simulating {} peers", peers);
    let report = scenario::run(&config, peers)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
