use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use peersync_core::config::Config;
use peersync_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use peersync_core::metrics::init_metrics;
use std::path::PathBuf;
use tracing::{info, warn};

mod simulate;

#[derive(Parser, Debug)]
#[command(name = "peersync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// TOML configuration file; PEERSYNC_* environment variables otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an in-memory session and check that every peer converges
    Simulate {
        /// Number of peers
        #[arg(short, long, default_value_t = 4)]
        peers: usize,

        /// Number of actions submitted from random peers
        #[arg(short, long, default_value_t = 20)]
        actions: usize,

        /// Seed choosing who acts and what they do
        #[arg(short, long, default_value_t = 1)]
        seed: u64,
    },
    /// Show the effective configuration
    Config {
        /// Print it as TOML
        #[arg(long)]
        print: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::from_env().context("reading PEERSYNC_* environment")?,
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_ref())?;

    let mut log_config = LogConfig::try_from(&config.logging)?;
    if let Some(level) = &args.log_level {
        log_config.level = level.parse::<LogLevel>().unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', using 'info'", level);
            LogLevel::Info
        });
    }
    if args.json_logs {
        log_config = log_config.json_format(true);
    }
    init_logging_with_config(log_config)?;
    init_metrics();

    match args.command {
        Some(Command::Simulate { peers, actions, seed }) => {
            info!(peers, actions, seed, "starting simulation");
            let report = simulate::run(&config, peers, actions, seed).await?;
            println!("{}", serde_json::to_string_pretty(&report.states)?);
            info!(host = %report.host, elapsed = ?report.elapsed, "all peers converged");
        }
        Some(Command::Config { print }) => {
            if print {
                print!("{}", config.to_toml()?);
            } else {
                info!("configuration is valid; pass --print to show it");
            }
        }
        None => {
            warn!("No command specified. Use --help for usage information.");
        }
    }

    Ok(())
}
