use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use parrot_client::DiscordClient;
use parrot_config::{ParrotConfig, loader};
use parrot_core::ParrotError;
use parrot_runtime::{Bot, global_registry};

#[derive(Parser)]
#[command(name = "parrot", version, about = "Multi-guild learning and reaction chat bot")]
pub struct Cli {
    /// Path to parrot.toml (default: ~/.parrot/parrot.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose (debug) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and run until interrupted.
    Start,
    /// Print the resolved configuration.
    Config,
    /// Print version information.
    Version,
}

impl Cli {
    pub async fn run(self) -> parrot_core::Result<()> {
        let config = loader::load(self.config.as_deref())?;

        // Resolve log level: --verbose > --quiet > config.
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            config.logging.level.as_str()
        };
        init_tracing(&config, log_level);

        match self.command {
            Commands::Start => cmd_start(config).await,
            Commands::Config => cmd_config(&config),
            Commands::Version => {
                println!("parrot v{}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

fn init_tracing(config: &ParrotConfig, level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

async fn cmd_start(config: ParrotConfig) -> parrot_core::Result<()> {
    println!("parrot v{}", env!("CARGO_PKG_VERSION"));
    println!("   Storage: {}", config.bot.storage_dir.display());
    println!("   Autosave: every {}s", config.bot.autosave_period_secs);
    println!();

    let Some(token) = config.bot.token.clone() else {
        return Err(ParrotError::Config(
            "bot.token is not set — add it to parrot.toml or export PARROT_TOKEN".into(),
        ));
    };

    let client = Arc::new(DiscordClient::new(token));
    let registry = global_registry();
    let bot = Bot::new(client, config, Arc::clone(&registry));
    Arc::clone(&bot).start().await;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    registry.cleanup().await;
    Ok(())
}

fn cmd_config(config: &ParrotConfig) -> parrot_core::Result<()> {
    let rendered =
        toml::to_string_pretty(config).map_err(|e| ParrotError::Config(e.to_string()))?;
    println!("{rendered}");
    Ok(())
}
