//! Switchboard CLI: runs the broker over TCP.

mod cli;
mod config;

use crate::cli::{Cli, Commands};
use crate::config::load_config;
use clap::Parser;
use switchboard_broker::{Broker, BrokerResult};
use switchboard_types::config::{BrokerConfig, SwitchboardConfig};
use switchboard_wire::TcpRouter;
use tokio::sync::watch;
use tracing::{error, info};

fn init_tracing_stderr(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    let (mut config, source) = load_config(cli.config.as_deref());
    init_tracing_stderr(&config.log_level);
    source.log();

    match cli.command {
        Commands::Broker { listen } => {
            if let Some(addr) = listen {
                config.broker.listen_addr = addr;
            }
            cmd_broker(config.broker);
        }
        Commands::Config => cmd_config(&config),
    }
}

fn cmd_broker(config: BrokerConfig) {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(run_broker(config)) {
        error!(error = %e, "Broker failed");
        std::process::exit(1);
    }
}

async fn run_broker(config: BrokerConfig) -> BrokerResult<()> {
    let router = TcpRouter::bind(config.listen_addr).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut broker = Broker::new(router, config);
    broker.run(shutdown_rx).await
}

fn cmd_config(config: &SwitchboardConfig) {
    match toml::to_string_pretty(config) {
        Ok(text) => print!("{text}"),
        Err(e) => {
            eprintln!("Failed to render config: {e}");
            std::process::exit(1);
        }
    }
}
