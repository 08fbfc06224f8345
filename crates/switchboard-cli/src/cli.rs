//! Clap CLI definitions for Switchboard.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Switchboard: a broker for GET/SET parameter access between devices.
#[derive(Parser)]
#[command(name = "switchboard", version, about)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the broker over TCP until Ctrl+C.
    Broker {
        /// Address to listen on (overrides `broker.listen_addr`).
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Print the effective configuration as TOML.
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broker_with_listen() {
        let cli = Cli::try_parse_from([
            "switchboard",
            "--config",
            "/tmp/sb.toml",
            "broker",
            "--listen",
            "0.0.0.0:6000",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/sb.toml")));
        match cli.command {
            Commands::Broker { listen } => {
                assert_eq!(listen, Some("0.0.0.0:6000".parse().unwrap()))
            }
            Commands::Config => panic!("Expected broker"),
        }
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["switchboard"]).is_err());
        assert!(Cli::try_parse_from(["switchboard", "config"]).is_ok());
    }
}
