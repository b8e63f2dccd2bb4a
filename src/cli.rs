use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "agent-factory",
    version,
    about = "Perplexity API gateway for the agent factory with automatic key rotation",
    long_about = "Spreads agent factory calls to the Perplexity API across up to ten API keys, rotating away from exhausted, rejected or failing keys and persisting key health between restarts."
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "AGENT_FACTORY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable JSON logging
    #[arg(long, env = "AGENT_FACTORY_JSON_LOGS", global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start the gateway server (default)
    Serve {
        /// Server port, overrides the configuration
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Inspect or repair API key status
    Keys {
        #[command(subcommand)]
        action: KeyCommands,
    },

    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigCommands {
    /// Validate the configuration and print a summary
    Check,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum KeyCommands {
    /// Print the status of every configured key as JSON
    List,

    /// Return a key to full health
    Reset {
        /// Key identifier, e.g. key_3
        key_id: String,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
