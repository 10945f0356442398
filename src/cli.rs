use clap::{Parser, Subcommand};

use crate::config::CONFIG_FILE;

/// Matchmaking and server queue core for game server lobbies.
#[derive(Parser, Debug)]
#[command(name = "queue-core", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Use config file.
    #[arg(short, long, alias = "cfg", global = true, value_name = "FILE", default_value = CONFIG_FILE)]
    pub config: String,

    /// Enable verbose (debug) logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the queue core (default).
    #[command(alias = "run")]
    Start,

    /// Config actions.
    #[command(alias = "cfg", subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Generate a starter config file.
    #[command(alias = "gen")]
    Generate,

    /// Test a config file for validity.
    Test,
}
