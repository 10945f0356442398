use clap::Parser;

use queue_core::action;
use queue_core::cli::{Cli, Command, ConfigCommand};

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    pretty_env_logger::formatted_builder()
        .filter_level(default_level)
        .parse_default_env()
        .init();

    match cli.command.unwrap_or(Command::Start) {
        Command::Start => {
            let _ = action::start::invoke(&cli.config);
        }
        Command::Config(ConfigCommand::Generate) => action::config_generate::invoke(&cli.config),
        Command::Config(ConfigCommand::Test) => action::config_test::invoke(&cli.config),
    }
}
