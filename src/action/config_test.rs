use std::path::PathBuf;

use anyhow::Context;

use crate::config::Config;
use crate::util::error::{quit_error, quit_error_msg, ErrorHintsBuilder};

/// Invoke the `config test` command.
pub fn invoke(config_path: &str) {
    let mut path = PathBuf::from(config_path);
    if let Ok(canonical) = path.canonicalize() {
        path = canonical;
    }

    if !path.is_file() {
        quit_error_msg(
            format!("Config file does not exist at: {}", path.to_str().unwrap_or("?")),
            ErrorHintsBuilder::default().build().unwrap(),
        );
    }

    let config = match Config::load(&path) {
        Ok(config) => config,
        Err(err) => {
            quit_error(
                err.context("failed to load and parse config"),
                ErrorHintsBuilder::default().build().unwrap(),
            );
        }
    };

    if config.queue.max_join_attempts == 0 {
        quit_error_msg(
            "queue.max_join_attempts must be greater than zero",
            ErrorHintsBuilder::default().build().unwrap(),
        );
    }

    eprintln!("Config loaded successfully!");
}
