use std::path::PathBuf;

use anyhow::Context;

use crate::config::Config;
use crate::util::cli::prompt_yes;
use crate::util::error::{quit, quit_error, ErrorHintsBuilder};

/// Invoke the `config generate` command.
pub fn invoke(config_path: &str) {
    let mut path = PathBuf::from(config_path);
    if let Ok(canonical) = path.canonicalize() {
        path = canonical;
    }

    if path.is_file()
        && !prompt_yes(
            &format!(
                "Config file already exists, overwrite?\nPath: {}",
                path.to_str().unwrap_or("?")
            ),
            Some(true),
        )
    {
        quit();
    }

    let toml = match Config::default().to_toml_string() {
        Ok(toml) => toml,
        Err(err) => {
            quit_error(
                err.context("failed to render default config"),
                ErrorHintsBuilder::default().build().unwrap(),
            );
        }
    };

    if let Err(err) = std::fs::write(&path, toml).context("failed to write config file") {
        quit_error(err, ErrorHintsBuilder::default().build().unwrap());
    }

    eprintln!("Config saved at: {}", path.to_str().unwrap_or("?"));
}
