// Allow dead code, until every hint variant is wired up from call sites.
#![allow(dead_code)]

use std::borrow::Borrow;
use std::fmt::{Debug, Display};
use std::io::{self, Write};
pub use std::process::exit;

use anyhow::anyhow;
use colored::{ColoredString, Colorize};
use derive_builder::Builder;
use thiserror::Error;

fn highlight(msg: &str) -> ColoredString {
    msg.yellow()
}

fn highlight_error(msg: &str) -> ColoredString {
    msg.red().bold()
}

fn highlight_warning(msg: &str) -> ColoredString {
    highlight(msg).bold()
}

fn highlight_info(msg: &str) -> ColoredString {
    msg.cyan()
}

/// Domain error kinds surfaced internally by the queueing and matchmaking
/// services.
///
/// Client-facing operations never return these directly (they return
/// `bool` or a typed result per the error propagation policy); this is
/// used for structured logging and the introspection API.
#[derive(Debug, Error)]
pub enum QueueCoreError {
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    #[error("client protocol violation: {0}")]
    ClientProtocolViolation(String),

    #[error("invalid state transition: {0}")]
    InvalidState(String),

    #[error("queue capacity exceeded")]
    CapacityExceeded,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Print the given error in a proper format for the user,
/// with it's causes.
pub fn print_error(err: anyhow::Error) {
    // Report each printable error, count them
    let count = err
        .chain()
        .map(|err| err.to_string())
        .filter(|err| !err.is_empty())
        .enumerate()
        .map(|(i, err)| {
            if i == 0 {
                eprintln!("{} {}", highlight_error("error:"), err);
            } else {
                eprintln!("{} {}", highlight_error("caused by:"), err);
            }
        })
        .count();

    // Fall back to a basic message
    if count == 0 {
        eprintln!("{} an undefined error occurred", highlight_error("error:"),);
    }
}

/// Print the given error message in a proper format for the user,
/// with it's causes.
pub fn print_error_msg<S>(err: S)
where
    S: AsRef<str> + Display + Debug + Sync + Send + 'static,
{
    print_error(anyhow!(err));
}

/// Print a warning.
pub fn print_warning<S>(err: S)
where
    S: AsRef<str> + Display + Debug + Sync + Send + 'static,
{
    eprintln!("{} {}", highlight_warning("warning:"), err);
}

/// Quit the application regularly.
pub fn quit() -> ! {
    exit(0);
}

/// Quit the application with an error code,
/// and print the given error.
pub fn quit_error(err: anyhow::Error, hints: impl Borrow<ErrorHints>) -> ! {
    print_error(err);
    hints.borrow().print(false);
    exit(1);
}

/// Quit the application with an error code,
/// and print the given error message.
pub fn quit_error_msg<S>(err: S, hints: impl Borrow<ErrorHints>) -> !
where
    S: AsRef<str> + Display + Debug + Sync + Send + 'static,
{
    quit_error(anyhow!(err), hints);
}

/// The error hint configuration.
#[derive(Clone, Builder)]
#[builder(default)]
pub struct ErrorHints {
    /// A list of info messages to print along with the error.
    info: Vec<String>,

    /// Show about the config flag.
    config: bool,

    /// Show about the config generate command.
    config_generate: bool,

    /// Show about the config test command.
    config_test: bool,

    /// Show about the verbose flag.
    verbose: bool,

    /// Show about the help flag.
    help: bool,
}

impl ErrorHints {
    /// Check whether any hint should be printed.
    pub fn any(&self) -> bool {
        self.config || self.config_generate || self.config_test || self.verbose || self.help
    }

    /// Print the error hints.
    pub fn print(&self, end_newline: bool) {
        for msg in &self.info {
            eprintln!("{} {}", highlight_info("info:"), msg);
        }

        if !self.any() {
            return;
        }

        eprintln!();

        let bin = crate::util::bin_name();
        if self.config_generate {
            eprintln!(
                "Use '{}' to generate a new config file",
                highlight(&format!("{bin} config generate"))
            );
        }
        if self.config {
            eprintln!(
                "Use '{}' to select a config file",
                highlight("--config FILE")
            );
        }
        if self.config_test {
            eprintln!(
                "Use '{}' to test a config file",
                highlight(&format!("{bin} config test -c FILE"))
            );
        }
        if self.verbose {
            eprintln!("For a detailed log add '{}'", highlight("--verbose"));
        }
        if self.help {
            eprintln!("For more information add '{}'", highlight("--help"));
        }

        if end_newline {
            eprintln!();
        }

        let _ = io::stderr().flush();
    }
}

impl Default for ErrorHints {
    fn default() -> Self {
        ErrorHints {
            info: Vec::new(),
            config: false,
            config_generate: false,
            config_test: false,
            verbose: true,
            help: true,
        }
    }
}

impl ErrorHintsBuilder {
    /// Add a single info entry.
    pub fn add_info(mut self, info: String) -> Self {
        if self.info.is_none() {
            self.info = Some(Vec::new());
        }

        if let Some(ref mut list) = self.info {
            list.push(info);
        }

        self
    }
}
