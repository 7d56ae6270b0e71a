//! CLI commands and argument parsing

use crate::{Config, Error, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;

/// Flatworm - Auto-save uncommitted work to a shadow branch
#[derive(Parser, Debug)]
#[command(name = "flatworm")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the config file (defaults to the platform config directory)
    #[arg(short, long, env = "FLATWORM_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a config file
    Init {
        /// Repository to mirror
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Auto-save branch name
        #[arg(long, short = 'b')]
        branch: String,

        /// Glob to keep out of auto-save commits (repeatable)
        #[arg(long = "exclude", short = 'x')]
        exclude: Vec<String>,

        /// Remote to push the auto-save branch to
        #[arg(long, default_value = "origin")]
        remote: String,

        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },

    /// Watch the repository and auto-save on every change until Ctrl-C
    Watch,

    /// Run a single auto-save cycle now
    Sync {
        /// Print the cycle report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show config and branch state
    Status,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Config file this invocation uses
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Config::default_path(),
        }
    }
}

/// Ask for the essentials on `output`, reading answers from `input`.
///
/// Keeps asking until the answers form a valid config. Exclusions are
/// comma-separated; an empty line means none.
pub fn prompt_config<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<Config> {
    loop {
        let repo = ask(input, output, "Repository path")?;
        let branch = ask(input, output, "Auto-save branch")?;
        let exclude = ask(input, output, "Exclude patterns (comma-separated)")?;

        let config = Config::new(repo, branch).with_exclusions(
            exclude
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
        );

        match config.validate() {
            Ok(()) => return Ok(config),
            Err(e) => writeln!(output, "{e}. Please try again.")?,
        }
    }
}

fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, label: &str) -> Result<String> {
    write!(output, "{label}: ")?;
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(Error::Config(format!("no answer for '{label}'")));
    }
    Ok(line.trim().to_string())
}
