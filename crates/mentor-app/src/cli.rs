//! CLI argument definitions for the `mentor` binary.
//!
//! Uses `clap` with derive macros. Priority resolution for settings:
//! CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Mentor — semantic advisor matching over an embedding index.
#[derive(Parser, Debug)]
#[command(name = "mentor", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// One-shot maintenance commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize the database schema.
    InitDb,
    /// Rebuild the vector index from embeddings stored in the database.
    RebuildIndex,
    /// Sync all advisors of one institution from the feed, by ROR id.
    Sync {
        /// Institution ROR identifier (e.g. 00f54p054).
        ror_id: String,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > MENTOR_CONFIG env var > platform default
    /// (~/.mentor/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("MENTOR_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".mentor").join("config.toml");
    }
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".mentor").join("config.toml");
    }
    PathBuf::from("config.toml")
}
