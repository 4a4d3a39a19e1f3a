//! Command-line interface definitions.
//!
//! Defines the CLI structure for the oddsmith binary using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Prediction-market trading and settlement engine
#[derive(Parser, Debug)]
#[command(name = "oddsmith")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a configuration file and open its store
    Check {
        /// Path to the TOML configuration
        config: PathBuf,
    },

    /// Run a JSONL script of operations against the configured store
    Replay {
        /// Path to the TOML configuration
        config: PathBuf,

        /// Script with one operation per line
        script: PathBuf,

        /// Keep going after a failed step
        #[arg(long)]
        keep_going: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_replay_arguments() {
        let cli = Cli::try_parse_from(["oddsmith", "replay", "c.toml", "s.jsonl", "--keep-going"])
            .unwrap();
        match cli.command {
            Commands::Replay {
                config,
                script,
                keep_going,
            } => {
                assert_eq!(config, PathBuf::from("c.toml"));
                assert_eq!(script, PathBuf::from("s.jsonl"));
                assert!(keep_going);
            }
            Commands::Check { .. } => panic!("expected replay"),
        }
    }

    #[test]
    fn check_requires_a_config() {
        assert!(Cli::try_parse_from(["oddsmith", "check"]).is_err());
    }
}
