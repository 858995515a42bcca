//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "helios")]
#[command(author, version, about = "Monitor and control a Helios solar panel over Bluetooth LE")]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output (also honours NO_COLOR)
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, env = "HELIOS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Reusable panel connection arguments
#[derive(Debug, Clone, Args)]
pub struct DeviceArgs {
    /// Panel name or address, or use HELIOS_DEVICE env var (overrides the config file)
    #[arg(short, long, env = "HELIOS_DEVICE")]
    pub device: Option<String>,

    /// Connection timeout in seconds
    #[arg(short = 'T', long, default_value = "30")]
    pub timeout: u64,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Stream live values; type `power` or `search` on stdin to send commands
    Watch {
        #[command(flatten)]
        device: DeviceArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Stop after this many field updates (0 for no limit)
        #[arg(short = 'n', long, default_value = "0")]
        count: u64,

        /// Also print values pushed by notifications
        #[arg(long)]
        notifications: bool,
    },

    /// Toggle the panel's power switch
    Power {
        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Start a sun search
    Search {
        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Show or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum ConfigAction {
    /// Print the configuration file path
    Path,
    /// Print the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_watch() {
        let cli = Cli::try_parse_from(["helios", "watch", "--device", "Helios Panel", "-n", "5"])
            .unwrap();
        match cli.command {
            Commands::Watch { device, count, .. } => {
                assert_eq!(device.device.as_deref(), Some("Helios Panel"));
                assert_eq!(count, 5);
                assert_eq!(device.timeout, 30);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["helios", "-q", "-v", "config", "path"]).is_err());
    }
}
