//! CLI argument parsing using clap v4
//!
//! Defines the command-line interface for the WebSocket probe.

use clap::{Parser, Subcommand};

/// wsprobe - WebSocket connectivity probe
///
/// Connects to a WebSocket endpoint, journals every message it receives,
/// checks liveness with ping/pong heartbeats and reconnects after any
/// failure until interrupted.
#[derive(Parser, Debug)]
#[command(name = "wsprobe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Defaults to `run` when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands for the probe
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the probe until Ctrl+C
    Run {
        /// Path to configuration file
        #[arg(short, long, env = "WSPROBE_CONFIG")]
        config: Option<String>,

        /// Endpoint to probe, overriding the configuration
        #[arg(short, long)]
        url: Option<String>,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}

impl Cli {
    /// The command to execute, `run` with defaults when none was given
    pub fn command(self) -> Commands {
        self.command.unwrap_or(Commands::Run {
            config: None,
            url: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        <Cli as CommandFactory>::command().debug_assert();
    }

    #[test]
    fn test_no_command_runs() {
        let cli = Cli::parse_from(["wsprobe"]);
        match cli.command() {
            Commands::Run { config, url } => {
                assert!(config.is_none());
                assert!(url.is_none());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_with_config() {
        let cli = Cli::parse_from(["wsprobe", "run", "--config", "/path/to/config.toml"]);
        match cli.command() {
            Commands::Run { config, .. } => {
                assert_eq!(config, Some("/path/to/config.toml".to_string()));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_with_url() {
        let cli = Cli::parse_from(["wsprobe", "run", "--url", "wss://example.com/feed"]);
        match cli.command() {
            Commands::Run { url, .. } => {
                assert_eq!(url, Some("wss://example.com/feed".to_string()));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_verbose_flags() {
        let cli = Cli::parse_from(["wsprobe", "-vv", "version"]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_quiet_flag_after_subcommand() {
        let cli = Cli::parse_from(["wsprobe", "run", "--quiet"]);
        assert!(cli.quiet);
    }

    #[test]
    fn test_config_show() {
        let cli = Cli::parse_from(["wsprobe", "config", "show"]);
        match cli.command() {
            Commands::Config {
                subcommand: ConfigSubcommand::Show { config },
            } => {
                assert!(config.is_none());
            }
            _ => panic!("Expected Config Show command"),
        }
    }

    #[test]
    fn test_config_init() {
        let cli = Cli::parse_from(["wsprobe", "config", "init", "--force"]);
        match cli.command() {
            Commands::Config {
                subcommand: ConfigSubcommand::Init { path, force },
            } => {
                assert!(path.is_none());
                assert!(force);
            }
            _ => panic!("Expected Config Init command"),
        }
    }
}
