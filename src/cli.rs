use crate::install_state::Stage;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use strum::IntoEnumIterator;

/// pvarr - media stack installer for Raspberry Pi and other Linux hosts
#[derive(Parser)]
#[command(name = "pvarr")]
#[command(about = "Install and manage a Docker-based media server stack")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: log external commands instead of running them.
    ///
    /// Configuration documents and generated files are still written so the
    /// result can be inspected.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Directory holding config.json, services.json and the compose files
    #[arg(long, global = true, env = "PVARR_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check whether this host can run the stack
    Check,
    /// Run every installation stage from a request document
    Install {
        /// JSON file with user_config, network_config, storage_config and services_config
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run a single installation stage
    Stage {
        /// Stage id, e.g. storage_setup
        #[arg(value_parser = parse_stage)]
        stage: Stage,
        /// JSON input for the stage
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Validate an installation request document
    Validate {
        /// Path to the request file to validate
        config: PathBuf,
    },
    /// Control the deployed stack
    Services {
        #[command(subcommand)]
        action: ServiceCommands,
    },
    /// Show host facts and Tailscale status
    Info,
}

#[derive(Subcommand)]
pub enum ServiceCommands {
    Start,
    Stop,
    Restart,
    /// Per-service selection, container state and URL
    Status,
    /// Pull new images and restart containers that were running
    Update,
    /// Print recent container output
    Logs {
        /// Container name
        name: String,
        /// Number of lines from the end
        #[arg(short = 'n', long, default_value_t = 100)]
        lines: usize,
    },
}

fn parse_stage(raw: &str) -> Result<Stage, String> {
    raw.parse().map_err(|_| {
        let known: Vec<&str> = Stage::iter().map(Stage::id).collect();
        format!("unknown stage '{}' (expected one of: {})", raw, known.join(", "))
    })
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["pvarr"]).is_err());
    }

    #[test]
    fn test_cli_install_with_config() {
        let cli = Cli::try_parse_from(["pvarr", "install", "--config", "/path/to/request.json"]).unwrap();
        match cli.command {
            Commands::Install { config } => {
                assert_eq!(config.to_str().unwrap(), "/path/to/request.json");
            }
            _ => panic!("Expected Install command"),
        }
    }

    #[test]
    fn test_cli_stage_parses_id() {
        let cli = Cli::try_parse_from(["pvarr", "stage", "storage_setup", "--input", "storage.json"]).unwrap();
        match cli.command {
            Commands::Stage { stage, input } => {
                assert_eq!(stage, Stage::StorageSetup);
                assert_eq!(input.unwrap().to_str().unwrap(), "storage.json");
            }
            _ => panic!("Expected Stage command"),
        }
    }

    #[test]
    fn test_cli_unknown_stage_rejected() {
        let err = Cli::try_parse_from(["pvarr", "stage", "reboot"]).err().unwrap();
        assert!(err.to_string().contains("docker_setup"));
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["pvarr", "check", "--dry-run", "--config-dir", "/tmp/pvarr"]).unwrap();
        assert!(cli.dry_run);
        assert_eq!(cli.config_dir.unwrap().to_str().unwrap(), "/tmp/pvarr");
    }

    #[test]
    fn test_cli_service_logs() {
        let cli = Cli::try_parse_from(["pvarr", "services", "logs", "sonarr", "-n", "20"]).unwrap();
        match cli.command {
            Commands::Services {
                action: ServiceCommands::Logs { name, lines },
            } => {
                assert_eq!(name, "sonarr");
                assert_eq!(lines, 20);
            }
            _ => panic!("Expected services logs"),
        }
    }
}
