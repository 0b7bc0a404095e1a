use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "inspector", version, about = "Request inspector")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Serve the inspector API around the demo app (default)
    Serve,

    /// List captured requests, newest first
    List(crate::commands::list::ListArgs),

    /// Display one captured request
    Show(crate::commands::show::ShowArgs),

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Display current configuration
    Show,

    /// Validate configuration file
    Validate,
}

impl Cli {
    /// Get the command to execute, defaulting to Serve if none provided
    pub fn get_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_serve() {
        let cli = Cli {
            config: PathBuf::from("config.toml"),
            command: None,
        };

        assert!(matches!(cli.get_command(), Commands::Serve));
    }

    #[test]
    fn test_cli_parsing_list() {
        let args = vec!["inspector", "list", "--last", "25", "--format", "json"];
        let cli = Cli::try_parse_from(args).unwrap();

        match cli.get_command() {
            Commands::List(list) => {
                assert_eq!(list.last, 25);
                assert_eq!(list.format, "json");
            }
            _ => panic!("Expected List command"),
        }
    }

    #[test]
    fn test_cli_parsing_show_section() {
        let args = vec!["inspector", "show", "latest", "--section", "timeline"];
        let cli = Cli::try_parse_from(args).unwrap();

        match cli.get_command() {
            Commands::Show(show) => {
                assert_eq!(show.token, "latest");
                assert_eq!(show.section.as_deref(), Some("timeline"));
            }
            _ => panic!("Expected Show command"),
        }
    }

    #[test]
    fn test_cli_parsing_global_config() {
        let args = vec!["inspector", "config", "validate", "--config", "/etc/inspector.toml"];
        let cli = Cli::try_parse_from(args).unwrap();

        assert_eq!(cli.config, PathBuf::from("/etc/inspector.toml"));
        match cli.get_command() {
            Commands::Config { action } => {
                assert!(matches!(action, ConfigCommands::Validate));
            }
            _ => panic!("Expected Config command"),
        }
    }
}
