//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Internal token service, gateway guard and client token cache
#[derive(Parser, Debug)]
#[command(name = "tokenbridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "TOKENBRIDGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "TOKENBRIDGE_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "TOKENBRIDGE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// What to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the auth service (`/auth/verify`, `/auth/refresh`)
    ServeAuth {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run the gateway in front of the upstream backend
    ServeGateway {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print a valid access token to stdout, authenticating if needed
    GetToken,

    /// Keep the stored token fresh until interrupted
    RefreshLoop,

    /// Show the stored token's state without contacting any server
    Status,

    /// Delete the stored token
    Logout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_auth_accepts_overrides() {
        let cli = Cli::parse_from(["tokenbridge", "serve-auth", "--port", "9000"]);
        match cli.command {
            Command::ServeAuth { host, port } => {
                assert_eq!(host, None);
                assert_eq!(port, Some(9000));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::parse_from([
            "tokenbridge",
            "get-token",
            "--log-level",
            "debug",
            "--log-format",
            "json",
        ]);
        assert!(matches!(cli.command, Command::GetToken));
        assert_eq!(cli.log_level, "debug");
        assert_eq!(cli.log_format.as_deref(), Some("json"));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["tokenbridge"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
