use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "smart-launch")]
#[command(about = "Resolve SMART on FHIR EHR-launch context against a context service")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./smart-launch.toml when present)
    #[arg(short, long, global = true, env = "SMART_LAUNCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,

    /// Log level filter (overridden by RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Clone, Copy, ValueEnum, Default, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one launch attempt against the configured context service
    Resolve(ResolveArgs),
    /// Show the authenticator descriptor and its configuration properties
    Describe,
    /// Load and validate configuration, printing the effective settings
    CheckConfig,
}

#[derive(clap::Args)]
pub struct ResolveArgs {
    /// Launch token issued by the EHR
    #[arg(short, long)]
    pub launch: Option<String>,

    /// Space-delimited requested scopes
    #[arg(short, long, default_value = "openid launch")]
    pub scope: String,

    /// OAuth client ID of the launching app
    #[arg(long, default_value = "smart-launch-cli")]
    pub client_id: String,

    /// Redirect URI of the launching app
    #[arg(long, default_value = "http://localhost/callback")]
    pub redirect_uri: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resolve() {
        let cli = Cli::try_parse_from([
            "smart-launch",
            "resolve",
            "--launch",
            "abc123",
            "--format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.format, Some(OutputFormat::Json));
        let Commands::Resolve(args) = cli.command else {
            panic!("expected resolve");
        };
        assert_eq!(args.launch.as_deref(), Some("abc123"));
        assert_eq!(args.scope, "openid launch");
    }

    #[test]
    fn test_parse_check_config_with_path() {
        let cli =
            Cli::try_parse_from(["smart-launch", "check-config", "--config", "custom.toml"])
                .unwrap();
        assert!(matches!(cli.command, Commands::CheckConfig));
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(Cli::try_parse_from(["smart-launch", "login"]).is_err());
    }
}
