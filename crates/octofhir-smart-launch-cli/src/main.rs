mod cli;
mod commands;
mod observability;
mod output;
mod settings;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use output::print_error;
use settings::CliConfig;

/// Exit status for configuration problems.
const EXIT_CONFIG: i32 = 2;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        let code = if settings::is_config_error(&e) {
            EXIT_CONFIG
        } else {
            1
        };
        std::process::exit(code);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let format = cli.format.unwrap_or_default();

    match &cli.command {
        Commands::Resolve(args) => {
            let config = load_and_init(&cli)?;
            commands::resolve::run(&config, args, format).await?;
        }
        Commands::CheckConfig => {
            let config = load_and_init(&cli)?;
            commands::check_config::run(&config, format)?;
        }
        Commands::Describe => {
            observability::init_tracing(cli.log_level.as_deref().unwrap_or("warn"));
            commands::describe::run(format)?;
        }
    }

    Ok(())
}

fn load_and_init(cli: &Cli) -> Result<CliConfig> {
    let config = settings::load_config(cli.config.as_deref())?;
    observability::init_tracing(cli.log_level.as_deref().unwrap_or(&config.logging.level));
    tracing::debug!(
        config_file = ?cli.config,
        level = %config.logging.level,
        "Configuration loaded"
    );
    Ok(config)
}
