use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;

use crate::cli::OutputFormat;
use crate::output::{print_json, print_success, print_warning};
use crate::settings::CliConfig;

pub fn run(config: &CliConfig, format: OutputFormat) -> Result<()> {
    let launch = config
        .launch_config()
        .context("Invalid launch configuration")?;

    if format == OutputFormat::Json {
        return print_json(&json!({
            "valid": true,
            "logging": { "level": config.logging.level },
            "launch": launch,
        }));
    }

    println!("{}", "Effective launch configuration".bold());
    println!("{}", serde_json::to_string_pretty(&launch)?);
    if launch.resolution.allow_http {
        print_warning("Plain HTTP endpoints are allowed; use only for local testing");
    }
    print_success("Configuration is valid");
    Ok(())
}
