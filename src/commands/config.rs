use crate::cli::Cli;
use anyhow::Result;
use capped_logger::config::{default_sources, resolve_config, Environment, LoggerConfig};
use colored::Colorize;
use tracing::info;

/// Execute the config show command
///
/// Displays the effective configuration: built-in defaults merged with the
/// first configuration file found for the selected environment
pub fn show(cli: &Cli) -> Result<()> {
    let env = Environment::new(cli.env.clone());
    info!(env = %env, config_dir = %cli.config_dir.display(), "Resolving configuration for display");

    let resolved = resolve_config(&default_sources(&cli.config_dir), &env)?;
    let cfg = LoggerConfig::effective(&env, resolved)?;

    println!("{}", format!("Effective configuration ({}):", env).green().bold());
    println!();
    println!("{}", toml::to_string_pretty(&cfg)?);

    Ok(())
}
