use crate::cli::Cli;
use anyhow::{bail, Result};
use capped_logger::Logger;
use colored::Colorize;
use std::io::{self, BufRead, Write};

/// Execute the reset command
///
/// Drops the capped collection and recreates it empty. Destructive.
pub async fn execute(cli: &Cli, yes: bool) -> Result<()> {
    if !yes && !confirm(&format!("Drop every log record of environment '{}'?", cli.env))? {
        println!("{}", "Aborted".yellow());
        return Ok(());
    }

    let logger = match Logger::connect(super::options(cli)).await {
        Ok(logger) => logger,
        Err(e) => bail!("Cannot reach the log store: {}", e),
    };

    logger.reset().await?;

    let collection = logger.config().map(|c| c.collection.as_str()).unwrap_or_default();
    println!("{}", format!("✓ Collection '{}' recreated", collection).green());
    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
