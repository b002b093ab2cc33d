use crate::cli::Cli;
use anyhow::{anyhow, Result};
use capped_logger::{Logger, Metadata, Severity};
use colored::Colorize;

/// Execute the log command
///
/// Writes one message inside its own unit of work. When the store is
/// unreachable the message still goes to the fallback log file.
pub async fn execute(cli: &Cli, severity: &str, message: &str, progname: Option<&str>) -> Result<()> {
    let severity: Severity = severity.parse().map_err(|e: String| anyhow!(e))?;

    let logger = match Logger::connect(super::options(cli)).await {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("{}", format!("Warning: {}", e).yellow());
            e.into_degraded()
                .ok_or_else(|| anyhow!("fallback log file {} unavailable", cli.log_path().display()))?
        }
    };

    logger
        .run(Metadata::new(), async {
            logger.add(severity, message, progname).await;
            Ok::<_, anyhow::Error>(())
        })
        .await?;
    logger.flush();

    println!("{}", format!("✓ Logged to {:?} writer", logger.state()).green());
    Ok(())
}
