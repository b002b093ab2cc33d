use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use capped_logger::init::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    init_tracing();

    match &args.command {
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show(&args)?,
        },
        cli::Commands::Reset { yes } => {
            commands::reset::execute(&args, *yes).await?;
        }
        cli::Commands::Log {
            severity,
            message,
            progname,
        } => {
            commands::log::execute(&args, severity, message, progname.as_deref()).await?;
        }
    }

    Ok(())
}
