use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "capped-logger", version, about = "Capped request log writer")]
pub struct Cli {
    /// Environment whose configuration section is used
    #[arg(short, long, env = "CAPPED_LOGGER_ENV", default_value = "development", global = true)]
    pub env: String,

    /// Directory holding capped_logger.yml / capped_logger.toml / database.yml
    #[arg(long, default_value = "config", global = true)]
    pub config_dir: PathBuf,

    /// Fallback log file (default: log/<env>.log)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Configuration management commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Drop and recreate the capped collection
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Write one message as its own unit of work
    Log {
        /// Severity (debug, info, warn, error, fatal, unknown)
        severity: String,

        /// Message text
        message: String,

        /// Program name recorded with the message
        #[arg(short, long)]
        progname: Option<String>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Display the effective configuration
    Show,
}

impl Cli {
    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("log/{}.log", self.env)))
    }
}
