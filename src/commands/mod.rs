pub mod config;
pub mod log;
pub mod reset;

use crate::cli::Cli;
use capped_logger::config::Environment;
use capped_logger::init::host_options;
use capped_logger::LoggerOptions;

/// Writer options for the CLI's global flags
pub fn options(cli: &Cli) -> LoggerOptions {
    host_options(Environment::new(cli.env.clone()), &cli.config_dir, &cli.log_path())
        .with_application_name("capped-logger")
}
