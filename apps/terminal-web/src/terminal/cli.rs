use clap::{Args, Parser};
use std::path::PathBuf;

use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "terminal-web",
    about = "Serve a navigable document as a terminal UI over SSH",
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), "-", env!("BUILD_TIMESTAMP"))
)]
pub struct Cli {
    #[arg(long, help = "Run the SSH service instead of a local preview")]
    pub server: bool,

    #[arg(long, value_name = "PORT", help = "Override the configured listen port")]
    pub port: Option<u16>,

    #[arg(
        long,
        value_name = "PATH",
        env = "TERMINAL_WEB_CONFIG",
        help = "TOML configuration file"
    )]
    pub config: Option<PathBuf>,

    #[arg(long, value_name = "DIR", help = "Directory holding the page files")]
    pub docs: Option<PathBuf>,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "TERMINAL_WEB_LOG_LEVEL",
        default_value_t = LogLevel::Info,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "TERMINAL_WEB_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}
