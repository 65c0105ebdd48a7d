//! CLI argument parsing for the bridge.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use kostal_common::{LogFormat, LoggingConfig};

/// Common CLI arguments for the bridge.
#[derive(Parser, Debug, Clone)]
#[command(about = "Kostal inverter telemetry bridge")]
#[command(version)]
pub struct BridgeArgs {
    /// Working directory holding `settings/` and `store/`.
    #[arg(short, long, default_value = ".")]
    pub work_dir: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log output format (text or json).
    #[arg(long, default_value = "text")]
    pub log_format: LogFormat,

    /// Log every measurement to the console.
    #[arg(long)]
    pub console: bool,

    /// Inverter poll interval in seconds.
    #[arg(long, default_value_t = 10)]
    pub poll_interval_secs: u64,

    /// Health publication interval in seconds.
    #[arg(long, default_value_t = 60)]
    pub heartbeat_interval_secs: u64,
}

impl BridgeArgs {
    /// Parse CLI arguments.
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Logging configuration built from the CLI flags.
    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level.clone(),
            format: self.log_format,
        }
    }

    /// Inverter poll interval (at least one second).
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Heartbeat interval (at least one second).
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = BridgeArgs::try_parse_from(["kostal-bridge"]).unwrap();
        assert_eq!(args.work_dir, PathBuf::from("."));
        assert_eq!(args.log_level, "info");
        assert_eq!(args.log_format, LogFormat::Text);
        assert!(!args.console);
        assert_eq!(args.poll_interval(), Duration::from_secs(10));
        assert_eq!(args.heartbeat_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_args_overrides() {
        let args = BridgeArgs::try_parse_from([
            "kostal-bridge",
            "--work-dir",
            "/var/lib/kostal",
            "--log-format",
            "json",
            "--console",
            "--poll-interval-secs",
            "0",
        ])
        .unwrap();

        assert_eq!(args.work_dir, PathBuf::from("/var/lib/kostal"));
        assert_eq!(args.logging().format, LogFormat::Json);
        assert!(args.console);
        assert_eq!(args.poll_interval(), Duration::from_secs(1));
    }
}
