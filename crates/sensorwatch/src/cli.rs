//! Clap derive structures for the `sensorwatch` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// sensorwatch -- liveness monitor for live sensor feeds
#[derive(Debug, Parser)]
#[command(
    name = "sensorwatch",
    version,
    about = "Watch live sensor feeds and report which sensors are alive",
    long_about = "Connects to a sensor feed server over WebSocket push channels,\n\
        falls back to HTTP polling when push degrades, and reports liveness\n\
        transitions and device directory changes as they happen.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "SENSORWATCH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Feed server URL (overrides the config file)
    #[arg(long, short = 's', global = true)]
    pub server: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "SENSORWATCH_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept invalid TLS certificates
    #[arg(long, short = 'k', global = true)]
    pub insecure: bool,

    /// Request timeout, e.g. "5s" or "500ms"
    #[arg(long, global = true)]
    pub timeout: Option<humantime::Duration>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON (one JSON object per line while watching)
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Watch sensors live and print liveness transitions
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// List devices currently known to the server
    #[command(alias = "dev")]
    Devices,

    /// Show the server-side status of one device's sensors
    Sensors(SensorsArgs),

    /// Inspect or create the config file
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Feeds to watch: DEVICE (learn its sensors) or DEVICE:SENSOR[,SENSOR...].
    /// Replaces the feeds from the config file.
    #[arg(value_name = "FEED", value_parser = parse_feed)]
    pub feeds: Vec<FeedSpec>,

    /// Do not follow the device directory
    #[arg(long)]
    pub no_directory: bool,

    /// Stop after this long, e.g. "30s" (default: until Ctrl-C)
    #[arg(long, short = 'd')]
    pub duration: Option<humantime::Duration>,

    /// How recent data must be to count as live
    #[arg(long)]
    pub window: Option<humantime::Duration>,

    /// How long stale data is tolerated before a sensor is inactive
    #[arg(long)]
    pub transition_delay: Option<humantime::Duration>,
}

#[derive(Debug, Args)]
pub struct SensorsArgs {
    /// Device id
    pub device: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Write a config file with defaults and the given --server
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ── Feed parsing ─────────────────────────────────────────────────────

/// A feed named on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSpec {
    pub device: String,
    pub sensors: Vec<String>,
}

pub fn parse_feed(raw: &str) -> Result<FeedSpec, String> {
    let (device, sensors) = match raw.split_once(':') {
        Some((device, list)) => {
            let sensors: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
            if sensors.is_empty() {
                return Err(format!("no sensors listed after ':' in '{raw}'"));
            }
            (device.trim(), sensors)
        }
        None => (raw.trim(), Vec::new()),
    };
    if device.is_empty() {
        return Err(format!("missing device id in '{raw}'"));
    }
    Ok(FeedSpec {
        device: device.to_owned(),
        sensors,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn feed_with_sensors() {
        assert_eq!(
            parse_feed("phone:accelerometer, gyroscope").unwrap(),
            FeedSpec {
                device: "phone".into(),
                sensors: vec!["accelerometer".into(), "gyroscope".into()],
            }
        );
    }

    #[test]
    fn bare_device_learns_sensors() {
        let feed = parse_feed("tablet").unwrap();
        assert_eq!(feed.device, "tablet");
        assert!(feed.sensors.is_empty());
    }

    #[test]
    fn malformed_feeds_are_rejected() {
        assert!(parse_feed(":accelerometer").is_err());
        assert!(parse_feed("phone:").is_err());
        assert!(parse_feed("phone: , ").is_err());
    }
}
