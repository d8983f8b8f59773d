//! CLI configuration: the shared `sensorwatch_config` loader plus
//! `GlobalOpts` / `WatchArgs` overrides.

use std::path::PathBuf;

use sensorwatch_config::{Config, Feed};
use sensorwatch_core::{MonitorConfig, ServerConfig};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;

/// Config file selected by `--config`, else the platform default.
pub fn path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(sensorwatch_config::config_path)
}

/// Load the config file and environment, then apply global flags.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let mut cfg = sensorwatch_config::load_config_from(&path(global))?;
    if let Some(ref url) = global.server {
        cfg.server.url = Some(url.clone());
    }
    if global.insecure {
        cfg.server.insecure = true;
    }
    if let Some(timeout) = global.timeout {
        cfg.server.timeout_ms = millis(timeout);
    }
    Ok(cfg)
}

/// Server settings for one-shot queries.
pub fn server(global: &GlobalOpts) -> Result<ServerConfig, CliError> {
    let cfg = load(global)?;
    cfg.server_config().map_err(|e| missing_server(e, global))
}

/// Full monitor configuration for `watch`.
pub fn monitor(global: &GlobalOpts, args: &WatchArgs) -> Result<MonitorConfig, CliError> {
    let mut cfg = load(global)?;
    if !args.feeds.is_empty() {
        cfg.feeds = args
            .feeds
            .iter()
            .map(|feed| Feed {
                device: feed.device.clone(),
                sensors: feed.sensors.clone(),
            })
            .collect();
    }
    if args.no_directory {
        cfg.monitor.watch_directory = false;
    }
    if let Some(window) = args.window {
        cfg.monitor.recent_data_window_ms = millis(window);
    }
    if let Some(delay) = args.transition_delay {
        cfg.monitor.transition_delay_ms = millis(delay);
    }
    if cfg.feeds.is_empty() && !cfg.monitor.watch_directory {
        return Err(CliError::NoFeeds);
    }
    cfg.to_monitor_config().map_err(|e| missing_server(e, global))
}

fn missing_server(err: sensorwatch_config::ConfigError, global: &GlobalOpts) -> CliError {
    match err {
        sensorwatch_config::ConfigError::MissingServer => CliError::NoServer {
            path: path(global).display().to_string(),
        },
        other => other.into(),
    }
}

fn millis(duration: humantime::Duration) -> u64 {
    u64::try_from(std::time::Duration::from(duration).as_millis()).unwrap_or(u64::MAX)
}
