//! `watch`: run a monitor session and print what changes.
//!
//! Text formats print one line per liveness transition, directory diff and
//! summary change. JSON formats print one compact object per event.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{Local, SecondsFormat, Utc};
use serde::Serialize;
use tabled::Tabled;
use tracing::{info, warn};

use sensorwatch_core::{
    DirectoryDiff, LivenessRecord, LivenessStatus, Monitor, SensorKey, StatusSummary, Subscription,
};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

// ── Events ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WatchEvent<'a> {
    Liveness {
        at: String,
        sensor: &'a SensorKey,
        from: Option<LivenessStatus>,
        to: LivenessStatus,
        data_points: u64,
        error: Option<&'a str>,
    },
    Directory {
        at: String,
        added: Vec<&'a str>,
        updated: Vec<&'a str>,
        removed: &'a [String],
    },
    Summary {
        at: String,
        #[serde(flatten)]
        summary: &'a StatusSummary,
    },
}

/// Renders events as they arrive. Shared with subscription callbacks,
/// which run on the session task.
struct EventPrinter {
    json: bool,
    color: bool,
    quiet: bool,
    last: Mutex<HashMap<SensorKey, LivenessStatus>>,
}

impl EventPrinter {
    fn new(global: &GlobalOpts) -> Self {
        Self {
            json: matches!(global.output, OutputFormat::Json | OutputFormat::JsonCompact),
            color: output::should_color(&global.color),
            quiet: global.quiet,
            last: Mutex::new(HashMap::new()),
        }
    }

    fn liveness(&self, sensor: &SensorKey, record: &LivenessRecord) {
        let status = record.reported_status();
        let from = {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = last.insert(sensor.clone(), status);
            if previous == Some(status) {
                return;
            }
            previous
        };

        if self.json {
            self.emit(&WatchEvent::Liveness {
                at: utc_now(),
                sensor,
                from,
                to: status,
                data_points: record.data_points,
                error: record.last_error_message.as_deref(),
            });
            return;
        }

        let mut line = format!("{}  {:<28}  ", self.clock(), sensor.to_string());
        if let Some(from) = from {
            let _ = write!(line, "{} → ", output::paint_status(from, self.color));
        }
        line.push_str(&output::paint_status(status, self.color));
        if status == LivenessStatus::Error {
            if let Some(message) = &record.last_error_message {
                let _ = write!(line, "  {}", output::dim(message, self.color));
            }
        }
        output::print_output(&line, self.quiet);
    }

    fn directory(&self, diff: &DirectoryDiff) {
        let added: Vec<&str> = diff.added.iter().map(|d| d.id.as_str()).collect();
        let updated: Vec<&str> = diff.updated.iter().map(|u| u.id.as_str()).collect();

        if self.json {
            self.emit(&WatchEvent::Directory {
                at: utc_now(),
                added,
                updated,
                removed: &diff.removed,
            });
            return;
        }

        let mut line = format!("{}  {:<28} ", self.clock(), "directory");
        for id in added {
            let _ = write!(line, " +{id}");
        }
        for update in &diff.updated {
            let fields: Vec<&str> = update.changed_fields.iter().map(AsRef::as_ref).collect();
            let _ = write!(line, " ~{}({})", update.id, fields.join(","));
        }
        for id in &diff.removed {
            let _ = write!(line, " -{id}");
        }
        output::print_output(&line, self.quiet);
    }

    fn summary(&self, summary: &StatusSummary) {
        if self.json {
            self.emit(&WatchEvent::Summary {
                at: utc_now(),
                summary,
            });
            return;
        }
        let mut line = format!(
            "{}  {}/{} sensors active, {} devices",
            self.clock(),
            summary.active_sensors,
            summary.total_sensors,
            summary.device_count
        );
        if !summary.directory_available {
            line.push_str(", directory unavailable");
        }
        output::print_output(&output::dim(&line, self.color), self.quiet);
    }

    fn emit(&self, event: &WatchEvent<'_>) {
        output::print_output(&output::render_json(event, true), self.quiet);
    }

    fn clock(&self) -> String {
        output::dim(&Local::now().format("%H:%M:%S%.3f").to_string(), self.color)
    }
}

fn utc_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ── Final snapshot ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SensorView {
    sensor: SensorKey,
    status: LivenessStatus,
    data_points: u64,
    consecutive_errors: u32,
    last_error: Option<String>,
}

#[derive(Tabled)]
struct SensorRow {
    #[tabled(rename = "Sensor")]
    sensor: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Points")]
    data_points: u64,
    #[tabled(rename = "Errors")]
    errors: u32,
    #[tabled(rename = "Last error")]
    last_error: String,
}

impl From<&SensorView> for SensorRow {
    fn from(v: &SensorView) -> Self {
        Self {
            sensor: v.sensor.to_string(),
            status: v.status.to_string(),
            data_points: v.data_points,
            errors: v.consecutive_errors,
            last_error: v.last_error.clone().unwrap_or_else(|| "-".into()),
        }
    }
}

fn snapshot(monitor: &Monitor) -> Vec<SensorView> {
    monitor
        .sensors()
        .into_iter()
        .filter_map(|sensor| {
            let record = monitor.liveness(&sensor)?;
            Some(SensorView {
                sensor,
                status: record.reported_status(),
                data_points: record.data_points,
                consecutive_errors: record.consecutive_errors,
                last_error: record.last_error_message,
            })
        })
        .collect()
}

// ── Handler ──────────────────────────────────────────────────────────

pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let monitor_config = config::monitor(global, &args)?;
    info!(
        server = %monitor_config.server.url,
        feeds = monitor_config.feeds.len(),
        directory = monitor_config.watch_directory,
        "starting watch"
    );
    let monitor = Monitor::start(monitor_config)?;
    let printer = Arc::new(EventPrinter::new(global));

    let directory_printer = Arc::clone(&printer);
    let _directory = monitor.subscribe_directory(move |diff| directory_printer.directory(diff));
    let mut followed: HashMap<SensorKey, Subscription> = HashMap::new();
    let mut status = monitor.status_stream();

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let limit = sleep_or_forever(args.duration.map(Duration::from));
    tokio::pin!(limit);

    loop {
        tokio::select! {
            result = &mut interrupt => {
                if let Err(e) = result {
                    warn!(error = %e, "cannot listen for Ctrl-C, stopping");
                }
                break;
            }
            () = &mut limit => break,
            changed = status.changed() => {
                let Some(summary) = changed else { break };
                follow_new_sensors(&monitor, &printer, &mut followed);
                printer.summary(&summary);
            }
        }
    }

    info!("stopping watch");
    monitor.shutdown().await;
    drop(followed);

    let views = snapshot(&monitor);
    let format = if printer.json {
        OutputFormat::JsonCompact
    } else {
        global.output.clone()
    };
    let out = output::render_list(
        &format,
        &views,
        |v| SensorRow::from(v),
        |v| format!("{} {}", v.sensor, v.status),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

/// Subscribe to sensors that appeared since the last call (configured
/// ones on the first summary, learned ones later).
fn follow_new_sensors(
    monitor: &Monitor,
    printer: &Arc<EventPrinter>,
    followed: &mut HashMap<SensorKey, Subscription>,
) {
    for sensor in monitor.sensors() {
        if followed.contains_key(&sensor) {
            continue;
        }
        if let Some(record) = monitor.liveness(&sensor) {
            printer.liveness(&sensor, &record);
        }
        let callback_printer = Arc::clone(printer);
        let key = sensor.clone();
        let subscription =
            monitor.subscribe(&sensor, move |record| callback_printer.liveness(&key, record));
        followed.insert(sensor, subscription);
    }
}

async fn sleep_or_forever(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}
