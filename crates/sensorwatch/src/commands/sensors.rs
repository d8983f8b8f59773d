//! `sensors`: one-shot status of one device's sensors.

use std::time::Duration;

use serde::Serialize;
use tabled::Tabled;

use sensorwatch_core::SensorStatus;
use sensorwatch_core::query::fetch_sensor_status;

use crate::cli::{GlobalOpts, SensorsArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

/// Serializable view of one sensor's server-side status.
#[derive(Debug, Serialize)]
struct SensorView {
    sensor: String,
    has_data: bool,
    data_points: u64,
    seconds_since_update: Option<f64>,
    is_recent: bool,
}

impl SensorView {
    fn new(sensor: String, status: &SensorStatus) -> Self {
        Self {
            sensor,
            has_data: status.has_data,
            data_points: status.data_points,
            seconds_since_update: status.time_since_last_update,
            is_recent: status.is_recent,
        }
    }
}

#[derive(Tabled)]
struct SensorRow {
    #[tabled(rename = "Sensor")]
    sensor: String,
    #[tabled(rename = "Data")]
    has_data: String,
    #[tabled(rename = "Points")]
    data_points: u64,
    #[tabled(rename = "Last update")]
    last_update: String,
    #[tabled(rename = "Recent")]
    recent: String,
}

impl From<&SensorView> for SensorRow {
    fn from(s: &SensorView) -> Self {
        Self {
            sensor: s.sensor.clone(),
            has_data: yes_no(s.has_data),
            data_points: s.data_points,
            last_update: s
                .seconds_since_update
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .map_or_else(|| "-".into(), format_age),
            recent: yes_no(s.is_recent),
        }
    }
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.into()
}

/// Age rounded to milliseconds, e.g. "1s 250ms ago".
fn format_age(age: Duration) -> String {
    let rounded = Duration::from_millis(u64::try_from(age.as_millis()).unwrap_or(u64::MAX));
    format!("{} ago", humantime::format_duration(rounded))
}

pub async fn handle(args: SensorsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let server = config::server(global)?;
    let statuses = fetch_sensor_status(&server, &args.device).await?;
    let views: Vec<SensorView> = statuses
        .into_iter()
        .map(|(sensor, status)| SensorView::new(sensor, &status))
        .collect();

    let out = output::render_list(
        &global.output,
        &views,
        |s| SensorRow::from(s),
        |s| s.sensor.clone(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_is_rounded_to_millis() {
        assert_eq!(format_age(Duration::from_secs_f64(1.25049)), "1s 250ms ago");
    }
}
