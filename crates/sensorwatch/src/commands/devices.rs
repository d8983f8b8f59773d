//! `devices`: one-shot directory listing.

use tabled::Tabled;

use sensorwatch_core::DeviceRecord;
use sensorwatch_core::query::fetch_directory;

use crate::cli::GlobalOpts;
use crate::config;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Connected")]
    connected_at: String,
    #[tabled(rename = "Sensors")]
    sensors: String,
}

impl From<&DeviceRecord> for DeviceRow {
    fn from(d: &DeviceRecord) -> Self {
        let sensors = match (d.active_sensor_count, d.sensor_count) {
            (Some(active), Some(total)) => format!("{active}/{total}"),
            (None, Some(total)) => total.to_string(),
            _ => "-".into(),
        };
        Self {
            id: d.id.clone(),
            name: d.name.clone().unwrap_or_else(|| "-".into()),
            connected_at: d.connected_at.clone().unwrap_or_else(|| "-".into()),
            sensors,
        }
    }
}

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let server = config::server(global)?;
    let directory = fetch_directory(&server).await?;
    let devices: Vec<DeviceRecord> = directory.into_values().collect();

    let out = output::render_list(
        &global.output,
        &devices,
        |d| DeviceRow::from(d),
        |d| d.id.clone(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
