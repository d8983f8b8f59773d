//! Config subcommand handlers.

use sensorwatch_config::{Config, save_config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::config;
use crate::error::CliError;
use crate::output;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Show => show(global),
        ConfigCommand::Path => {
            output::print_output(&config::path(global).display().to_string(), global.quiet);
            Ok(())
        }
        ConfigCommand::Init { force } => init(global, force),
    }
}

/// Effective configuration: file, environment and flags merged.
fn show(global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load(global)?;
    let out = match global.output {
        OutputFormat::Json => output::render_json(&cfg, false),
        OutputFormat::JsonCompact => output::render_json(&cfg, true),
        OutputFormat::Table | OutputFormat::Plain => toml::to_string_pretty(&cfg)?,
    };
    output::print_output(out.trim_end(), global.quiet);
    Ok(())
}

fn init(global: &GlobalOpts, force: bool) -> Result<(), CliError> {
    let path = config::path(global);
    if path.exists() && !force {
        return Err(CliError::ConfigExists {
            path: path.display().to_string(),
        });
    }
    let url = global.server.clone().ok_or_else(|| CliError::NoServer {
        path: path.display().to_string(),
    })?;

    let mut cfg = Config::default();
    cfg.server.url = Some(url);
    cfg.server.insecure = global.insecure;
    // Validates the URL and every default before anything is written.
    cfg.to_monitor_config()?;

    save_config(&cfg, &path)?;
    tracing::info!(path = %path.display(), "config written");
    output::print_output(&format!("Wrote {}", path.display()), global.quiet);
    Ok(())
}
