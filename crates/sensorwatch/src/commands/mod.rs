//! Command dispatch: bridges CLI args -> core calls -> output formatting.

pub mod config_cmd;
pub mod devices;
pub mod sensors;
pub mod watch;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Watch(args) => watch::handle(args, global).await,
        Command::Devices => devices::handle(global).await,
        Command::Sensors(args) => sensors::handle(args, global).await,
        Command::Config(args) => config_cmd::handle(&args, global),
    }
}
