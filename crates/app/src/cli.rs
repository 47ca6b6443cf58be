use anyhow::Result;
use clap::{Parser, Subcommand};
use monitor::{MonitorCliArgs, MonitorConfig};

use crate::serve;

#[derive(Debug, Parser)]
#[command(name = "robowatch", about = "Fall monitoring for a robot-mounted camera", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the processing loop and the HTTP preview/event server.
    Serve(MonitorCliArgs),
}

pub fn handle_command(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve(args) => serve::run(MonitorConfig::try_from(args)?),
    }
}
