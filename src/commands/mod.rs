//! Subcommands for the `litmus` command line tool.

pub mod application;

use std::path::Path;

use anyhow::Result;
use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage configuration and licensing of an application.
    #[command(subcommand, visible_alias = "app")]
    Application(application::ApplicationCommand),
}

pub fn run(command: Commands, license_path: &Path) -> Result<()> {
    match command {
        Commands::Application(command) => application::run(command, license_path),
    }
}
