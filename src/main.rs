mod commands;

use std::path::PathBuf;

use clap::Parser;

/// Manage your Lithium licenses.
#[derive(Parser, Debug)]
#[command(name = "litmus", version, about)]
struct Cli {
    /// The path under which licenses are stored.
    #[arg(
        long = "license-path",
        env = "LITHIUM_LICENSE_PATH",
        default_value = "./.lithium",
        global = true
    )]
    license_path: PathBuf,

    #[command(subcommand)]
    command: commands::Commands,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = commands::run(cli.command, &cli.license_path) {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}
