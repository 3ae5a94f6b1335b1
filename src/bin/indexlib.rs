//! indexlib CLI binary.

use std::process;

use clap::Parser;
use indexlib::cli::{IndexlibArgs, execute_command};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let args = IndexlibArgs::parse();

    // RUST_LOG overrides the verbosity flags
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = execute_command(args) {
        let info = e.error_info();
        eprintln!("{}", serde_json::to_string(&info)?);
        process::exit(1);
    }
    Ok(())
}
