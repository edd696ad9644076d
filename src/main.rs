mod config;
mod error;
mod serve;

use std::net::UdpSocket;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;

use crate::error::Result;

#[derive(clap::Parser, Clone)]
struct Args {
    /// Path to the namespace config file (SPEC_FULL.md §4.6).
    #[clap(long = "config")]
    config: PathBuf,

    /// Run for this many seconds then exit cleanly. Omit to run until killed.
    #[clap(long = "deadline-secs")]
    deadline_secs: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = config::Config::load(&args.config)?;

    let sockets = config
        .listen
        .iter()
        .map(UdpSocket::bind)
        .collect::<std::io::Result<Vec<_>>>()?;

    let deadline = absolute_deadline(args.deadline_secs, Utc::now().timestamp() as f64);

    log::info!(
        "serving {} table(s) on {} socket(s)",
        config.namespace.len(),
        sockets.len()
    );

    serve::serve(Arc::new(config.namespace), sockets, deadline)
}

/// Turns `--deadline-secs` into the absolute deadline `serve` expects
/// (SPEC_FULL.md §4.7): `now + secs`, or no deadline (`f64::INFINITY`) when
/// omitted.
fn absolute_deadline(deadline_secs: Option<u64>, now: f64) -> f64 {
    match deadline_secs {
        Some(secs) => now + secs as f64,
        None => f64::INFINITY,
    }
}
