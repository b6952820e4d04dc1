pub mod compute;
pub mod config;
pub mod partition;
pub mod pipeline;
pub mod report;
pub mod store;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{Backend, Config};

/// Per-key min/mean/max over a `key;value` file, aggregated in parallel.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Input file, one `key;value` record per line
    path: PathBuf,
    /// How workers read their part of the file
    #[arg(long, value_enum, default_value_t = Backend::Mmap)]
    backend: Backend,
}

fn main() -> Result<()> {
    // stdout only ever gets the summary line, everything else goes to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    let begin = std::time::Instant::now();

    let config = Config::for_this_machine(args.backend);
    info!(
        workers = config.workers,
        shards = config.shards,
        backend = ?config.backend,
        "aggregating {}",
        args.path.display()
    );

    let (store, summary) = pipeline::aggregate_file(&args.path, &config)?;
    let begin_summarize = std::time::Instant::now();
    let out = report::format_summary(&store.snapshot());
    println!("{out}");

    let end = std::time::Instant::now();
    info!(
        lines = summary.lines,
        skipped = summary.skipped,
        keys = summary.keys,
        "elapsed: {}ms (summary only: {}ms)",
        (end - begin).as_millis(),
        (end - begin_summarize).as_millis()
    );
    Ok(())
}
