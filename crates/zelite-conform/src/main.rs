#![forbid(unsafe_code)]

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "zelite-conform",
    about = "Run zelite conformance scenarios against a simulated driver"
)]
struct Args {
    /// Print the selected scenario names and exit.
    #[arg(long)]
    list: bool,

    /// Only run scenarios whose name or area contains this substring (case-insensitive).
    #[arg(long)]
    filter: Option<String>,

    /// JSON driver config. Without it, `ZELITE_*` environment variables apply.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print a JSON report on stdout instead of text.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(Args::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("zelite-conform: {err:#}");
            ExitCode::from(2)
        }
    }
}

/// Returns whether every selected scenario passed.
fn run(args: Args) -> Result<bool> {
    let selected = zelite_conform::select(args.filter.as_deref());
    if selected.is_empty() {
        bail!(
            "no scenarios match filter {:?}",
            args.filter.unwrap_or_default()
        );
    }

    let mut stdout = std::io::stdout().lock();
    if args.list {
        for scenario in &selected {
            writeln!(stdout, "{:<10} {}", scenario.area, scenario.name)?;
        }
        return Ok(true);
    }

    let config = zelite_conform::load_config(args.config.as_deref())?;
    tracing::info!(
        scenarios = selected.len(),
        devices = config.device_count,
        "running conformance scenarios"
    );
    let report = zelite_conform::run(&config, &selected);

    if args.json {
        let json = report.to_json_pretty().context("failed to encode report")?;
        writeln!(stdout, "{json}")?;
    } else {
        write!(stdout, "{}", report.render_text())?;
    }
    Ok(report.all_passed())
}
