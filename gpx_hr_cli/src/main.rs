use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueHint};
use gpx_hr::{process, Params, Statistics, DEFAULT_ACCEPTANCE_WINDOW_S};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Merge heart-rate samples into the track points of a GPX file", long_about = None)]
struct Cli {
    /// GPX track to read
    #[arg(value_hint = ValueHint::FilePath)]
    track: PathBuf,

    /// Heart-rate export (Mi Band Tools CSV or Notify Fitness)
    #[arg(value_hint = ValueHint::FilePath)]
    heart_rates: PathBuf,

    /// GPX file to write
    #[arg(value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Maximum heart rate, used to derive zones for exports that carry none
    max_heart_rate: Option<u32>,

    /// Largest gap in seconds between a track point and a sample
    #[arg(long = "max-gap", value_name = "SECONDS", default_value_t = DEFAULT_ACCEPTANCE_WINDOW_S)]
    max_gap: u32,

    /// Also write the statistics as JSON
    #[arg(long, value_hint = ValueHint::FilePath)]
    stats: Option<PathBuf>,

    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

impl Cli {
    fn params(&self) -> Params {
        let mut params = Params::default();
        if let Some(max) = self.max_heart_rate {
            params.max_heart_rate = max;
        }
        params.acceptance_window_s = self.max_gap;
        params
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let stats = run(&cli)?;
    println!("Processed: {}/{}", stats.succeeded, stats.total());
    Ok(())
}

fn run(cli: &Cli) -> Result<Statistics> {
    let params = cli.params();
    let started = Instant::now();

    let track = open(&cli.track)?;
    let heart_rates = open(&cli.heart_rates)?;
    let output = File::create(&cli.output)
        .with_context(|| format!("failed to create {}", cli.output.display()))?;

    let stats = process(track, heart_rates, BufWriter::new(output), &params).with_context(|| {
        format!(
            "failed to merge {} into {}",
            cli.heart_rates.display(),
            cli.track.display()
        )
    })?;
    info!(
        output = %cli.output.display(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "wrote track"
    );

    if let Some(path) = &cli.stats {
        write_stats(path, &stats)?;
    }
    Ok(stats)
}

fn open(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(BufReader::new(file))
}

fn write_stats(path: &Path, stats: &Statistics) -> Result<()> {
    let text = serde_json::to_string_pretty(stats)?;
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    info!("wrote statistics to {}", path.display());
    Ok(())
}
