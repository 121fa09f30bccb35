//! `bandrot` - rotate a plain-text graymap across a group of workers.
//!
//! ```text
//! bandrot 30
//! bandrot -45 --input scan.pgm --workers 8 --png preview.png
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use bandrot_core::driver::{self, RotateConfig, DEFAULT_INPUT};
use bandrot_core::{GatherMode, SamplingConvention};
use clap::{ArgAction, Parser, ValueEnum};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "bandrot", version)]
#[command(about = "Rotate a plain-text graymap, splitting the work into row bands")]
struct Cli {
    /// Rotation angle in degrees (positive = counter-clockwise)
    #[arg(allow_negative_numbers = true)]
    angle: f64,

    /// Source graymap
    #[arg(long, default_value = DEFAULT_INPUT)]
    input: PathBuf,

    /// Destination graymap (default: rotated_<input name> next to the input)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Number of workers (default: one per available core)
    #[arg(long, short = 'n')]
    workers: Option<usize>,

    /// Give up on a silent worker after this many milliseconds
    #[arg(long, conflicts_with = "no_timeout")]
    timeout_ms: Option<u64>,

    /// Wait for workers indefinitely
    #[arg(long)]
    no_timeout: bool,

    /// How bands are collected at the coordinator
    #[arg(long, value_enum, default_value_t = GatherArg::Ragged)]
    gather: GatherArg,

    /// Pixel sampling convention
    #[arg(long, value_enum, default_value_t = SamplingArg::Center)]
    sampling: SamplingArg,

    /// Also write a PNG preview of the result
    #[arg(long)]
    png: Option<PathBuf>,

    /// Print the run report as JSON instead of the elapsed time
    #[arg(long)]
    json: bool,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum GatherArg {
    /// Send only valid rows, placed by offset
    Ragged,
    /// Send full-capacity bands, truncate the padding
    Fixed,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SamplingArg {
    /// Sample at pixel centers
    Center,
    /// Integer centers with truncation, as the original batch tool did
    Legacy,
}

impl Cli {
    fn to_config(&self) -> RotateConfig {
        let mut config = RotateConfig::new(self.angle);
        config.input = self.input.clone();
        config.output = self.output.clone();
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.no_timeout {
            config.collective_timeout_ms = None;
        } else if let Some(ms) = self.timeout_ms {
            config.collective_timeout_ms = Some(ms);
        }
        config.gather = match self.gather {
            GatherArg::Ragged => GatherMode::Ragged,
            GatherArg::Fixed => GatherMode::FixedCapacity,
        };
        config.sampling = match self.sampling {
            SamplingArg::Center => SamplingConvention::PixelCenter,
            SamplingArg::Legacy => SamplingConvention::Legacy,
        };
        config.png_preview = self.png.clone();
        config
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.to_config();
    let report = driver::run(&config)
        .with_context(|| format!("failed to rotate {}", config.input.display()))?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Execution time: {:.6} seconds", report.elapsed_seconds);
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
