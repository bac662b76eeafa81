//! MCL SIM: replay recorded robot data through a landmark-based particle filter.
//!
//! The particle filter mode reads three CSV files (wheel encoder controls, landmark detections and
//! the landmark map), runs one predict/correct cycle per control record, and writes the estimated
//! pose of every step. The histogram mode runs the one-dimensional discrete Bayes filter demo.
//!
//! You can run simulations either by:
//!   1. Loading all parameters from a configuration file (TOML/JSON/YAML)
//!   2. Specifying parameters via command-line flags

mod common;

use clap::{Args, Parser, Subcommand};
use common::{init_logger, validate_input_path, validate_output_path};
use log::{error, info};
use std::error::Error;
use std::path::{Path, PathBuf};

use mcl::Landmark;
use mcl::particle::FilterConfig;
use mcl::sim::{
    ControlRecord, DetectionRecord, HistogramConfig, LandmarkRecord, LogLevel, SimulationConfig,
    histogram_to_csv, run_histogram_filter, run_particle_filter,
};

const LONG_ABOUT: &str = "MCL SIM: replay recorded robot data through a landmark particle filter.

The particle filter mode (pf) reads wheel encoder controls, landmark detections and the landmark
map from CSV files and writes the estimated pose after every step. The histogram mode (hist) runs a
one-dimensional discrete Bayes filter demo.

You can run simulations either by:
  1. Loading all parameters from a configuration file (TOML/JSON/YAML)
  2. Specifying parameters via command-line flags";

const PF_LONG_ABOUT: &str = "Run the landmark particle filter over recorded controls and detections.

Every control record triggers one prediction followed by one correction with the detections of the
same step. Filter parameters not given on the command line take their default values.";

const HIST_LONG_ABOUT: &str = "Run a one-dimensional discrete Bayes filter.

A robot starting at a known cell moves a fixed distance per step with triangular movement noise
and measures its position with triangular measurement noise.";

/// Command line arguments
#[derive(Parser)]
#[command(
    author,
    version,
    about = "Landmark-based Monte Carlo localization simulator.",
    long_about = LONG_ABOUT
)]
struct Cli {
    /// Load parameters from a configuration file (TOML/JSON/YAML)
    /// Runs the histogram demo with `hist`, otherwise the particle filter; flags are ignored
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    command: Option<Command>,

    /// Log level
    #[arg(long, value_enum, default_value_t = LogLevel::Info, global = true)]
    log_level: LogLevel,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

/// Top-level commands
#[derive(Subcommand, Clone)]
enum Command {
    #[command(
        name = "pf",
        about = "Run the landmark particle filter",
        long_about = PF_LONG_ABOUT
    )]
    ParticleFilter(PfArgs),
    #[command(
        name = "hist",
        about = "Run the 1-D histogram filter demo",
        long_about = HIST_LONG_ABOUT
    )]
    Histogram(HistArgs),
    #[command(
        name = "config",
        about = "Write a configuration file with default values"
    )]
    CreateConfig(CreateConfigArgs),
}

/// Particle filter input, output and filter overrides
#[derive(Args, Clone, Debug)]
struct PfArgs {
    /// CSV file with columns step,left_ticks,right_ticks
    #[arg(long, value_parser)]
    controls: PathBuf,

    /// CSV file with columns step,range,bearing
    #[arg(long, value_parser)]
    detections: PathBuf,

    /// CSV file with columns x,y
    #[arg(long, value_parser)]
    landmarks: PathBuf,

    /// Output CSV file for the per-step estimates
    #[arg(short, long, value_parser)]
    output: PathBuf,

    /// Optional output CSV file for the particles after every step
    #[arg(long, value_parser)]
    particles: Option<PathBuf>,

    /// Number of particles
    #[arg(long)]
    num_particles: Option<usize>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Compute particle weights on all cores
    #[arg(long)]
    parallel: bool,
}

#[derive(Args, Clone, Debug)]
struct HistArgs {
    /// Optional output CSV file (step,position,probability)
    #[arg(short, long, value_parser)]
    output: Option<PathBuf>,

    /// Known start cell
    #[arg(long, default_value_t = 10)]
    start: i64,

    /// Cells moved per step
    #[arg(long, default_value_t = 20)]
    movement: i64,

    /// Half width of the triangular movement distribution
    #[arg(long, default_value_t = 10)]
    movement_half_width: usize,

    /// Half width of the triangular measurement distribution
    #[arg(long, default_value_t = 30)]
    measurement_half_width: usize,

    /// Number of steps
    #[arg(long, default_value_t = 10)]
    steps: usize,
}

#[derive(Args, Clone, Debug)]
struct CreateConfigArgs {
    /// Output configuration file (.toml, .json, .yaml or .yml)
    #[arg(short, long, value_parser)]
    output: PathBuf,
}

/// Load inputs, run the particle filter, and write the results.
fn run_pf(
    filter: &FilterConfig,
    controls: &Path,
    detections: &Path,
    landmarks: &Path,
    output: &Path,
    particles: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    validate_input_path(controls)?;
    validate_input_path(detections)?;
    validate_input_path(landmarks)?;
    validate_output_path(output)?;
    if let Some(particles) = particles {
        validate_output_path(particles)?;
    }

    let control_records = ControlRecord::from_csv(controls)?;
    info!("Read {} control records from {}", control_records.len(), controls.display());
    let detection_records = DetectionRecord::from_csv(detections)?;
    info!("Read {} detections from {}", detection_records.len(), detections.display());
    let landmark_map = LandmarkRecord::from_csv(landmarks)?
        .iter()
        .map(Landmark::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    info!("Read {} landmarks from {}", landmark_map.len(), landmarks.display());

    let result = run_particle_filter(
        filter,
        &control_records,
        &detection_records,
        &landmark_map,
        particles.is_some(),
    )?;

    result.to_csv(output)?;
    info!("Estimates written to {}", output.display());
    if let Some(particles) = particles {
        result.particles_to_csv(particles)?;
        info!("Particles written to {}", particles.display());
    }
    Ok(())
}

fn run_particle_filter_cli(args: &PfArgs) -> Result<(), Box<dyn Error>> {
    let defaults = FilterConfig::default();
    let filter = FilterConfig {
        num_particles: args.num_particles.unwrap_or(defaults.num_particles),
        seed: args.seed.unwrap_or(defaults.seed),
        parallel_weights: args.parallel,
        ..defaults
    };
    info!("Running particle filter with {} particles (seed {})", filter.num_particles, filter.seed);
    run_pf(
        &filter,
        &args.controls,
        &args.detections,
        &args.landmarks,
        &args.output,
        args.particles.as_deref(),
    )
}

fn run_from_config(config: &SimulationConfig) -> Result<(), Box<dyn Error>> {
    info!("Running particle filter from configuration");
    run_pf(
        &config.filter,
        Path::new(&config.controls),
        Path::new(&config.detections),
        Path::new(&config.landmarks),
        Path::new(&config.output),
        config.particles_output.as_deref().map(Path::new),
    )
}

impl From<&HistArgs> for HistogramConfig {
    fn from(args: &HistArgs) -> Self {
        HistogramConfig {
            start_position: args.start,
            movement: args.movement,
            movement_half_width: args.movement_half_width,
            measurement_half_width: args.measurement_half_width,
            steps: args.steps,
        }
    }
}

fn run_histogram(config: &HistogramConfig, output: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let beliefs = run_histogram_filter(config)?;
    for (step, belief) in beliefs.iter().enumerate() {
        println!(
            "step {:>3}: support [{}, {}], mean {:.3}",
            step,
            belief.start(),
            belief.stop(),
            belief.mean()?
        );
    }
    if let Some(output) = output {
        validate_output_path(output)?;
        histogram_to_csv(&beliefs, output)?;
        info!("Histogram beliefs written to {}", output.display());
    }
    Ok(())
}

/// Run the command selected together with `--config` using the file's parameters.
fn run_with_config(
    config: &SimulationConfig,
    command: Option<&Command>,
) -> Result<(), Box<dyn Error>> {
    match command {
        Some(Command::Histogram(args)) => {
            info!("Running histogram filter from configuration");
            run_histogram(&config.histogram, args.output.as_deref())
        }
        _ => run_from_config(config),
    }
}

fn create_config_file(args: &CreateConfigArgs) -> Result<(), Box<dyn Error>> {
    validate_output_path(&args.output)?;
    SimulationConfig::default().to_file(&args.output)?;
    println!("Configuration written to {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if let Some(ref config_path) = cli.config {
        let config = SimulationConfig::from_file(config_path)?;
        // A log file given on the command line wins over the configured one.
        let config_log_file = config.logging.file.as_ref().map(PathBuf::from);
        let log_file = cli.log_file.as_ref().or(config_log_file.as_ref());
        init_logger(config.logging.level, log_file.map(PathBuf::as_path))?;
        return run_with_config(&config, cli.command.as_ref()).inspect_err(|e| error!("{e}"));
    }

    init_logger(cli.log_level, cli.log_file.as_deref())?;

    let result = match cli.command {
        Some(Command::ParticleFilter(args)) => run_particle_filter_cli(&args),
        Some(Command::Histogram(args)) => {
            run_histogram(&HistogramConfig::from(&args), args.output.as_deref())
        }
        Some(Command::CreateConfig(args)) => create_config_file(&args),
        None => {
            eprintln!("Error: No command provided. Use -h or --help for usage information.");
            std::process::exit(1);
        }
    };
    result.inspect_err(|e| error!("{e}"))
}
