//! Offline runs and data files for landmark localization.
//!
//! This module provides:
//! - CSV records for wheel encoder controls, landmark detections and the landmark map
//! - [SimulationConfig] that can be read from and written to JSON, YAML or TOML files
//! - [run_particle_filter] which replays recorded data through a [ParticleFilter]
//! - [FilterResult] for storing per-step estimates (and optionally the particles) as CSV
//! - [run_histogram_filter] for the one-dimensional discrete Bayes filter demo
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::FilterError;
use crate::histogram::{Distribution, HistogramFilter};
use crate::particle::{FilterConfig, ParticleFilter};
use crate::{Control, Landmark, Measurement, Pose};

fn read_records<T: DeserializeOwned, P: AsRef<Path>>(
    path: P,
) -> Result<Vec<T>, Box<dyn std::error::Error>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let record: T = result?;
        records.push(record);
    }
    Ok(records)
}

fn write_records<T: Serialize, P: AsRef<Path>>(records: &[T], path: P) -> io::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Wheel encoder increments recorded during one step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlRecord {
    /// Step index; detections with the same index are processed after this control
    pub step: usize,
    /// Left wheel encoder ticks since the previous step
    pub left_ticks: f64,
    /// Right wheel encoder ticks since the previous step
    pub right_ticks: f64,
}
impl ControlRecord {
    /// Reads a CSV file with the columns `step,left_ticks,right_ticks`.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>, Box<dyn std::error::Error>> {
        read_records(path)
    }
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> io::Result<()> {
        write_records(records, path)
    }
    /// Wheel travel in millimeters.
    pub fn control(&self, ticks_to_mm: f64) -> Control {
        Control::from_ticks(self.left_ticks, self.right_ticks, ticks_to_mm)
    }
}

/// One landmark detection (range in millimeters, bearing in radians relative to the heading).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub step: usize,
    pub range: f64,
    pub bearing: f64,
}
impl DetectionRecord {
    /// Reads a CSV file with the columns `step,range,bearing`.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>, Box<dyn std::error::Error>> {
        read_records(path)
    }
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> io::Result<()> {
        write_records(records, path)
    }
    pub fn measurement(&self) -> Result<Measurement, FilterError> {
        Measurement::try_from(&[self.range, self.bearing][..])
    }
}

/// A landmark of the map.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LandmarkRecord {
    pub x: f64,
    pub y: f64,
}
impl LandmarkRecord {
    /// Reads a CSV file with the columns `x,y`.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>, Box<dyn std::error::Error>> {
        read_records(path)
    }
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> io::Result<()> {
        write_records(records, path)
    }
}
impl TryFrom<&LandmarkRecord> for Landmark {
    type Error = FilterError;
    fn try_from(record: &LandmarkRecord) -> Result<Self, Self::Error> {
        Landmark::try_from(&[record.x, record.y][..])
    }
}

/// Log verbosity as written in configuration files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}
impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    /// Log file path; logs go to stderr when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Parameters of the one-dimensional histogram filter demo.
///
/// The robot starts exactly at `start_position` and moves `movement` cells per step. Movement
/// uncertainty and measurement uncertainty are triangles with the given half widths; the
/// measurements are the true positions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramConfig {
    pub start_position: i64,
    pub movement: i64,
    pub movement_half_width: usize,
    pub measurement_half_width: usize,
    pub steps: usize,
}
impl Default for HistogramConfig {
    fn default() -> Self {
        HistogramConfig {
            start_position: 10,
            movement: 20,
            movement_half_width: 10,
            measurement_half_width: 30,
            steps: 10,
        }
    }
}

/// Complete description of an offline localization run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// CSV file of [ControlRecord]s
    pub controls: String,
    /// CSV file of [DetectionRecord]s
    pub detections: String,
    /// CSV file of [LandmarkRecord]s
    pub landmarks: String,
    /// CSV file the per-step estimates are written to
    pub output: String,
    /// Optional CSV file for the particle population after every step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub particles_output: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub histogram: HistogramConfig,
}
impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            controls: "data/controls.csv".to_string(),
            detections: "data/detections.csv".to_string(),
            landmarks: "data/landmarks.csv".to_string(),
            output: "output/estimates.csv".to_string(),
            particles_output: None,
            logging: LoggingConfig::default(),
            filter: FilterConfig::default(),
            histogram: HistogramConfig::default(),
        }
    }
}
impl SimulationConfig {
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_yaml::to_writer(file, self).map_err(io::Error::other)
    }
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let text = toml::to_string_pretty(self).map_err(io::Error::other)?;
        std::fs::write(path, text)
    }
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(io::Error::other)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        let ext = p
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());
        match ext.as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        let ext = p
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());
        match ext.as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
}

/// Filter output after one predict/correct cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct StepResult {
    pub step: usize,
    /// Mean pose of the population
    pub estimate: Pose,
    /// Scanner position of the mean pose
    pub scanner: (f64, f64),
    /// Assignments over all particles in this step's correction
    pub num_assigned: usize,
    /// `false` when the correction was skipped because every weight vanished
    pub resampled: bool,
    /// Particle population after the step, when requested
    pub particles: Option<Vec<Pose>>,
}

/// Per-step estimates of a particle filter run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterResult {
    pub steps: Vec<StepResult>,
}
impl FilterResult {
    pub fn new() -> Self {
        FilterResult { steps: Vec::new() }
    }

    /// Writes one row per step: `step,x,y,heading,scanner_x,scanner_y,num_assigned,resampled`.
    ///
    /// Heading is written in radians.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        writeln!(file, "step,x,y,heading,scanner_x,scanner_y,num_assigned,resampled")?;
        for row in self.steps.iter() {
            writeln!(
                file,
                "{},{:.6},{:.6},{:.9},{:.6},{:.6},{},{}",
                row.step,
                row.estimate.x,
                row.estimate.y,
                row.estimate.heading,
                row.scanner.0,
                row.scanner.1,
                row.num_assigned,
                row.resampled
            )?;
        }
        Ok(())
    }

    /// Writes every stored particle as `step,index,x,y,heading`. Steps without stored particles
    /// are skipped.
    pub fn particles_to_csv<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        writeln!(file, "step,index,x,y,heading")?;
        for row in self.steps.iter() {
            let Some(particles) = row.particles.as_ref() else {
                continue;
            };
            for (index, p) in particles.iter().enumerate() {
                writeln!(file, "{},{},{:.6},{:.6},{:.9}", row.step, index, p.x, p.y, p.heading)?;
            }
        }
        Ok(())
    }

    /// Reads a file written by [FilterResult::to_csv]. Particles are not restored.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let file = File::open(path)?;
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(file);
        let mut result = FilterResult::new();
        for record in rdr.records() {
            let record = record?;
            if record.len() < 8 {
                return Err("CSV record doesn't have enough fields".into());
            }
            result.steps.push(StepResult {
                step: record[0].parse()?,
                estimate: Pose {
                    x: record[1].parse()?,
                    y: record[2].parse()?,
                    heading: record[3].parse()?,
                },
                scanner: (record[4].parse()?, record[5].parse()?),
                num_assigned: record[6].parse()?,
                resampled: record[7].parse()?,
                particles: None,
            });
        }
        Ok(result)
    }

    pub fn last(&self) -> Option<&StepResult> {
        self.steps.last()
    }
}

/// Group detections by step, rejecting non-finite values.
pub fn group_detections(
    detections: &[DetectionRecord],
) -> Result<BTreeMap<usize, Vec<Measurement>>, FilterError> {
    let mut grouped: BTreeMap<usize, Vec<Measurement>> = BTreeMap::new();
    for record in detections {
        grouped
            .entry(record.step)
            .or_default()
            .push(record.measurement()?);
    }
    Ok(grouped)
}

/// Replay recorded controls and detections through a particle filter.
///
/// Each control record triggers one prediction followed by one correction with the detections of
/// the same step (possibly none). A correction whose weights all vanish is skipped and the
/// predicted population is kept; every other error aborts the run.
pub fn run_particle_filter(
    config: &FilterConfig,
    controls: &[ControlRecord],
    detections: &[DetectionRecord],
    landmarks: &[Landmark],
    keep_particles: bool,
) -> Result<FilterResult, FilterError> {
    let mut filter = ParticleFilter::from_config(config)?;
    let association = config.association();
    let mut grouped = group_detections(detections)?;
    info!(
        "Running particle filter: {} particles, {} steps, {} detections, {} landmarks",
        filter.num_particles(),
        controls.len(),
        detections.len(),
        landmarks.len()
    );
    let mut result = FilterResult::new();
    let mut skipped = 0usize;
    for record in controls {
        filter.predict(&record.control(config.ticks_to_mm))?;
        let measurements = grouped.remove(&record.step).unwrap_or_default();
        let (weights, summary) = filter.score(&measurements, landmarks, &association);
        let resampled = match filter.resample(&weights) {
            Ok(()) => true,
            Err(e @ FilterError::DegenerateWeights { .. }) => {
                debug!("Step {}: {e}", record.step);
                skipped += 1;
                false
            }
            Err(e) => return Err(e),
        };
        let estimate = filter.estimate()?;
        debug!("Step {}: {}", record.step, estimate);
        result.steps.push(StepResult {
            step: record.step,
            estimate,
            scanner: estimate.scanner_position(config.scanner_displacement),
            num_assigned: summary.total_assignments,
            resampled,
            particles: keep_particles.then(|| filter.particles().to_vec()),
        });
    }
    if !grouped.is_empty() {
        warn!(
            "Ignored detections for {} step(s) without a control record",
            grouped.len()
        );
    }
    if skipped > 0 {
        warn!("Skipped {skipped} correction(s) with degenerate weights");
    }
    if let Some(last) = result.last() {
        info!("Final estimate after step {}: {}", last.step, last.estimate);
    }
    Ok(result)
}

/// Run the histogram filter demo and return the belief after every step.
pub fn run_histogram_filter(config: &HistogramConfig) -> Result<Vec<Distribution>, FilterError> {
    let movement = Distribution::triangle(config.movement, config.movement_half_width)?;
    let mut filter = HistogramFilter::new(Distribution::unit_pulse(config.start_position));
    let mut position = config.start_position;
    let mut beliefs = Vec::with_capacity(config.steps);
    for _ in 0..config.steps {
        position += config.movement;
        filter.predict(&movement);
        filter.correct(&Distribution::triangle(position, config.measurement_half_width)?)?;
        beliefs.push(filter.belief().clone());
    }
    info!(
        "Histogram filter finished {} steps, final mean {:.2}",
        config.steps,
        filter.belief().mean()?
    );
    Ok(beliefs)
}

/// Writes histogram beliefs as `step,position,probability` rows.
pub fn histogram_to_csv<P: AsRef<Path>>(beliefs: &[Distribution], path: P) -> io::Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "step,position,probability")?;
    for (step, belief) in beliefs.iter().enumerate() {
        for (i, probability) in belief.values().iter().enumerate() {
            writeln!(file, "{},{},{:.9}", step, belief.start() + i as i64, probability)?;
        }
    }
    Ok(())
}
