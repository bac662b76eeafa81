//! Common utility functions for the simulator.
//!
//! This module contains:
//! - Logger initialization
//! - Input and output path validation

use std::error::Error;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use mcl::sim::LogLevel;

/// Build the simulator logger: timestamped lines to stderr, or appended to `log_file`.
fn build_logger(level: LogLevel, log_file: Option<&Path>) -> io::Result<env_logger::Logger> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level.into());
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} {:<5} {}: {}",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });
    if let Some(path) = log_file {
        ensure_parent_dir(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    Ok(builder.build())
}

/// Install the simulator logger as the global `log` backend.
///
/// # Errors
/// Returns an error if the log file cannot be opened or a logger is already installed.
pub fn init_logger(level: LogLevel, log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let logger = build_logger(level, log_file)?;
    let max_level = logger.filter();
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(max_level);
    Ok(())
}

/// Validate that an input path exists and is a regular file.
pub fn validate_input_path(input: &Path) -> Result<(), Box<dyn Error>> {
    if !input.exists() {
        return Err(format!("Input path '{}' does not exist.", input.display()).into());
    }
    if !input.is_file() {
        return Err(format!("Input path '{}' is not a file.", input.display()).into());
    }
    Ok(())
}

/// Validate an output file path, creating its parent directory if needed.
pub fn validate_output_path(output: &Path) -> Result<(), Box<dyn Error>> {
    if output.is_dir() {
        return Err(format!("Output path '{}' is a directory.", output.display()).into());
    }
    ensure_parent_dir(output)?;
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
