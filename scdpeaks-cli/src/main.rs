//! scdpeaks command-line interface.
//!
//! Predicts peaks from an orientation matrix, projects event-mode data onto
//! per-peak profiles, fits them, and writes and merges reflection files.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{Parser, Subcommand};
use log::{debug, info, warn, LevelFilter};
use scdpeaks_algorithms::{
    EventProjector, HklIndex, PeakPredictor, PeakShapeFitter, PredictionStatistics,
    ProjectionStatistics,
};
use scdpeaks_core::{CandidatePeak, HklBounds, ProfileSet, ReductionConfig};
use scdpeaks_io::{
    merge_files, write_reflection_file, EventFileReader, OrientationFile, ReflectionFile,
    ReflectionWriter,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    ScdpeaksIo(#[from] scdpeaks_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] scdpeaks_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("no {0} given (pass it as an argument or set it in the configuration)")]
    MissingInput(&'static str),
}

/// Event-mode peak integration for single-crystal neutron diffraction.
#[derive(Parser)]
#[command(name = "scdpeaks")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Reduction configuration (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Worker threads (defaults to one per core)
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Predict the peaks that reach the detectors
    Predict {
        /// Orientation matrix file
        #[arg(short, long)]
        matrix: Option<PathBuf>,

        /// Output reflection file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Project events onto peak profiles and write a profiles file
    Project {
        /// Binary event file
        #[arg(short, long)]
        events: Option<PathBuf>,

        /// Orientation matrix file
        #[arg(short, long)]
        matrix: Option<PathBuf>,

        /// Output profiles file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fit every profile of a profiles file and write an integrate file
    Fit {
        /// Input profiles file
        input: PathBuf,

        /// Output integrate file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Predict, project and fit in one pass
    Integrate {
        /// Binary event file
        #[arg(short, long)]
        events: Option<PathBuf>,

        /// Orientation matrix file
        #[arg(short, long)]
        matrix: Option<PathBuf>,

        /// Output integrate file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write the profiles file
        #[arg(long)]
        profiles: Option<PathBuf>,
    },

    /// Merge per-run reflection files
    Merge {
        /// Input reflection files, in run order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Show information about a binary event file
    Info {
        /// Binary event file
        input: Option<PathBuf>,
    },
}

/// Peaks predicted for one run, with what projection needs to index them.
struct Prediction {
    matrix: OrientationFile,
    bounds: HklBounds,
    peaks: Vec<CandidatePeak>,
    stats: PredictionStatistics,
}

fn init_logging(verbose: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if verbose {
        builder.filter_level(LevelFilter::Debug);
    }
    builder.init();
}

fn load_config(path: Option<&Path>) -> Result<ReductionConfig> {
    let config = match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            ReductionConfig::from_file(path)?
        }
        None => {
            let config = ReductionConfig::default();
            config.validate()?;
            config
        }
    };
    debug!("Configuration: {}", serde_json::to_string_pretty(&config)?);
    if config.instrument.detectors.is_empty() {
        warn!("No detectors configured; no peaks will be predicted");
    }
    Ok(config)
}

/// Picks the command-line path, falling back to the configured one.
fn input_path(
    arg: Option<PathBuf>,
    configured: Option<&PathBuf>,
    what: &'static str,
) -> Result<PathBuf> {
    arg.or_else(|| configured.cloned())
        .ok_or(CliError::MissingInput(what))
}

/// `<output_dir>/<experiment>_<run>.<extension>`
fn default_output(config: &ReductionConfig, extension: &str) -> PathBuf {
    config.run.output_dir.join(format!(
        "{}_{}.{}",
        config.run.experiment, config.run.run_number, extension
    ))
}

fn predict(config: &ReductionConfig, matrix_path: &Path) -> Result<Prediction> {
    let matrix = OrientationFile::read(matrix_path)?;
    debug!("Unit cell: {:?}", matrix.cell);

    let predictor = PeakPredictor::new(&matrix.orientation, &matrix.cell, config);
    let bounds = predictor.bounds();
    bounds.check_size()?;
    let (peaks, stats) = predictor.predict_with_statistics();
    info!(
        "Predicted {} peaks within |h| <= {}, |k| <= {}, |l| <= {}",
        peaks.len(),
        bounds.hmax,
        bounds.kmax,
        bounds.lmax
    );

    Ok(Prediction {
        matrix,
        bounds,
        peaks,
        stats,
    })
}

fn project(
    config: &ReductionConfig,
    prediction: &Prediction,
    events_path: &Path,
) -> Result<(ProfileSet, ProjectionStatistics)> {
    let reader = EventFileReader::open(events_path, config.profile.byte_order)?;
    info!(
        "Projecting {} events from {}",
        reader.event_count(),
        events_path.display()
    );

    let index = HklIndex::build(prediction.bounds, &prediction.peaks)?;
    let projector = EventProjector::new(
        &prediction.matrix.orientation,
        &index,
        &prediction.peaks,
        &config.profile,
    );
    let result = if config.profile.parallel {
        projector.accumulate_bytes(
            reader.record_bytes(),
            reader.byte_order(),
            config.profile.chunk_records,
        )?
    } else {
        projector.accumulate(reader.events())
    };
    Ok(result)
}

fn print_prediction(stats: &PredictionStatistics) {
    println!("Reflections: {}", stats.reflections);
    println!("  not reflecting: {}", stats.not_reflecting);
    println!("  outside wavelength window: {}", stats.outside_wavelength);
    println!("  missed detectors: {}", stats.missed_detectors);
    println!("Predicted peaks: {}", stats.predicted);
}

fn print_projection(stats: &ProjectionStatistics, profiles: &ProfileSet) {
    println!("Events: {}", stats.events);
    println!("  binned: {}", stats.binned);
    println!("  no candidate: {}", stats.no_candidate);
    println!("  outside box: {}", stats.outside_box);
    println!("  outside cylinder: {}", stats.outside_cylinder);
    println!("  outside window: {}", stats.outside_window);
    println!("  channel out of range: {}", stats.channel_out_of_range);
    println!("  non-finite: {}", stats.non_finite);
    println!(
        "Profile counts: {} over {} peaks",
        profiles.total(),
        profiles.len()
    );
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }
    debug!("Using {} worker threads", rayon::current_num_threads());

    let start = Instant::now();

    match cli.command {
        Commands::Predict { matrix, output } => {
            let config = load_config(cli.config.as_deref())?;
            let matrix = input_path(matrix, config.run.matrix_file.as_ref(), "matrix file")?;
            let prediction = predict(&config, &matrix)?;
            let file = ReflectionFile::from_peaks(&config, &prediction.peaks, None);

            match output {
                Some(path) => {
                    let written = write_reflection_file(&path, &file)?;
                    info!("Wrote {} peaks to {}", written, path.display());
                    print_prediction(&prediction.stats);
                }
                None => {
                    let stdout = io::stdout();
                    let mut writer = ReflectionWriter::new(stdout.lock());
                    writer.write_header(&file.header)?;
                    writer.write_sections(&file)?;
                    writer.finish()?.flush()?;
                }
            }
        }

        Commands::Project {
            events,
            matrix,
            output,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let matrix = input_path(matrix, config.run.matrix_file.as_ref(), "matrix file")?;
            let events = input_path(events, config.run.events_file.as_ref(), "event file")?;
            let output = output.unwrap_or_else(|| default_output(&config, "profiles"));

            let prediction = predict(&config, &matrix)?;
            let (profiles, stats) = project(&config, &prediction, &events)?;
            let file = ReflectionFile::from_peaks(
                &config,
                &prediction.peaks,
                Some(profiles.profiles()),
            );
            let written = write_reflection_file(&output, &file)?;
            info!("Wrote {} profiles to {}", written, output.display());

            print_prediction(&prediction.stats);
            print_projection(&stats, &profiles);
        }

        Commands::Fit { input, output } => {
            let config = load_config(cli.config.as_deref())?;
            let output = output.unwrap_or_else(|| input.with_extension("integrate"));

            let profiles = ReflectionFile::read(&input)?;
            info!(
                "Read {} reflections from {}",
                profiles.num_records(),
                input.display()
            );
            let fitter = PeakShapeFitter::new(&config.fit, config.profile.num_steps);
            let (integrated, summary) = profiles.integrate(&fitter, config.fit.parallel)?;
            let written = write_reflection_file(&output, &integrated)?;
            info!("Wrote {} reflections to {}", written, output.display());

            println!("{}", summary);
        }

        Commands::Integrate {
            events,
            matrix,
            output,
            profiles: profiles_output,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let matrix = input_path(matrix, config.run.matrix_file.as_ref(), "matrix file")?;
            let events = input_path(events, config.run.events_file.as_ref(), "event file")?;
            let output = output.unwrap_or_else(|| default_output(&config, "integrate"));

            let prediction = predict(&config, &matrix)?;
            let (profiles, stats) = project(&config, &prediction, &events)?;
            let file = ReflectionFile::from_peaks(
                &config,
                &prediction.peaks,
                Some(profiles.profiles()),
            );
            if let Some(path) = profiles_output {
                let written = write_reflection_file(&path, &file)?;
                info!("Wrote {} profiles to {}", written, path.display());
            }

            let fitter = PeakShapeFitter::new(&config.fit, config.profile.num_steps);
            let (integrated, summary) = file.integrate(&fitter, config.fit.parallel)?;
            let written = write_reflection_file(&output, &integrated)?;
            info!("Wrote {} reflections to {}", written, output.display());

            print_prediction(&prediction.stats);
            print_projection(&stats, &profiles);
            println!("{}", summary);
        }

        Commands::Merge { inputs, output } => {
            let summary = merge_files(&inputs, &output)?;
            println!(
                "Merged {} files: {} reflections written to {}",
                summary.files,
                summary.records,
                output.display()
            );
        }

        Commands::Info { input } => {
            let config = load_config(cli.config.as_deref())?;
            let input = input_path(input, config.run.events_file.as_ref(), "event file")?;
            let reader = EventFileReader::open(&input, config.profile.byte_order)?;
            let summary = reader.summary(config.profile.chunk_records);

            println!("File: {}", input.display());
            println!(
                "Size: {} bytes ({:.2} MB)",
                summary.file_size,
                summary.file_size as f64 / 1_000_000.0
            );
            println!("Byte order: {:?}", reader.byte_order());
            println!("Records: {}", summary.records);
            if summary.trailing_bytes > 0 {
                println!("Trailing bytes: {}", summary.trailing_bytes);
            }
            println!("Non-finite records: {}", summary.non_finite);
            if let Some(range) = summary.q_range {
                for (axis, name) in ["Qx", "Qy", "Qz"].iter().enumerate() {
                    println!("{} range: {} - {}", name, range.min[axis], range.max[axis]);
                }
            }
        }
    }

    debug!("Finished in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_name() {
        let mut config = ReductionConfig::default().with_run_number(8001);
        config.run.output_dir = PathBuf::from("out");
        assert_eq!(
            default_output(&config, "integrate"),
            Path::new("out").join("scd_8001.integrate")
        );
    }

    #[test]
    fn test_input_path_fallback() {
        let configured = PathBuf::from("run.mat");
        let arg = Some(PathBuf::from("other.mat"));
        assert_eq!(
            input_path(arg, Some(&configured), "matrix file").unwrap(),
            PathBuf::from("other.mat")
        );
        assert_eq!(
            input_path(None, Some(&configured), "matrix file").unwrap(),
            configured
        );
        assert!(matches!(
            input_path(None, None, "matrix file"),
            Err(CliError::MissingInput("matrix file"))
        ));
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "scdpeaks",
            "--config",
            "run.json",
            "integrate",
            "--events",
            "run.bin",
            "--profiles",
            "run.profiles",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("run.json")));
        assert!(matches!(
            cli.command,
            Commands::Integrate {
                events: Some(_),
                matrix: None,
                output: None,
                profiles: Some(_),
            }
        ));

        assert!(Cli::try_parse_from(["scdpeaks", "merge", "-o", "all.integrate"]).is_err());
    }
}
