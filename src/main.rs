use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{info, warn};

use radarqc::config::PipelineConfig;
use radarqc::data::loader;
use radarqc::filter::{filter_file, SpectrumFilter};
use radarqc::processing::{CompositeProcessor, SignalProcessor};
use radarqc::{Channel, CsFile, DataSet};

/// Quality control for HF radar cross-spectra files.
#[derive(Parser, Debug)]
#[command(name = "radarqc", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the decoded header of each file as JSON.
    Header {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Preprocess and filter files, logging a verdict for each.
    Filter {
        /// Pipeline description (JSON).
        #[arg(long)]
        config: PathBuf,
        /// Directory for re-encoded copies of accepted files.
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Collect one channel of many files into parquet and/or CSV.
    Export {
        #[arg(long)]
        parquet: Option<PathBuf>,
        /// CSV of header fields, one row per file.
        #[arg(long)]
        headers: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = Channel::Antenna3)]
        channel: Channel,
        /// Take the preprocessing chain from this pipeline file.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Header { files } => print_headers(&files),
        Command::Filter { config, out, files } => run_filters(&config, out.as_deref(), &files),
        Command::Export {
            parquet,
            headers,
            channel,
            config,
            files,
        } => export(parquet.as_deref(), headers.as_deref(), channel, config.as_deref(), &files),
    }
}

fn read_file(path: &Path) -> Result<CsFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    loader::load(&bytes).with_context(|| format!("decoding {}", path.display()))
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    PipelineConfig::load(path).with_context(|| format!("loading pipeline {}", path.display()))
}

// ---- header ----

fn print_headers(files: &[PathBuf]) -> Result<()> {
    for path in files {
        let file = read_file(path)?;
        let json = serde_json::to_string_pretty(file.header()).context("serializing header")?;
        println!("{json}");
    }
    Ok(())
}

// ---- filter ----

fn run_filters(config_path: &Path, out: Option<&Path>, files: &[PathBuf]) -> Result<()> {
    let config = load_config(config_path)?;
    let verdicts = filter_batch(&config, out, files, &mut std::io::stdout().lock())?;
    let accepted = verdicts.iter().filter(|&&v| v == Verdict::Accept).count();
    info!("{accepted} of {} files accepted", files.len());
    Ok(())
}

/// Outcome of running the pipeline on one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Accept,
    Reject,
    /// The file could not be decoded, preprocessed or filtered.
    Error,
}

/// Judge every file in order, writing one `ACCEPT`/`REJECT`/`ERROR` line
/// per file to `sink`. A failing file does not stop the batch; only an
/// unusable pipeline or output directory does.
fn filter_batch(
    config: &PipelineConfig,
    out: Option<&Path>,
    files: &[PathBuf],
    sink: &mut impl Write,
) -> Result<Vec<Verdict>> {
    let preprocess = config.build_preprocess()?;
    let mut filters = config.build_filters()?;
    if filters.is_empty() {
        warn!("pipeline has no filters; every file will be accepted");
    }
    if let Some(dir) = out {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let mut verdicts = Vec::with_capacity(files.len());
    for path in files {
        let verdict = match judge_file(path, config, &preprocess, &mut filters, out) {
            Ok(true) => {
                writeln!(sink, "ACCEPT {}", path.display())?;
                Verdict::Accept
            }
            Ok(false) => {
                writeln!(sink, "REJECT {}", path.display())?;
                Verdict::Reject
            }
            Err(err) => {
                warn!("{err:#}");
                writeln!(sink, "ERROR {}: {err:#}", path.display())?;
                Verdict::Error
            }
        };
        verdicts.push(verdict);
    }
    Ok(verdicts)
}

fn judge_file(
    path: &Path,
    config: &PipelineConfig,
    preprocess: &CompositeProcessor,
    filters: &mut [Box<dyn SpectrumFilter>],
    out: Option<&Path>,
) -> Result<bool> {
    let mut current = read_file(path)?
        .map_spectra(|sp| preprocess.process(sp))
        .with_context(|| format!("preprocessing {}", path.display()))?;

    let mut accepted = true;
    for filter in filters.iter_mut() {
        let (filtered, output) = filter_file(filter.as_mut(), &current)
            .with_context(|| format!("{} filter on {}", filter.name(), path.display()))?;
        info!(
            "{}: {} flagged {} of {} cells ({:.2}%)",
            path.display(),
            filter.name(),
            output.mask.flagged_count(),
            output.mask.flags().len(),
            100.0 * output.mask.flagged_fraction()
        );
        accepted &= output.is_accepted(config.max_flagged_fraction);
        current = filtered;
    }

    if accepted {
        if let Some(dir) = out {
            write_filtered(dir, path, &current)?;
        }
    }
    Ok(accepted)
}

fn write_filtered(dir: &Path, source: &Path, file: &CsFile) -> Result<()> {
    let Some(name) = source.file_name() else {
        bail!("{} has no file name", source.display());
    };
    let bytes = file
        .to_bytes()
        .with_context(|| format!("re-encoding {} (preprocessing must keep cross channels complex)", source.display()))?;
    let target = dir.join(name);
    std::fs::write(&target, bytes).with_context(|| format!("writing {}", target.display()))?;
    Ok(())
}

// ---- export ----

fn export(
    parquet: Option<&Path>,
    headers: Option<&Path>,
    channel: Channel,
    config: Option<&Path>,
    files: &[PathBuf],
) -> Result<()> {
    if parquet.is_none() && headers.is_none() {
        bail!("nothing to export: pass --parquet and/or --headers");
    }
    let preprocess = match config {
        Some(path) => load_config(path)?.build_preprocess()?,
        None => CompositeProcessor::default(),
    };
    let dataset = DataSet::load(files, &preprocess, channel)?;
    if let Some(path) = parquet {
        let rows = dataset.write_parquet(path)?;
        println!("Wrote {rows} rows ({} files) to {}", dataset.len(), path.display());
    }
    if let Some(path) = headers {
        dataset.write_headers_csv(path)?;
        println!("Wrote {} headers to {}", dataset.len(), path.display());
    }
    Ok(())
}
