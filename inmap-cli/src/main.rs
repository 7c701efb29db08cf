//! The `inmap` command-line entry point.
//!
//! One top-level `clap::Parser` with `Subcommand` variants and
//! `ValueEnum` options, wired directly to `inmap_core`/`inmap_sr`'s
//! Init/Run/Cleanup and SR build/predict APIs. CTM, census, and
//! mortality ingestion are external collaborators, so every subcommand
//! here takes already-prepared JSON for those inputs rather than
//! reading a netCDF/shapefile pipeline itself.

use clap::{Parser, Subcommand, ValueEnum};
use inmap_core::config::NestSchedule;
use inmap_core::grid::build::build_grid;
use inmap_core::grid::persist;
use inmap_core::mechanism::{Mechanism, SimpleChem, TrivialChem};
use inmap_core::output::ShapefileWriter;
use inmap_core::runner::{CancellationToken, Runner};
use inmap_core::units::EmissionRate;
use inmap_core::{CtmData, RunConfig};
use inmap_sr::host::{read_hostfile, HostSpawner, ProcessHostSpawner};
use inmap_sr::{BuilderConfig, EmissionRecord, Footprint, MechanismFactory, SrBuilder, SrReader};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "inmap")]
#[command(about = "Reduced-form steady-state air quality model", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a grid from a CTM lattice and run it to convergence, writing a shapefile.
    RunSteady {
        /// Path to a `CtmData` JSON lattice.
        #[arg(long)]
        ctm: PathBuf,
        /// Path to a `RunConfig` JSON file.
        #[arg(long)]
        config: PathBuf,
        /// Optional static-refinement nest schedule JSON; defaults to no refinement.
        #[arg(long)]
        nests: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = MechanismKind::SimpleChem)]
        mechanism: MechanismKind,
        /// Output shapefile path.
        #[arg(long)]
        out: PathBuf,
    },
    /// Grid construction only, for inspection or a separate pipeline stage.
    Grid {
        #[command(subcommand)]
        action: GridAction,
    },
    /// Source-receptor matrix construction and prediction.
    Sr {
        #[command(subcommand)]
        action: SrAction,
    },
    /// Spawn SR worker processes across a hostfile.
    Worker {
        /// One hostname per line; blank lines and `#` comments ignored.
        #[arg(long)]
        hostfile: PathBuf,
        /// Worker launch command with a `{host}` placeholder, e.g. `"ssh {host} inmap worker-node"`.
        #[arg(long)]
        command: String,
    },
    /// Print the engine version.
    Version,
}

#[derive(Subcommand)]
enum GridAction {
    /// Build a grid and persist it in the self-describing binary format.
    Build {
        #[arg(long)]
        ctm: PathBuf,
        #[arg(long)]
        nests: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = MechanismKind::SimpleChem)]
        mechanism: MechanismKind,
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum SrAction {
    /// Dispatch one simulation per (source_layer, source_column) and assemble the matrix.
    Build {
        #[arg(long)]
        ctm: PathBuf,
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        nests: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = MechanismKind::SimpleChem)]
        mechanism: MechanismKind,
        /// Comma-separated source layers to build, e.g. `0,1,2`.
        #[arg(long, default_value = "0")]
        source_layers: String,
        /// Grid layer whose cells become receptors.
        #[arg(long, default_value_t = 0)]
        receptor_layer: usize,
        #[arg(long, default_value_t = 4)]
        workers: usize,
        #[arg(long, default_value_t = 3)]
        max_attempts: u32,
        #[arg(long, default_value = "ug/s")]
        emission_units: String,
        #[arg(long)]
        out: PathBuf,
    },
    /// Apply a persisted SR matrix to a batch of emissions.
    Predict {
        #[arg(long)]
        matrix: PathBuf,
        /// JSON array of emission records.
        #[arg(long)]
        emissions: PathBuf,
        /// Write predictions here as JSON; defaults to stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MechanismKind {
    SimpleChem,
    Trivial,
}

impl MechanismKind {
    fn build(self) -> Box<dyn Mechanism> {
        match self {
            MechanismKind::SimpleChem => Box::new(SimpleChem::new()),
            MechanismKind::Trivial => Box::new(TrivialChem::new()),
        }
    }

    fn factory(self) -> MechanismFactory {
        match self {
            MechanismKind::SimpleChem => Arc::new(|| Box::new(SimpleChem::new()) as Box<dyn Mechanism>),
            MechanismKind::Trivial => Arc::new(|| Box::new(TrivialChem::new()) as Box<dyn Mechanism>),
        }
    }
}

/// One emission record as it appears in a `sr predict --emissions` JSON
/// file: a point `(x, y)` or an axis-aligned area `(x0, y0, x1, y1)`.
/// Arbitrary polygon footprints aren't accepted here since `geo_types`
/// carries no serde feature in this workspace; rectangles cover the
/// common "facility footprint" and "county box" cases.
#[derive(Debug, Deserialize)]
struct EmissionInput {
    x: Option<f64>,
    y: Option<f64>,
    x0: Option<f64>,
    y0: Option<f64>,
    x1: Option<f64>,
    y1: Option<f64>,
    layer: usize,
    species: String,
    rate: f64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
.init();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("{message}");
            eprintln!("inmap: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<(), String> {
    match command {
        Command::RunSteady { ctm, config, nests, mechanism, out } => run_steady(&ctm, &config, nests.as_deref(), mechanism, &out),
        Command::Grid { action: GridAction::Build { ctm, nests, mechanism, out } } => grid_build(&ctm, nests.as_deref(), mechanism, &out),
        Command::Sr { action } => sr_command(action),
        Command::Worker { hostfile, command } => worker_command(&hostfile, &command),
        Command::Version => {
            println!("inmap {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let contents = std::fs::read_to_string(path).map_err(|e| format!("reading {}: {e}", path.display()))?;
    serde_json::from_str(&contents).map_err(|e| format!("parsing {}: {e}", path.display()))
}

fn load_nests(path: Option<&Path>) -> Result<NestSchedule, String> {
    match path {
        Some(p) => load_json(p),
        None => Ok(NestSchedule::default()),
    }
}

fn run_steady(ctm_path: &Path, config_path: &Path, nests_path: Option<&Path>, mechanism: MechanismKind, out: &Path) -> Result<(), String> {
    let ctm: CtmData = load_json(ctm_path)?;
    let config: RunConfig = load_json(config_path)?;
    let nests = load_nests(nests_path)?;

    let built_mechanism = mechanism.build();
    let grid = build_grid(&ctm, built_mechanism.as_ref(), vec![], vec![], &[], &[], &nests).map_err(|e| format!("grid construction failed: {e}"))?;
    info!(cells = grid.len(), "grid built");

    let mut runner = Runner::init(grid, ctm, built_mechanism, config).map_err(|e| format!("init failed: {e}"))?;
    let summary = runner.run();
    info!(iterations = summary.iterations, converged = summary.converged, cancelled = summary.cancelled, "run finished");

    let mut writer = ShapefileWriter::new(out);
    runner.cleanup(&mut writer).map_err(|e| format!("cleanup/output failed: {e}"))?;

    if summary.converged {
        println!("converged after {} iterations, output written to {}", summary.iterations, out.display());
        Ok(())
    } else {
        Err(format!("did not converge within {} iterations (final dt {:.3}s)", summary.iterations, summary.final_dt.value()))
    }
}

fn grid_build(ctm_path: &Path, nests_path: Option<&Path>, mechanism: MechanismKind, out: &Path) -> Result<(), String> {
    let ctm: CtmData = load_json(ctm_path)?;
    let nests = load_nests(nests_path)?;

    let grid = build_grid(&ctm, mechanism.build().as_ref(), vec![], vec![], &[], &[], &nests).map_err(|e| format!("grid construction failed: {e}"))?;
    info!(cells = grid.len(), "grid built");

    let cells: Vec<_> = grid.live_cells().into_iter().cloned().collect();
    let file = File::create(out).map_err(|e| format!("creating {}: {e}", out.display()))?;
    let mut writer = BufWriter::new(file);
    persist::serialize(&mut writer, &cells, grid.population_columns(), grid.mortality_columns()).map_err(|e| format!("writing grid: {e}"))?;
    println!("wrote {} cells to {}", cells.len(), out.display());
    Ok(())
}

fn sr_command(action: SrAction) -> Result<(), String> {
    match action {
        SrAction::Build { ctm, config, nests, mechanism, source_layers, receptor_layer, workers, max_attempts, emission_units, out } => {
            sr_build(&ctm, &config, nests.as_deref(), mechanism, &source_layers, receptor_layer, workers, max_attempts, &emission_units, &out)
        }
        SrAction::Predict { matrix, emissions, out } => sr_predict(&matrix, &emissions, out.as_deref()),
    }
}

#[allow(clippy::too_many_arguments)]
fn sr_build(
    ctm_path: &Path,
    config_path: &Path,
    nests_path: Option<&Path>,
    mechanism: MechanismKind,
    source_layers: &str,
    receptor_layer: usize,
    workers: usize,
    max_attempts: u32,
    emission_units: &str,
    out: &Path,
) -> Result<(), String> {
    let ctm: CtmData = load_json(ctm_path)?;
    let config: RunConfig = load_json(config_path)?;
    let nests = load_nests(nests_path)?;
    let layers: Vec<usize> = source_layers
.split(',')
.map(str::trim)
.filter(|s| !s.is_empty())
.map(|s| s.parse::<usize>().map_err(|e| format!("bad source layer `{s}`: {e}")))
.collect::<Result<_, _>>()?;
    if layers.is_empty() {
        return Err("--source-layers must name at least one layer".to_string());
    }

    let grid = build_grid(&ctm, mechanism.build().as_ref(), vec![], vec![], &[], &[], &nests).map_err(|e| format!("grid construction failed: {e}"))?;
    let receptor_ids = grid.layer_cells(receptor_layer).to_vec();
    if receptor_ids.is_empty() {
        return Err(format!("no cells on receptor layer {receptor_layer}"));
    }
    let n_receptors = receptor_ids.len();

    let builder = SrBuilder::new(BuilderConfig { n_workers: workers.max(1), max_attempts: max_attempts.max(1),..BuilderConfig::default() });
    let cancellation = CancellationToken::new();
    let n_source_columns = ctm.nx * ctm.ny;
    let result = builder.build(&grid, &ctm, mechanism.factory(), &config, &layers, n_source_columns, receptor_ids, emission_units, &cancellation);

    if !result.missing.is_empty() {
        error!(missing = result.missing.len(), "SR build left jobs incomplete");
    }

    let file = File::create(out).map_err(|e| format!("creating {}: {e}", out.display()))?;
    let mut writer = BufWriter::new(file);
    result.matrix.write(&mut writer).map_err(|e| format!("writing SR matrix: {e}"))?;

    if result.missing.is_empty() {
        println!("SR matrix built: {} source layers x {} columns x {} receptors, written to {}", layers.len(), n_source_columns, n_receptors, out.display());
        Ok(())
    } else {
        Err(format!("{} of {} source jobs never completed", result.missing.len(), layers.len() * n_source_columns))
    }
}

fn sr_predict(matrix_path: &Path, emissions_path: &Path, out: Option<&Path>) -> Result<(), String> {
    let file = File::open(matrix_path).map_err(|e| format!("opening {}: {e}", matrix_path.display()))?;
    let mut reader = BufReader::new(file);
    let sr_reader = SrReader::load(&mut reader).map_err(|e| format!("loading SR matrix: {e}"))?;

    let inputs: Vec<EmissionInput> = load_json(emissions_path)?;
    let emissions: Vec<EmissionRecord> = inputs
.into_iter()
.map(|input| -> Result<EmissionRecord, String> {
            let footprint = match (input.x0, input.y0, input.x1, input.y1, input.x, input.y) {
                (Some(x0), Some(y0), Some(x1), Some(y1), _, _) => Footprint::Area(inmap_core::geom::rect(x0, y0, x1, y1)),
                (_, _, _, _, Some(x), Some(y)) => Footprint::Point(x, y),
                _ => return Err("emission record must give either (x, y) or (x0, y0, x1, y1)".to_string()),
            };
            Ok(EmissionRecord { footprint, layer: input.layer, species: input.species, rate: EmissionRate::new(input.rate) })
        })
.collect::<Result<_, _>>()?;

    let predictions = sr_reader.predict(&emissions);
    let json = serde_json::to_string_pretty(&predictions).map_err(|e| format!("serializing predictions: {e}"))?;
    match out {
        Some(path) => std::fs::write(path, json).map_err(|e| format!("writing {}: {e}", path.display())),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}

fn worker_command(hostfile: &Path, command: &str) -> Result<(), String> {
    let hosts = read_hostfile(hostfile).map_err(|e| format!("reading hostfile {}: {e}", hostfile.display()))?;
    if hosts.is_empty() {
        return Err(format!("hostfile {} lists no hosts", hostfile.display()));
    }

    let spawner = ProcessHostSpawner { command_template: command.to_string() };
    let mut children = Vec::with_capacity(hosts.len());
    for host in &hosts {
        info!(%host, "spawning SR worker");
        let child = spawner.spawn(host).map_err(|e| format!("spawning worker on `{host}`: {e}"))?;
        children.push((host.clone(), child));
    }

    let mut failures = Vec::new();
    for (host, mut child) in children {
        match child.wait() {
            Ok(status) if status.success() => {}
            Ok(status) => failures.push(format!("{host} exited with {status}")),
            Err(e) => failures.push(format!("{host}: {e}")),
        }
    }

    if failures.is_empty() {
        println!("{} worker(s) finished", hosts.len());
        Ok(())
    } else {
        Err(format!("worker failures: {}", failures.join("; ")))
    }
}
