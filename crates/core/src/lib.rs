//! The InMAP reduced-form air quality simulation engine.
//!
//! One file per subsystem, with the public surface re-exported flat off
//! the crate root so downstream crates (`inmap-sr`, the CLI) never
//! reach into submodule paths directly.

pub mod cell;
pub mod cfl;
pub mod config;
pub mod convergence;
pub mod ctmdata;
pub mod error;
pub mod geom;
pub mod grid;
pub mod mechanism;
pub mod operators;
pub mod output;
pub mod runner;
pub mod units;

pub use cell::{Cell, CellId, Direction, Meteorology, NeighborLink};
pub use config::{ConvergenceConfig, MutationSchedule, NestSchedule, RunConfig};
pub use convergence::ConvergenceTracker;
pub use ctmdata::{CtmData, LatticeField};
pub use error::{ConfigError, GridError, InMapError, NumericalError, OutputError, SrError};
pub use grid::Grid;
pub use mechanism::{Mechanism, SimpleChem, TrivialChem};
pub use output::{check_output_vars, parse as parse_output_expr, CompiledOutput, Expr, GridWriter, OutputRow, RecordingWriter, ShapefileWriter};
pub use runner::{CancellationToken, RunSummary, Runner};
