//! Source-receptor (SR) matrix construction and prediction.
//!
//! Splits cleanly off `inmap-core`: a matrix is built by running many
//! independent single-source simulations (`builder`/`worker`) against a
//! shared base grid, persisted in a self-describing binary format
//! (`matrix`), and later applied to arbitrary user emissions without
//! rerunning the full engine (`reader`).

pub mod builder;
pub mod host;
pub mod job;
pub mod matrix;
pub mod reader;
pub mod worker;

pub use builder::{BuilderConfig, SrBuildResult, SrBuilder};
pub use job::{JobKey, JobStatus, JobTable};
pub use matrix::{SrGeometry, SrMatrix};
pub use reader::{EmissionRecord, Footprint, Prediction, SrReader};
pub use worker::{run_source_job, source_footprint, MechanismFactory};
