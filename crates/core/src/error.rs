//! Per-subsystem error types.
//!
//! Hand-rolled `Display`/`Error` impls rather than a derive-macro error
//! crate, to keep the core library's dependency surface small.

use std::fmt;

/// Configuration errors: fail at `Runner::init`, before any iteration
/// runs.
#[derive(Debug)]
pub enum ConfigError {
    MissingField(&'static str),
    InvalidProjection(String),
    ZeroGridDimension(&'static str),
    EmptyOutputVars,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingField(name) => write!(f, "missing required field: {name}"),
            ConfigError::InvalidProjection(msg) => write!(f, "invalid projection: {msg}"),
            ConfigError::ZeroGridDimension(name) => {
                write!(f, "grid dimension `{name}` must be nonzero")
            }
            ConfigError::EmptyOutputVars => write!(f, "output variable map is empty"),
        }
    }
}
impl std::error::Error for ConfigError {}

/// Grid construction/mutation errors.
#[derive(Debug)]
pub enum GridError {
    SourceOutsideDomain { source_id: String },
    UnreachableStackHeight { source_id: String, assigned_layer: usize },
    InvariantViolation { cell: u32, detail: String },
    Io(String),
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridError::SourceOutsideDomain { source_id } => {
                write!(f, "emission source `{source_id}` lies outside the domain, skipping")
            }
            GridError::UnreachableStackHeight { source_id, assigned_layer } => write!(
                f,
                "source `{source_id}` stack height unreachable, assigned to layer {assigned_layer}"
            ),
            GridError::InvariantViolation { cell, detail } => {
                write!(f, "grid invariant violated at cell {cell}: {detail}")
            }
            GridError::Io(msg) => write!(f, "grid I/O error: {msg}"),
        }
    }
}
impl std::error::Error for GridError {}

/// A manipulator produced a non-finite concentration.
/// Always fatal.
#[derive(Debug)]
pub struct NumericalError {
    pub cell: u32,
    pub species: String,
    pub manipulator: &'static str,
    pub value: f64,
}

impl fmt::Display for NumericalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "non-finite concentration {} for species `{}` in cell {} after manipulator `{}`",
            self.value, self.species, self.cell, self.manipulator
        )
    }
}
impl std::error::Error for NumericalError {}

/// SR worker / RPC errors.
#[derive(Debug)]
pub enum SrError {
    WorkerUnreachable { worker: String },
    RetriesExhausted { source_layer: usize, source_column: usize, attempts: u32 },
    MatrixIo(String),
}

impl fmt::Display for SrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SrError::WorkerUnreachable { worker } => write!(f, "worker `{worker}` unreachable"),
            SrError::RetriesExhausted { source_layer, source_column, attempts } => write!(
                f,
                "source (layer {source_layer}, column {source_column}) failed after {attempts} attempts"
            ),
            SrError::MatrixIo(msg) => write!(f, "SR matrix I/O error: {msg}"),
        }
    }
}
impl std::error::Error for SrError {}

/// Output-expression errors: unknown variable references caught by
/// `CheckOutputVars` at Init, and writer I/O failures.
#[derive(Debug)]
pub enum OutputError {
    UnknownVariable(String),
    ParseError { expr: String, detail: String },
    WriterIo(String),
}

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputError::UnknownVariable(name) => {
                write!(f, "output expression references unknown variable `{name}`")
            }
            OutputError::ParseError { expr, detail } => {
                write!(f, "failed to parse output expression `{expr}`: {detail}")
            }
            OutputError::WriterIo(msg) => write!(f, "output writer I/O error: {msg}"),
        }
    }
}
impl std::error::Error for OutputError {}

/// Crate-root error aggregating every subsystem's error type, returned
/// by `Runner::run`.
#[derive(Debug)]
pub enum InMapError {
    Config(ConfigError),
    Grid(GridError),
    Numerical(NumericalError),
    Sr(SrError),
    Output(OutputError),
}

impl fmt::Display for InMapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InMapError::Config(e) => write!(f, "{e}"),
            InMapError::Grid(e) => write!(f, "{e}"),
            InMapError::Numerical(e) => write!(f, "{e}"),
            InMapError::Sr(e) => write!(f, "{e}"),
            InMapError::Output(e) => write!(f, "{e}"),
        }
    }
}
impl std::error::Error for InMapError {}

impl From<ConfigError> for InMapError {
    fn from(e: ConfigError) -> Self {
        InMapError::Config(e)
    }
}
impl From<GridError> for InMapError {
    fn from(e: GridError) -> Self {
        InMapError::Grid(e)
    }
}
impl From<NumericalError> for InMapError {
    fn from(e: NumericalError) -> Self {
        InMapError::Numerical(e)
    }
}
impl From<SrError> for InMapError {
    fn from(e: SrError) -> Self {
        InMapError::Sr(e)
    }
}
impl From<OutputError> for InMapError {
    fn from(e: OutputError) -> Self {
        InMapError::Output(e)
    }
}
