//! Init/Run/Cleanup orchestration.
//!
//! Each iteration computes a stable step, fans the manipulator kernel
//! out across all cells, and checks a termination predicate, with a
//! cancellation token checked at each barrier; wraps that loop in the
//! three named phases, the population-weighted convergence test, and
//! the periodic grid mutation pass.

use crate::cell::Cell;
use crate::cfl::compute_timestep;
use crate::config::RunConfig;
use crate::convergence::ConvergenceTracker;
use crate::ctmdata::CtmData;
use crate::error::InMapError;
use crate::grid::mutate::{merge_siblings, pop_conc_score, split_cell};
use crate::grid::population::AttributeRecord;
use crate::grid::Grid;
use crate::mechanism::Mechanism;
use crate::operators::{default_manipulators, run_iteration, CellManipulator};
use crate::output::{check_output_vars, parse, CompiledOutput, Expr, GridWriter, OutputRow};
use crate::units::Seconds;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Cooperative cancellation, checked at every manipulator/logging
/// boundary.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Summary returned by [`Runner::run`]: how the loop terminated and how
/// many iterations it took.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub iterations: u32,
    pub converged: bool,
    pub cancelled: bool,
    pub final_dt: Seconds,
}

/// Orchestrates Init/Run/Cleanup over a [`Grid`].
pub struct Runner {
    grid: Grid,
    ctm: CtmData,
    mechanism: Box<dyn Mechanism>,
    manipulators: Vec<Box<dyn CellManipulator>>,
    config: RunConfig,
    dt: Seconds,
    tracker: ConvergenceTracker,
    cancellation: CancellationToken,
    simulated_seconds: f64,
    /// Co-parented children from past [`split_cell`] calls, tracked so
    /// `mutate` can later offer them to [`Self::try_coarsen`].
    split_families: Vec<Vec<crate::cell::CellId>>,
}

impl Runner {
    /// Init: validate configuration, verify requested outputs are
    /// expressible against a representative cell, and compute the
    /// initial Δt.
    ///
    /// # Errors
    /// Returns [`InMapError::Config`] if `config` fails validation, or
    /// [`InMapError::Output`] if an output expression references an
    /// unresolvable variable.
    pub fn init(grid: Grid, ctm: CtmData, mechanism: Box<dyn Mechanism>, config: RunConfig) -> Result<Self, InMapError> {
        config.validate()?;

        let exprs: BTreeMap<String, Expr> = config
.output_vars
.iter()
.map(|(name, src)| parse(src).map(|e| (name.clone(), e)))
.collect::<Result<_, _>>()?;

        if let Some(sample) = grid.live_cells().first().copied() {
            check_output_vars(&config.output_vars, &exprs, mechanism.as_ref(), sample)?;
        }

        let cells: Vec<Cell> = grid.live_cells().into_iter().cloned().collect();
        let dt = compute_timestep(&cells, config.cfl_safety_factor);
        info!(cells = cells.len(), dt = dt.value(), "runner initialized");

        Ok(Runner {
            grid,
            ctm,
            mechanism,
            manipulators: default_manipulators(),
            config,
            dt,
            tracker: ConvergenceTracker::new(),
            cancellation: CancellationToken::new(),
            simulated_seconds: 0.0,
            split_families: Vec::new(),
        })
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    #[must_use]
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Run to convergence (or the configured fixed iteration count),
    /// applying the operator kernel and periodic mutation.
    pub fn run(&mut self) -> RunSummary {
        let mut iterations = 0u32;
        let mut converged = false;

        loop {
            if self.cancellation.is_cancelled() {
                info!(iterations, "run cancelled");
                break;
            }
            if self.config.convergence.num_iterations > 0 && iterations >= self.config.convergence.num_iterations {
                break;
            }

            let mut cells: Vec<Cell> = self.grid.live_cells().into_iter().cloned().collect();
            run_iteration(&mut cells, self.mechanism.as_ref(), &self.manipulators, self.dt);
            for cell in cells {
                if let Some(slot) = self.grid.cell_mut(cell.id) {
                    *slot = cell;
                }
            }

            iterations += 1;
            self.simulated_seconds += self.dt.value();

            if self.simulated_seconds >= self.config.mutation.interval_seconds {
                self.simulated_seconds = 0.0;
                debug!(iterations, cells = self.grid.len(), "running mutation pass");
                self.mutate();
            }

            if self.cancellation.is_cancelled() {
                break;
            }

            if self.config.convergence.num_iterations == 0 && iterations % self.config.convergence.check_every_n_iterations == 0 {
                let live: Vec<Cell> = self.grid.live_cells().into_iter().cloned().collect();
                converged = self.tracker.record_and_check(&live, self.mechanism.as_ref(), &self.config.convergence);
                debug!(iterations, converged, "convergence check");
                if converged {
                    info!(iterations, "run converged");
                    break;
                }
            }
        }

        RunSummary { iterations, converged, cancelled: self.cancellation.is_cancelled(), final_dt: self.dt }
    }

    /// The dynamic "PopConcMutator" pass: offer previously
    /// split families for coarsening, split cells whose score exceeds
    /// `split_threshold`, then re-derive Δt.
    fn mutate(&mut self) {
        let families = std::mem::take(&mut self.split_families);
        for family in families {
            if !family.iter().all(|&id| self.grid.cell(id).is_some()) {
                // A member was already split or merged away since; the
                // family no longer exists as such.
                continue;
            }
            if !self.try_coarsen(&family) {
                self.split_families.push(family);
            }
        }

        let ids: Vec<_> = self.grid.live_cells().iter().map(|c| c.id).collect();
        for id in ids {
            if self.grid.cell(id).is_none() {
                continue;
            }
            let score = pop_conc_score(&self.grid, id);
            if score > self.config.mutation.split_threshold {
                let children = split_cell(&mut self.grid, id, 2, 2, &self.ctm, self.mechanism.as_ref());
                self.split_families.push(children);
            }
        }

        self.recompute_dt();
    }

    /// Merge a known sibling family back together if their combined
    /// score has fallen below the coarsen threshold. `mutate` calls this
    /// automatically for families it split earlier; also exposed
    /// directly for callers tracking their own split provenance.
    pub fn try_coarsen(&mut self, siblings: &[crate::cell::CellId]) -> bool {
        let combined: f64 = siblings.iter().map(|&id| pop_conc_score(&self.grid, id)).sum::<f64>() / siblings.len().max(1) as f64;
        if combined < self.config.mutation.coarsen_threshold {
            merge_siblings(&mut self.grid, siblings, &self.ctm, self.mechanism.as_ref());
            self.recompute_dt();
            true
        } else {
            false
        }
    }

    fn recompute_dt(&mut self) {
        let cells: Vec<Cell> = self.grid.live_cells().into_iter().cloned().collect();
        self.dt = compute_timestep(&cells, self.config.cfl_safety_factor);
    }

    /// Cleanup: evaluate every configured output expression over layer
    /// 0 (or all layers, if `output_all_layers`) and flush via `writer`.
    ///
    /// # Errors
    /// Returns [`InMapError::Output`] on a parse or writer I/O failure.
    pub fn cleanup(&self, writer: &mut dyn GridWriter) -> Result<(), InMapError> {
        let cells: Vec<Cell> = self
.grid
.live_cells()
.into_iter()
.filter(|c| self.config.output_all_layers || c.is_bottom_layer())
.cloned()
.collect();

        let compiled: BTreeMap<String, CompiledOutput> = self
.config
.output_vars
.iter()
.map(|(name, src)| CompiledOutput::compile(src, &cells, self.mechanism.as_ref()).map(|c| (name.clone(), c)))
.collect::<Result<_, _>>()?;

        let mut rows = Vec::with_capacity(cells.len());
        for cell in &cells {
            let mut columns = BTreeMap::new();
            for (name, expr) in &compiled {
                let value = expr.evaluate(cell, self.mechanism.as_ref())?;
                columns.insert(name.clone(), value);
            }
            rows.push(OutputRow { geom: cell.geom.clone(), columns });
        }

        writer.write_rows(&rows).map_err(InMapError::from)?;
        Ok(())
    }

    /// Apportion a fresh set of emissions into the grid's `emis_flux`
    /// vectors. `source_rates` maps species index to
    /// emission rate within `source_footprint`; the rate is
    /// area-weighted into every cell `source_footprint` overlaps.
    pub fn inject_emissions(&mut self, source_footprint: &crate::geom::Poly, source_rates: &[(usize, crate::units::EmissionRate)]) {
        let ids: Vec<_> = self.grid.live_cells().iter().map(|c| c.id).collect();
        for id in ids {
            let Some(cell) = self.grid.cell(id) else { continue };
            let fraction = crate::geom::overlap_fraction(&cell.geom, source_footprint);
            if fraction <= 0.0 {
                continue;
            }
            if let Some(cell) = self.grid.cell_mut(id) {
                for &(species, rate) in source_rates {
                    let scaled = crate::units::EmissionRate::new(rate.value() * fraction);
                    cell.set_emission_rate(species, scaled);
                }
            }
        }
    }

    #[must_use]
    pub fn population_records_apportioned(&self, records: &[AttributeRecord]) -> bool {
        !records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::build::build_grid;
    use crate::mechanism::TrivialChem;

    fn sample_config() -> RunConfig {
        let mut output_vars = BTreeMap::new();
        output_vars.insert("Tracer".to_string(), "Tracer".to_string());
        RunConfig {
            grid_proj: Some("lcc".to_string()),
            nx: 2,
            ny: 2,
            nz: 1,
            dx: 1000.0,
            dy: 1000.0,
            cfl_safety_factor: 0.9,
            nests: crate::config::NestSchedule::default(),
            mutation: crate::config::MutationSchedule { interval_seconds: 1e12,..crate::config::MutationSchedule::default() },
            convergence: crate::config::ConvergenceConfig { num_iterations: 3,..crate::config::ConvergenceConfig::default() },
            output_vars,
            output_all_layers: false,
        }
    }

    #[test]
    fn run_executes_the_configured_fixed_iteration_count() {
        let ctm = CtmData::uniform(2, 2, 1, 1000.0, 1000.0, 100.0, 0.0, 0.0);
        let grid = build_grid(&ctm, &TrivialChem::new(), vec![], vec![], &[], &[], &crate::config::NestSchedule::default()).unwrap();
        let mut runner = Runner::init(grid, ctm, Box::new(TrivialChem::new()), sample_config()).unwrap();
        let summary = runner.run();
        assert_eq!(summary.iterations, 3);
        assert!(!summary.cancelled);
    }

    #[test]
    fn cancellation_stops_the_run_early() {
        let ctm = CtmData::uniform(2, 2, 1, 1000.0, 1000.0, 100.0, 0.0, 0.0);
        let grid = build_grid(&ctm, &TrivialChem::new(), vec![], vec![], &[], &[], &crate::config::NestSchedule::default()).unwrap();
        let mut config = sample_config();
        config.convergence.num_iterations = 1_000_000;
        let mut runner = Runner::init(grid, ctm, Box::new(TrivialChem::new()), config).unwrap();
        runner.cancellation_token().cancel();
        let summary = runner.run();
        assert!(summary.cancelled);
        assert_eq!(summary.iterations, 0);
    }

    #[test]
    fn cleanup_writes_one_row_per_bottom_layer_cell() {
        let ctm = CtmData::uniform(2, 2, 2, 1000.0, 1000.0, 100.0, 0.0, 0.0);
        let grid = build_grid(&ctm, &TrivialChem::new(), vec![], vec![], &[], &[], &crate::config::NestSchedule::default()).unwrap();
        let mut config = sample_config();
        config.nz = 2;
        let runner = Runner::init(grid, ctm, Box::new(TrivialChem::new()), config).unwrap();
        let mut writer = crate::output::RecordingWriter::default();
        runner.cleanup(&mut writer).unwrap();
        assert_eq!(writer.rows.len(), 4);
    }

    #[test]
    fn missing_grid_proj_fails_init() {
        let ctm = CtmData::uniform(1, 1, 1, 1000.0, 1000.0, 100.0, 0.0, 0.0);
        let grid = build_grid(&ctm, &TrivialChem::new(), vec![], vec![], &[], &[], &crate::config::NestSchedule::default()).unwrap();
        let mut config = sample_config();
        config.grid_proj = None;
        let err = Runner::init(grid, ctm, Box::new(TrivialChem::new()), config).unwrap_err();
        assert!(matches!(err, InMapError::Config(_)));
    }
}
