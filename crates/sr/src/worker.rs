//! The single-source simulation a worker runs for one SR job.
//!
//! Reuses `inmap_core::runner::Runner`'s Init/Run orchestration
//! wholesale, since a source-receptor job is exactly one steady-state
//! run against an independent grid with a single unit source injected.

use inmap_core::cell::CellId;
use inmap_core::ctmdata::CtmData;
use inmap_core::error::InMapError;
use inmap_core::geom::{overlap_fraction, rect};
use inmap_core::grid::Grid;
use inmap_core::mechanism::Mechanism;
use inmap_core::runner::Runner;
use inmap_core::units::{Concentration, EmissionRate};
use inmap_core::RunConfig;
use std::sync::Arc;

/// Produces a fresh [`Mechanism`] instance per job. `Box<dyn Mechanism>`
/// has no `Clone`, so every worker job needs its own instance built from
/// this factory rather than sharing one across threads.
pub type MechanismFactory = Arc<dyn Fn() -> Box<dyn Mechanism> + Send + Sync>;

/// The base-grid column footprint for `source_column`, derived from the
/// CTM lattice directly so it stays
/// fixed regardless of how the working grid has since been refined.
#[must_use]
pub fn source_footprint(ctm: &CtmData, source_column: usize) -> inmap_core::geom::Poly {
    let ix = source_column % ctm.nx;
    let iy = source_column / ctm.nx;
    let x0 = ctm.origin_x + ix as f64 * ctm.dx;
    let y0 = ctm.origin_y + iy as f64 * ctm.dy;
    rect(x0, y0, x0 + ctm.dx, y0 + ctm.dy)
}

/// Inject a unit (1 ug/s) emission rate, simultaneously in every species,
/// into every live cell on `source_layer` overlapping `footprint`,
/// area-weighted. Unlike [`Runner::inject_emissions`], this is restricted
/// to a single layer, since a source column's footprint can coincide in
/// (x, y) with cells on other layers after vertical refinement.
fn inject_unit_source(grid: &mut Grid, footprint: &inmap_core::geom::Poly, source_layer: usize, n_species: usize) {
    let ids: Vec<CellId> = grid.layer_cells(source_layer).to_vec();
    for id in ids {
        let Some(cell) = grid.cell(id) else { continue };
        let fraction = overlap_fraction(&cell.geom, footprint);
        if fraction <= 0.0 {
            continue;
        }
        if let Some(cell) = grid.cell_mut(id) {
            for species in 0..n_species {
                cell.set_emission_rate(species, EmissionRate::new(fraction));
            }
        }
    }
}

/// Run one SR job: clone the shared base grid, inject a unit source at
/// `(source_layer, source_column)`, run to convergence, and return the
/// flattened `[receptor][species]` response row.
///
/// # Errors
/// Returns [`InMapError`] if `Runner::init` rejects `run_config` (this
/// should not happen in practice since the coordinator validates the
/// template config once up front).
pub fn run_source_job(
    base_grid: &Grid,
    ctm: &CtmData,
    mechanism_factory: &MechanismFactory,
    run_config: &RunConfig,
    source_layer: usize,
    source_column: usize,
    receptor_ids: &[CellId],
) -> Result<Vec<f64>, InMapError> {
    let mut grid = base_grid.clone();
    let mechanism = mechanism_factory();
    let n_species = mechanism.len();

    let footprint = source_footprint(ctm, source_column);
    inject_unit_source(&mut grid, &footprint, source_layer, n_species);

    let mut runner = Runner::init(grid, ctm.clone(), mechanism, run_config.clone())?;
    runner.run();

    let mut row = vec![0.0; receptor_ids.len() * n_species];
    for (i, &receptor) in receptor_ids.iter().enumerate() {
        if let Some(cell) = runner.grid().cell(receptor) {
            for species in 0..n_species {
                let value: Concentration = cell.cf[species];
                row[i * n_species + species] = value.value();
            }
        }
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use inmap_core::config::NestSchedule;
    use inmap_core::grid::build::build_grid;
    use inmap_core::mechanism::TrivialChem;
    use std::collections::BTreeMap;

    fn sample_config() -> RunConfig {
        let mut output_vars = BTreeMap::new();
        output_vars.insert("Tracer".to_string(), "Tracer".to_string());
        RunConfig {
            grid_proj: Some("lcc".to_string()),
            nx: 3,
            ny: 1,
            nz: 1,
            dx: 1000.0,
            dy: 1000.0,
            cfl_safety_factor: 0.9,
            nests: NestSchedule::default(),
            mutation: inmap_core::config::MutationSchedule { interval_seconds: 1e12,..Default::default() },
            convergence: inmap_core::config::ConvergenceConfig { num_iterations: 5,..Default::default() },
            output_vars,
            output_all_layers: false,
        }
    }

    #[test]
    fn unit_source_produces_nonzero_response_downwind() {
        let ctm = CtmData::uniform(3, 1, 1, 1000.0, 1000.0, 100.0, 2.0, 0.0);
        let grid = build_grid(&ctm, &TrivialChem::new(), vec![], vec![], &[], &[], &NestSchedule::default()).unwrap();
        let receptor_ids: Vec<CellId> = grid.layer_cells(0).to_vec();
        let factory: MechanismFactory = Arc::new(|| Box::new(TrivialChem::new()));

        let row = run_source_job(&grid, &ctm, &factory, &sample_config(), 0, 0, &receptor_ids).unwrap();
        assert_eq!(row.len(), receptor_ids.len());
        assert!(row.iter().any(|&v| v > 0.0), "expected at least one nonzero receptor response, got {row:?}");
    }

    #[test]
    fn source_footprint_matches_base_lattice_cell() {
        let ctm = CtmData::uniform(2, 2, 1, 1000.0, 1000.0, 100.0, 0.0, 0.0);
        let footprint = source_footprint(&ctm, 1);
        use geo::BoundingRect;
        let rect = footprint.bounding_rect().unwrap();
        assert!((rect.min().x - 1000.0).abs() < 1e-9);
        assert!((rect.min().y - 0.0).abs() < 1e-9);
    }
}
