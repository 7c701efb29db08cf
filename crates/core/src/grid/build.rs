//! Grid construction: the three build phases plus static refinement.
//!
//! Bootstraps a regular lattice (one cell per CTM sample, sampled
//! meteorology baked in at construction) then recursively splits
//! columns that exceed a population or density threshold, following
//! the `Xnests`/`Ynests` per-level schedule.

use super::population::{apportion_mortality, apportion_population, AttributeRecord};
use super::mutate::split_cell;
use super::Grid;
use crate::cell::{Cell, CellId, Direction};
use crate::config::NestSchedule;
use crate::ctmdata::CtmData;
use crate::error::GridError;
use crate::geom::rect;
use crate::mechanism::Mechanism;
use crate::operators::derive_cell_deposition_params;
use crate::units::{Concentration, VolumetricFlux};
use geo::Centroid;
use rustc_hash::FxHashMap;

/// Build a fully-wired `Grid` from a CTM lattice and demographic
/// records: regular base grid, population/mortality apportionment,
/// neighbor wiring, then static refinement per `nests`.
///
/// # Errors
/// Returns a [`GridError`] if the resulting grid fails invariant
/// checking.
pub fn build_grid(
    ctm: &CtmData,
    mechanism: &dyn Mechanism,
    population_columns: Vec<String>,
    mortality_columns: Vec<String>,
    population_records: &[AttributeRecord],
    mortality_records: &[AttributeRecord],
    nests: &NestSchedule,
) -> Result<Grid, GridError> {
    let n_species = mechanism.len();
    let mut grid = Grid::empty(population_columns, mortality_columns);

    // Phase 1: regular base grid, one cell per (ix, iy, iz) lattice node.
    let mut by_index: FxHashMap<(usize, usize, usize), CellId> = FxHashMap::default();
    for iz in 0..ctm.nz() {
        let (z_bottom, z_top) = ctm.layer_extent(iz);
        for iy in 0..ctm.ny {
            for ix in 0..ctm.nx {
                let x0 = ctm.origin_x + ix as f64 * ctm.dx;
                let y0 = ctm.origin_y + iy as f64 * ctm.dy;
                let x1 = x0 + ctm.dx;
                let y1 = y0 + ctm.dy;
                let centroid_x = (x0 + x1) / 2.0;
                let centroid_y = (y0 + y1) / 2.0;
                let met = ctm.sample(centroid_x, centroid_y, iz);
                let dz = z_top - z_bottom;
                let (v_dep, scavenging) = derive_cell_deposition_params(
                    ctm,
                    mechanism,
                    centroid_x,
                    centroid_y,
                    &met,
                    n_species,
                );

                let cell = Cell {
                    id: 0,
                    layer: iz,
                    geom: rect(x0, y0, x1, y1),
                    z_bottom,
                    z_top,
                    dx: ctm.dx,
                    dy: ctm.dy,
                    dz,
                    volume: ctm.dx * ctm.dy * dz,
                    cf: vec![Concentration::ZERO; n_species],
                    ci: vec![Concentration::ZERO; n_species],
                    emis_flux: vec![VolumetricFlux::new(0.0); n_species],
                    met,
                    v_dep,
                    scavenging,
                    population: Default::default(),
                    mortality: Default::default(),
                    west: vec![],
                    east: vec![],
                    south: vec![],
                    north: vec![],
                    below: vec![],
                    above: vec![],
                };
                let id = grid.insert(cell);
                by_index.insert((ix, iy, iz), id);
            }
        }
    }

    // Phase 2: attribute population/mortality. Census and mortality
    // geometry is 2-D, so only the surface (layer 0) carries these
    // columns; "column population" for static refinement below is read
    // back from the layer-0 footprint.
    for iy in 0..ctm.ny {
        for ix in 0..ctm.nx {
            let id = by_index[&(ix, iy, 0)];
            if let Some(cell) = grid.cell_mut(id) {
                apportion_population(cell, population_records);
                apportion_mortality(cell, mortality_records);
            }
        }
    }

    // Phase 3: neighbor wiring by lattice adjacency. Fractions are 1.0
    // since the base grid is a regular lattice (no partial overlaps).
    for iz in 0..ctm.nz() {
        for iy in 0..ctm.ny {
            for ix in 0..ctm.nx {
                let &id = &by_index[&(ix, iy, iz)];
                let dz = grid.cell(id).map(|c| c.dz).unwrap_or(0.0);

                if ix + 1 < ctm.nx {
                    let east_id = by_index[&(ix + 1, iy, iz)];
                    wire_pair(&mut grid, id, east_id, Direction::East, ctm.dy * dz);
                }
                if iy + 1 < ctm.ny {
                    let north_id = by_index[&(ix, iy + 1, iz)];
                    wire_pair(&mut grid, id, north_id, Direction::North, ctm.dx * dz);
                }
                if iz + 1 < ctm.nz() {
                    let above_id = by_index[&(ix, iy, iz + 1)];
                    wire_pair(&mut grid, id, above_id, Direction::Above, ctm.dx * ctm.dy);
                }
            }
        }
    }

    apply_static_refinement(&mut grid, ctm, mechanism, nests);

    grid.check_invariants()?;
    Ok(grid)
}

fn wire_pair(grid: &mut Grid, a: CellId, b: CellId, a_to_b: Direction, face_area: f64) {
    if let Some(cell) = grid.cell_mut(a) {
        cell.neighbors_mut(a_to_b).push(crate::cell::NeighborLink { id: b, fraction: 1.0, face_area });
    }
    if let Some(cell) = grid.cell_mut(b) {
        cell.neighbors_mut(a_to_b.opposite()).push(crate::cell::NeighborLink { id: a, fraction: 1.0, face_area });
    }
}

/// Static refinement: recursively split hi-res-layer cells exceeding the
/// population or density threshold, one nest level at a time.
/// Terminates when a level produces no splits or the nest schedule runs
/// out.
fn apply_static_refinement(grid: &mut Grid, ctm: &CtmData, mechanism: &dyn Mechanism, nests: &NestSchedule) {
    if nests.hi_res_layers == 0 {
        return;
    }
    let levels = nests.x_nests.len().min(nests.y_nests.len());
    for level in 0..levels {
        let nx = nests.x_nests[level];
        let ny = nests.y_nests[level];
        if nx == 0 || ny == 0 {
            continue;
        }

        let candidates: Vec<CellId> = grid
.live_cells()
.iter()
.filter(|c| c.layer < nests.hi_res_layers)
.filter(|c| meets_split_criterion(grid, c, nests))
.map(|c| c.id)
.collect();

        if candidates.is_empty() {
            break;
        }
        for id in candidates {
            if grid.cell(id).is_some() {
                split_cell(grid, id, nx, ny, ctm, mechanism);
            }
        }
    }
}

fn meets_split_criterion(grid: &Grid, cell: &Cell, nests: &NestSchedule) -> bool {
    let pop = column_population(grid, cell);
    if pop > nests.pop_threshold {
        return true;
    }
    let area = cell.dx * cell.dy;
    if area <= 0.0 {
        return false;
    }
    pop / area > nests.pop_density_threshold
}

/// The population of the layer-0 cell sharing this cell's footprint,
/// used as the "column population" in the split criteria.
fn column_population(grid: &Grid, cell: &Cell) -> f64 {
    let Some(centroid) = cell.geom.centroid() else { return 0.0 };
    grid.point_query(centroid.x(), centroid.y(), 0)
.and_then(|id| grid.cell(id))
.map(Cell::total_population)
.unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mechanism::{SimpleChem, TrivialChem};

    fn census(x0: f64, y0: f64, x1: f64, y1: f64, total: f64) -> AttributeRecord {
        let mut values = std::collections::BTreeMap::new();
        values.insert("total".to_string(), total);
        AttributeRecord { geom: rect(x0, y0, x1, y1), values }
    }

    #[test]
    fn base_grid_has_one_cell_per_lattice_node() {
        let ctm = CtmData::uniform(3, 2, 2, 1000.0, 1000.0, 100.0, 1.0, 0.0);
        let grid = build_grid(&ctm, &TrivialChem::new(), vec![], vec![], &[], &[], &NestSchedule::default()).unwrap();
        assert_eq!(grid.len(), 3 * 2 * 2);
    }

    #[test]
    fn population_is_only_apportioned_to_bottom_layer() {
        let ctm = CtmData::uniform(2, 2, 2, 1000.0, 1000.0, 100.0, 1.0, 0.0);
        let records = vec![census(0.0, 0.0, 2000.0, 2000.0, 4000.0)];
        let grid = build_grid(&ctm, &TrivialChem::new(), vec!["total".to_string()], vec![], &records, &[], &NestSchedule::default()).unwrap();

        let bottom_total: f64 = grid.layer_cells(0).iter().filter_map(|&id| grid.cell(id)).map(Cell::total_population).sum();
        let upper_total: f64 = grid.layer_cells(1).iter().filter_map(|&id| grid.cell(id)).map(Cell::total_population).sum();
        assert!((bottom_total - 4000.0).abs() < 1e-6);
        assert_eq!(upper_total, 0.0);
    }

    #[test]
    fn built_grid_passes_invariant_check() {
        let ctm = CtmData::uniform(4, 3, 2, 1000.0, 1000.0, 100.0, 2.0, -1.0);
        let grid = build_grid(&ctm, &SimpleChem::new(), vec![], vec![], &[], &[], &NestSchedule::default()).unwrap();
        assert!(grid.check_invariants().is_ok());
    }

    #[test]
    fn dense_cell_is_refined_per_nest_schedule() {
        let ctm = CtmData::uniform(2, 2, 1, 1000.0, 1000.0, 100.0, 1.0, 0.0);
        let records = vec![census(0.0, 0.0, 1000.0, 1000.0, 100_000.0)];
        let nests = NestSchedule {
            hi_res_layers: 1,
            pop_threshold: 50_000.0,
            pop_density_threshold: f64::INFINITY,
            x_nests: vec![2],
            y_nests: vec![2],
        };
        let grid = build_grid(&ctm, &TrivialChem::new(), vec!["total".to_string()], vec![], &records, &[], &nests).unwrap();
        // one of the four base cells (the dense one) split into 4, the
        // rest stayed whole: 3 + 4 = 7 layer-0 cells.
        assert_eq!(grid.layer_cells(0).len(), 7);
        assert!(grid.check_invariants().is_ok());
    }

    #[test]
    fn sparse_domain_is_left_unrefined() {
        let ctm = CtmData::uniform(2, 2, 1, 1000.0, 1000.0, 100.0, 1.0, 0.0);
        let nests = NestSchedule {
            hi_res_layers: 1,
            pop_threshold: 50_000.0,
            pop_density_threshold: f64::INFINITY,
            x_nests: vec![2],
            y_nests: vec![2],
        };
        let grid = build_grid(&ctm, &TrivialChem::new(), vec![], vec![], &[], &[], &nests).unwrap();
        assert_eq!(grid.layer_cells(0).len(), 4);
    }
}
