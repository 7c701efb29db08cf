//! The operator kernel: an ordered composition of [`CellManipulator`]s
//! applied to every cell each iteration.
//!
//! Represented as a list of trait-object manipulators applied, in
//! order, to every cell. Each manipulator reads only a frozen
//! [`CiSnapshot`] (every cell's `Ci` at the start of the iteration) and
//! writes only to its own cell's `Cf`, a whole-grid double-buffer
//! rather than a per-cell swap, since neighbor reads must stay frozen
//! across all seven manipulators within one iteration, not just across
//! one pass.

mod advection;
mod chemistry;
mod drydep;
mod emissions;
mod meander;
mod mixing;
mod wetdep;

pub use advection::Advection;
pub use chemistry::Chemistry;
pub use drydep::{derive_deposition_velocity, DryDeposition, LandUseCategory, Season};
pub use meander::MeanderMixing;
pub use mixing::EddyMixing;
pub use wetdep::{derive_scavenging_coefficient, WetDeposition};

use crate::cell::{Cell, CellId, Meteorology};
use crate::ctmdata::CtmData;
use crate::mechanism::Mechanism;
use crate::units::{Concentration, MetersPerSecond, PerSecond, Seconds};
use rayon::prelude::*;

/// A read-only, whole-grid snapshot of every cell's `Ci` and
/// meteorology, captured once at the start of an iteration. Manipulators
/// index into it by [`CellId`] to read neighbor concentrations and wind
/// fields while writing only to their own cell's `Cf`, which is what
/// makes a `par_iter_mut` pass over `Cell`s race-free without per-cell
/// locks. Meteorology is immutable for the whole run once
/// sampled, so snapshotting it alongside `Ci` costs nothing in
/// correctness and lets advection read a neighbor's wind without
/// aliasing the cell slice being mutated.
pub struct CiSnapshot {
    by_id: Vec<Vec<Concentration>>,
    met_by_id: Vec<Meteorology>,
}

impl CiSnapshot {
    #[must_use]
    pub fn capture(cells: &[Cell]) -> Self {
        let mut by_id = vec![Vec::new(); cells.len()];
        let mut met_by_id = vec![Meteorology::default(); cells.len()];
        for cell in cells {
            by_id[cell.id as usize] = cell.ci.clone();
            met_by_id[cell.id as usize] = cell.met;
        }
        CiSnapshot { by_id, met_by_id }
    }

    #[must_use]
    pub fn get(&self, id: CellId, species: usize) -> Concentration {
        self.by_id[id as usize][species]
    }

    #[must_use]
    pub fn met(&self, id: CellId) -> Meteorology {
        self.met_by_id[id as usize]
    }
}

/// Derive per-species dry-deposition velocities and wet-scavenging
/// coefficients for a cell at its centroid, sampling land-use/season from
/// `ctm` and per-species rate parameters from `mechanism`. Called at
/// grid build time and again whenever a cell's footprint or meteorology
/// changes (split/merge), since both a cell's position and its sampled
/// meteorology can shift.
#[must_use]
pub fn derive_cell_deposition_params(
    ctm: &CtmData,
    mechanism: &dyn Mechanism,
    centroid_x: f64,
    centroid_y: f64,
    met: &Meteorology,
    n_species: usize,
) -> (Vec<MetersPerSecond>, Vec<PerSecond>) {
    let land_use = ctm.land_use_at(centroid_x, centroid_y);
    let season = ctm.season();
    let mut v_dep = Vec::with_capacity(n_species);
    let mut scavenging = Vec::with_capacity(n_species);
    for s in 0..n_species {
        let diffusivity_ratio = mechanism.species_diffusivity_ratio(s);
        v_dep.push(MetersPerSecond::new(drydep::derive_deposition_velocity(
            met.friction_velocity,
            met.monin_obukhov_length,
            diffusivity_ratio,
            land_use,
            season,
        )));

        let (in_cloud_rate, sub_cloud_rate) = mechanism.scavenging_rates(s);
        scavenging.push(PerSecond::new(wetdep::derive_scavenging_coefficient(
            met.cloud_fraction,
            met.rain_rate,
            in_cloud_rate,
            sub_cloud_rate,
        )));
    }
    (v_dep, scavenging)
}

/// One step of the operator kernel: `(cell, Δt) -> cell'`, reading only
/// [`CiSnapshot`] and the cell's own fields, writing only `cell.cf`.
pub trait CellManipulator: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, cell: &mut Cell, ci: &CiSnapshot, mechanism: &dyn Mechanism, dt: Seconds);
}

/// The required manipulator order: emissions, advection, eddy mixing,
/// meander mixing, dry deposition, wet deposition, chemistry.
#[must_use]
pub fn default_manipulators() -> Vec<Box<dyn CellManipulator>> {
    vec![
        Box::new(emissions::AddEmissions),
        Box::new(Advection),
        Box::new(EddyMixing),
        Box::new(MeanderMixing),
        Box::new(DryDeposition),
        Box::new(WetDeposition),
        Box::new(Chemistry),
    ]
}

/// Apply one whole iteration: capture the `Ci` snapshot, run every
/// manipulator over every cell in parallel, in the fixed order, then
/// swap buffers. Each manipulator is a synchronization
/// barrier: every cell finishes manipulator N before any cell starts
/// N+1, because each manipulator's `par_iter_mut` pass is a rayon
/// barrier by construction.
pub fn run_iteration(
    cells: &mut [Cell],
    mechanism: &dyn Mechanism,
    manipulators: &[Box<dyn CellManipulator>],
    dt: Seconds,
) {
    let ci = CiSnapshot::capture(cells);
    for manipulator in manipulators {
        cells
.par_iter_mut()
.for_each(|cell| manipulator.apply(cell, &ci, mechanism, dt));
    }
    for cell in cells.iter_mut() {
        cell.swap_buffers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{Cell, Meteorology};
    use crate::geom::rect;
    use crate::mechanism::TrivialChem;
    use crate::units::{MetersPerSecond, PerSecond, VolumetricFlux};

    fn flat_cell(id: CellId, conc: f64) -> Cell {
        Cell {
            id,
            layer: 0,
            geom: rect(0.0, 0.0, 1000.0, 1000.0),
            z_bottom: 0.0,
            z_top: 50.0,
            dx: 1000.0,
            dy: 1000.0,
            dz: 50.0,
            volume: 1000.0 * 1000.0 * 50.0,
            cf: vec![Concentration::new(conc)],
            ci: vec![Concentration::new(conc)],
            emis_flux: vec![VolumetricFlux::new(0.0)],
            met: Meteorology::default(),
            v_dep: vec![MetersPerSecond::new(0.0)],
            scavenging: vec![PerSecond::new(0.0)],
            population: Default::default(),
            mortality: Default::default(),
            west: vec![],
            east: vec![],
            south: vec![],
            north: vec![],
            below: vec![],
            above: vec![],
        }
    }

    #[test]
    fn run_iteration_swaps_buffers_after_all_manipulators() {
        let mut cells = vec![flat_cell(0, 1.0)];
        let mechanism = TrivialChem::new();
        let manipulators = default_manipulators();
        run_iteration(&mut cells, &mechanism, &manipulators, Seconds::new(10.0));
        assert_eq!(cells[0].ci[0].value(), cells[0].cf[0].value());
    }

    #[test]
    fn isolated_cell_with_no_wind_or_diffusion_is_unchanged_by_transport() {
        let mut cells = vec![flat_cell(0, 5.0)];
        let mechanism = TrivialChem::new();
        let manipulators = default_manipulators();
        run_iteration(&mut cells, &mechanism, &manipulators, Seconds::new(60.0));
        assert!((cells[0].cf[0].value() - 5.0).abs() < 1e-9);
    }
}
