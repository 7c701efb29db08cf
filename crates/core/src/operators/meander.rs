use super::mixing::apply_diffusive_mixing;
use super::{CellManipulator, CiSnapshot};
use crate::cell::{Cell, Direction};
use crate::mechanism::Mechanism;
use crate::units::Seconds;

/// Manipulator 4: meander mixing, a horizontal diffusive
/// term parameterized on wind-direction variance, using the same
/// mass-preserving discretization as eddy mixing (3).
pub struct MeanderMixing;

/// Horizontal meander diffusivity derived from wind-direction standard
/// deviation: larger direction variance mixes a plume across a wider
/// horizontal swath. No vertical meander term (the source parameter is
/// inherently horizontal).
fn meander_diffusivity(met: &crate::cell::Meteorology, dir: Direction) -> f64 {
    match dir {
        Direction::West | Direction::East | Direction::South | Direction::North => {
            met.wind_direction_stddev * met.wind_direction_stddev * 10.0
        }
        Direction::Below | Direction::Above => 0.0,
    }
}

impl CellManipulator for MeanderMixing {
    fn name(&self) -> &'static str {
        "meander_mixing"
    }

    fn apply(&self, cell: &mut Cell, ci: &CiSnapshot, mechanism: &dyn Mechanism, dt: Seconds) {
        apply_diffusive_mixing(cell, ci, mechanism, dt, meander_diffusivity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{Cell, Meteorology, NeighborLink};
    use crate::geom::rect;
    use crate::mechanism::TrivialChem;
    use crate::operators::CiSnapshot;
    use crate::units::{Concentration, MetersPerSecond, PerSecond, VolumetricFlux};

    fn cell_with(id: u32, conc: f64, stddev: f64) -> Cell {
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
            met: Meteorology { wind_direction_stddev: stddev,..Meteorology::default() },
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
    fn zero_stddev_means_no_meander_mixing() {
        let mut a = cell_with(0, 10.0, 0.0);
        a.east = vec![NeighborLink { id: 1, fraction: 1.0, face_area: a.dy * a.dz }];
        let b = cell_with(1, 0.0, 0.0);
        let cells = vec![a.clone(), b];
        let ci = CiSnapshot::capture(&cells);
        let mech = TrivialChem::new();
        let mut a_mut = cells[0].clone();
        MeanderMixing.apply(&mut a_mut, &ci, &mech, Seconds::new(60.0));
        assert_eq!(a_mut.cf[0].value(), 10.0);
    }

    #[test]
    fn nonzero_stddev_spreads_mass_toward_neighbor() {
        let mut a = cell_with(0, 10.0, 0.5);
        a.east = vec![NeighborLink { id: 1, fraction: 1.0, face_area: a.dy * a.dz }];
        let b = cell_with(1, 0.0, 0.5);
        let cells = vec![a.clone(), b];
        let ci = CiSnapshot::capture(&cells);
        let mech = TrivialChem::new();
        let mut a_mut = cells[0].clone();
        MeanderMixing.apply(&mut a_mut, &ci, &mech, Seconds::new(60.0));
        assert!(a_mut.cf[0].value() < 10.0);
    }
}
