use super::{CellManipulator, CiSnapshot};
use crate::cell::{Cell, Direction};
use crate::cfl::face_area_ratio;
use crate::mechanism::Mechanism;
use crate::units::{Concentration, Seconds};

/// Manipulator 2: upwind advection. For each direction,
/// accumulate into `Cf` the upwind flux using the face-averaged
/// velocity and the upwind neighbor's `Ci`, weighted by the shared-face
/// fraction and `min(A_up/A_down, 1)`.
pub struct Advection;

/// `+1` if `d`'s outward face normal points along the positive axis
/// direction, `-1` otherwise. Used to turn a signed axis velocity into
/// a signed face-normal velocity (positive = outflow through this
/// face).
fn outward_sign(dir: Direction) -> f64 {
    match dir {
        Direction::East | Direction::North | Direction::Above => 1.0,
        Direction::West | Direction::South | Direction::Below => -1.0,
    }
}

fn axis_velocity(cell: &Cell, dir: Direction) -> f64 {
    axis_velocity_of(&cell.met, dir)
}

fn axis_velocity_of(met: &crate::cell::Meteorology, dir: Direction) -> f64 {
    match dir {
        Direction::West | Direction::East => met.u,
        Direction::South | Direction::North => met.v,
        Direction::Below | Direction::Above => met.w,
    }
}

fn axis_length(cell: &Cell, dir: Direction) -> f64 {
    match dir {
        Direction::West | Direction::East => cell.dx,
        Direction::South | Direction::North => cell.dy,
        Direction::Below | Direction::Above => cell.dz,
    }
}

impl CellManipulator for Advection {
    fn name(&self) -> &'static str {
        "advection"
    }

    fn apply(&self, cell: &mut Cell, ci: &CiSnapshot, mechanism: &dyn Mechanism, dt: Seconds) {
        let dt_s = dt.value();
        let n_species = mechanism.len();

        for &dir in &Direction::ALL {
            let neighbors = cell.neighbors(dir).to_vec();
            if neighbors.is_empty() {
                continue;
            }
            let length = axis_length(cell, dir);
            let area_ratio = face_area_ratio(cell, dir);

            for link in neighbors {
                // Face-averaged velocity: the mean of this cell's and
                // the neighbor's velocity component along this axis,
                // which is the same number (up to float commutativity)
                // whichever side computes it, so the flux this cell
                // adds and the flux the neighbor subtracts are equal in
                // magnitude.
                let neighbor_met = ci.met(link.id);
                let neighbor_vel = axis_velocity_of(&neighbor_met, dir);
                let face_vel = 0.5 * (axis_velocity(cell, dir) + neighbor_vel);
                let normal_vel = outward_sign(dir) * face_vel;

                for s in 0..n_species {
                    let upwind_c = if normal_vel >= 0.0 {
                        cell.ci[s]
                    } else {
                        ci.get(link.id, s)
                    };
                    let flux = normal_vel.abs()
                        * upwind_c.value()
                        * link.fraction
                        * area_ratio
                        * dt_s
                        / length;
                    let delta = if normal_vel >= 0.0 { -flux } else { flux };
                    cell.cf[s] += Concentration::new(delta);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{Cell, Meteorology, NeighborLink};
    use crate::geom::rect;
    use crate::mechanism::{Mechanism, TrivialChem};
    use crate::operators::CiSnapshot;
    use crate::units::{MetersPerSecond, PerSecond, VolumetricFlux};

    fn cell_with(id: u32, conc: f64, u: f64) -> Cell {
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
            met: Meteorology { u,..Meteorology::default() },
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
    fn no_neighbors_means_no_advective_change() {
        let mut cell = cell_with(0, 5.0, 3.0);
        let ci = CiSnapshot::capture(std::slice::from_ref(&cell));
        let mech = TrivialChem::new();
        Advection.apply(&mut cell, &ci, &mech, Seconds::new(10.0));
        assert_eq!(cell.cf[0].value(), 5.0);
    }

    #[test]
    fn positive_eastward_wind_drains_cell_with_east_neighbor() {
        let mut upwind = cell_with(0, 10.0, 2.0);
        upwind.east = vec![NeighborLink { id: 1, fraction: 1.0, face_area: upwind.dy * upwind.dz }];
        let downwind = cell_with(1, 0.0, 2.0);
        let cells = vec![upwind.clone(), downwind];
        let ci = CiSnapshot::capture(&cells);
        let mech = TrivialChem::new();
        let mut upwind_mut = cells[0].clone();
        Advection.apply(&mut upwind_mut, &ci, &mech, Seconds::new(10.0));
        assert!(upwind_mut.cf[0].value() < 10.0);
    }
}
