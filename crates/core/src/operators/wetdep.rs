use super::{CellManipulator, CiSnapshot};
use crate::cell::Cell;
use crate::mechanism::Mechanism;
use crate::units::Seconds;

/// Manipulator 6: wet deposition, `Cf *= exp(-w*dt)` per
/// species. The per-species scavenging coefficient lives on the
/// [`Mechanism`], same rationale as [`super::DryDeposition`].
pub struct WetDeposition;

impl CellManipulator for WetDeposition {
    fn name(&self) -> &'static str {
        "wet_deposition"
    }

    fn apply(&self, cell: &mut Cell, _ci: &CiSnapshot, mechanism: &dyn Mechanism, dt: Seconds) {
        mechanism.wet_dep(cell, dt);
    }
}

/// Derive an EMEP-style wet-scavenging coefficient (1/s) at grid-build
/// time: in-cloud scavenging scaled by cloud fraction plus sub-cloud
/// scavenging scaled by rain mixing ratio.
#[must_use]
pub fn derive_scavenging_coefficient(
    cloud_fraction: f64,
    rain_rate: f64,
    in_cloud_rate: f64,
    sub_cloud_rate: f64,
) -> f64 {
    let in_cloud = in_cloud_rate * cloud_fraction;
    let sub_cloud = sub_cloud_rate * rain_rate.max(0.0).powf(0.64);
    in_cloud + sub_cloud
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{Cell, Meteorology};
    use crate::geom::rect;
    use crate::mechanism::{Mechanism, TrivialChem};
    use crate::operators::CiSnapshot;
    use crate::units::{Concentration, MetersPerSecond, PerSecond, VolumetricFlux};

    #[test]
    fn no_rain_or_cloud_gives_zero_scavenging() {
        let w = derive_scavenging_coefficient(0.0, 0.0, 1e-4, 1e-4);
        assert_eq!(w, 0.0);
    }

    #[test]
    fn heavier_rain_increases_scavenging() {
        let light = derive_scavenging_coefficient(0.5, 1.0, 1e-4, 1e-4);
        let heavy = derive_scavenging_coefficient(0.5, 10.0, 1e-4, 1e-4);
        assert!(heavy > light);
    }

    #[test]
    fn wet_deposition_decays_concentration_when_scavenging_is_positive() {
        let mech = TrivialChem::new();
        let mut cell = Cell {
            id: 0,
            layer: 0,
            geom: rect(0.0, 0.0, 10.0, 10.0),
            z_bottom: 0.0,
            z_top: 10.0,
            dx: 10.0,
            dy: 10.0,
            dz: 10.0,
            volume: 1000.0,
            cf: vec![Concentration::new(10.0)],
            ci: vec![Concentration::new(10.0)],
            emis_flux: vec![VolumetricFlux::new(0.0)],
            met: Meteorology::default(),
            v_dep: vec![MetersPerSecond::new(0.0)],
            scavenging: vec![PerSecond::new(1e-4)],
            population: Default::default(),
            mortality: Default::default(),
            west: vec![],
            east: vec![],
            south: vec![],
            north: vec![],
            below: vec![],
            above: vec![],
        };
        let ci = CiSnapshot::capture(std::slice::from_ref(&cell));
        WetDeposition.apply(&mut cell, &ci, &mech, Seconds::new(3600.0));
        assert!(cell.cf[0].value() < 10.0);
    }
}
