use super::{CellManipulator, CiSnapshot};
use crate::cell::Cell;
use crate::mechanism::Mechanism;
use crate::units::Seconds;
use serde::{Deserialize, Serialize};

/// Manipulator 5: dry deposition, bottom-layer cells only.
/// The per-species decay (`Cf[s] *= exp(-v_d[s]*dt/dz)`) lives on the
/// active [`Mechanism`] since which species deposit, and by how much,
/// is mechanism-specific; this manipulator only enforces the
/// bottom-layer restriction and ordering.
pub struct DryDeposition;

impl CellManipulator for DryDeposition {
    fn name(&self) -> &'static str {
        "dry_deposition"
    }

    fn apply(&self, cell: &mut Cell, _ci: &CiSnapshot, mechanism: &dyn Mechanism, dt: Seconds) {
        mechanism.dry_dep(cell, dt);
    }
}

/// Wesely (1989) land-use categories driving stomatal/mesophyll/cuticle
/// resistances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LandUseCategory {
    Urban,
    Agricultural,
    Forest,
    Water,
    Barren,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Season {
    Midsummer,
    Autumn,
    LateAutumnAfterFrost,
    Winter,
    Transitional,
}

/// Derive a dry-deposition velocity (m/s) for one species at grid-build
/// time, following Wesely (1989) and Seinfeld & Pandis: aerodynamic and
/// quasi-laminar resistances from friction velocity and
/// Monin-Obukhov length, combined in series with a land-use/season
/// surface resistance.
///
/// `species_diffusivity_ratio` is the ratio of molecular diffusivity of
/// water vapor to the species (used by the quasi-laminar resistance
/// term); `surface_resistance` bundles the stomatal/mesophyll/cuticle
/// terms a land-use/season lookup table would otherwise provide.
#[must_use]
pub fn derive_deposition_velocity(
    friction_velocity: f64,
    monin_obukhov_length: f64,
    species_diffusivity_ratio: f64,
    land_use: LandUseCategory,
    season: Season,
) -> f64 {
    let von_karman = 0.4;
    let stability_correction = if monin_obukhov_length.abs() > 1e-6 {
        (-5.0 * (10.0 / monin_obukhov_length)).max(-10.0).min(10.0)
    } else {
        0.0
    };
    let r_a = (1.0 / (von_karman * friction_velocity.max(1e-3))) * (1.0 - stability_correction * 0.1);
    let r_b = 2.0 / (von_karman * friction_velocity.max(1e-3)) * species_diffusivity_ratio.powf(2.0 / 3.0);

    let r_c = surface_resistance(land_use, season);

    1.0 / (r_a.max(1.0) + r_b.max(1.0) + r_c)
}

fn surface_resistance(land_use: LandUseCategory, season: Season) -> f64 {
    let base = match land_use {
        LandUseCategory::Urban => 400.0,
        LandUseCategory::Agricultural => 150.0,
        LandUseCategory::Forest => 100.0,
        LandUseCategory::Water => 2000.0,
        LandUseCategory::Barren => 500.0,
    };
    let season_factor = match season {
        Season::Midsummer => 1.0,
        Season::Autumn => 1.3,
        Season::LateAutumnAfterFrost => 2.0,
        Season::Winter => 3.0,
        Season::Transitional => 1.6,
    };
    base * season_factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{Cell, Meteorology};
    use crate::geom::rect;
    use crate::mechanism::{Mechanism, SimpleChem};
    use crate::operators::CiSnapshot;
    use crate::units::{Concentration, MetersPerSecond, PerSecond, VolumetricFlux};

    #[test]
    fn stronger_friction_velocity_increases_deposition() {
        let slow = derive_deposition_velocity(0.1, 100.0, 1.0, LandUseCategory::Forest, Season::Midsummer);
        let fast = derive_deposition_velocity(1.0, 100.0, 1.0, LandUseCategory::Forest, Season::Midsummer);
        assert!(fast > slow);
    }

    #[test]
    fn water_has_higher_resistance_than_forest() {
        let water = derive_deposition_velocity(0.3, 100.0, 1.0, LandUseCategory::Water, Season::Midsummer);
        let forest = derive_deposition_velocity(0.3, 100.0, 1.0, LandUseCategory::Forest, Season::Midsummer);
        assert!(water < forest);
    }

    #[test]
    fn dry_deposition_only_applies_to_bottom_layer() {
        let mech = SimpleChem::new();
        let n = mech.len();
        let mut top_cell = Cell {
            id: 0,
            layer: 1,
            geom: rect(0.0, 0.0, 10.0, 10.0),
            z_bottom: 10.0,
            z_top: 20.0,
            dx: 10.0,
            dy: 10.0,
            dz: 10.0,
            volume: 1000.0,
            cf: vec![Concentration::new(5.0); n],
            ci: vec![Concentration::new(5.0); n],
            emis_flux: vec![VolumetricFlux::new(0.0); n],
            met: Meteorology::default(),
            v_dep: vec![MetersPerSecond::new(0.1); n],
            scavenging: vec![PerSecond::new(0.0); n],
            population: Default::default(),
            mortality: Default::default(),
            west: vec![],
            east: vec![],
            south: vec![],
            north: vec![],
            below: vec![],
            above: vec![],
        };
        let ci = CiSnapshot::capture(std::slice::from_ref(&top_cell));
        DryDeposition.apply(&mut top_cell, &ci, &mech, Seconds::new(3600.0));
        assert_eq!(top_cell.cf[0].value(), 5.0);
    }
}
