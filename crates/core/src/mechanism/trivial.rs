//! A single-species inert tracer mechanism, for unit and integration
//! tests that need to check transport/mass-conservation properties
//! without the chemistry layer's nonlinearity.

use super::Mechanism;
use crate::cell::Cell;
use crate::units::Seconds;

pub struct TrivialChem {
    names: Vec<String>,
}

impl Default for TrivialChem {
    fn default() -> Self {
        TrivialChem {
            names: vec!["Tracer".to_string()],
        }
    }
}

impl TrivialChem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Mechanism for TrivialChem {
    fn len(&self) -> usize {
        1
    }

    fn species(&self) -> &[String] {
        &self.names
    }

    fn add_emis_flux(&self, cell: &mut Cell, dt: Seconds) {
        cell.cf[0] += crate::units::Concentration::new(cell.emis_flux[0].value() * dt.value());
    }

    fn dry_dep(&self, cell: &mut Cell, dt: Seconds) {
        if !cell.is_bottom_layer() {
            return;
        }
        let vd = cell.v_dep[0].value();
        if vd <= 0.0 {
            return;
        }
        let decay = (-vd * dt.value() / cell.dz).exp();
        cell.cf[0] = crate::units::Concentration::new(cell.cf[0].value() * decay);
    }

    fn wet_dep(&self, cell: &mut Cell, dt: Seconds) {
        let w = cell.scavenging[0].value();
        if w <= 0.0 {
            return;
        }
        let decay = (-w * dt.value()).exp();
        cell.cf[0] = crate::units::Concentration::new(cell.cf[0].value() * decay);
    }

    /// Inert: no reactions.
    fn chemistry(&self, _cell: &mut Cell, _dt: Seconds) {}

    fn value(&self, cell: &Cell, var: &str) -> Option<f64> {
        if var == "Tracer" {
            Some(cell.cf[0].value())
        } else {
            None
        }
    }

    fn units(&self, var: &str) -> Option<&'static str> {
        if var == "Tracer" {
            Some("ug/m3")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{Cell, Meteorology};
    use crate::geom::rect;
    use crate::units::{Concentration, MetersPerSecond, PerSecond, VolumetricFlux};

    fn cell_with(tracer: f64) -> Cell {
        Cell {
            id: 0,
            layer: 0,
            geom: rect(0.0, 0.0, 10.0, 10.0),
            z_bottom: 0.0,
            z_top: 10.0,
            dx: 10.0,
            dy: 10.0,
            dz: 10.0,
            volume: 1000.0,
            cf: vec![Concentration::new(tracer)],
            ci: vec![Concentration::ZERO],
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
    fn chemistry_is_a_no_op() {
        let mech = TrivialChem::new();
        let mut cell = cell_with(5.0);
        mech.chemistry(&mut cell, Seconds::new(3600.0));
        assert_eq!(cell.cf[0].value(), 5.0);
    }

    #[test]
    fn single_species_named_tracer() {
        let mech = TrivialChem::new();
        assert_eq!(mech.len(), 1);
        assert_eq!(mech.species(), &["Tracer".to_string()]);
    }

    #[test]
    fn emission_flux_adds_to_cf() {
        let mech = TrivialChem::new();
        let mut cell = cell_with(0.0);
        cell.emis_flux[0] = VolumetricFlux::new(2.0);
        mech.add_emis_flux(&mut cell, Seconds::new(10.0));
        assert!((cell.cf[0].value() - 20.0).abs() < 1e-9);
    }
}
