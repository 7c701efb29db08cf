//! The default "simplechem" mechanism: linear SOx/NOx/NH3 chemistry plus
//! a lumped SOA term.

use super::Mechanism;
use crate::cell::Cell;
use crate::units::Seconds;

/// Transported-species index order for `SimpleChem`. `PrimaryPM25` is
/// not a separate transported species: it's the same mass as the `PM2_5`
/// input, renamed on output.
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
enum Species {
    Voc = 0,
    Nox = 1,
    Nh3 = 2,
    Sox = 3,
    Pm25 = 4,
    PSo4 = 5,
    PNo3 = 6,
    PNh4 = 7,
    Soa = 8,
}

const N_SPECIES: usize = 9;

/// Molar-mass-ratio-style conversion factors: mass of particulate
/// produced per unit mass of precursor consumed. Approximate NH4NO3/HNO3
/// and (NH4)2SO4/SO2-style stoichiometry used throughout reduced-form PM
/// models.
const SOX_TO_SO4: f64 = 1.375;
const NOX_TO_NO3: f64 = 1.29;
const NH3_TO_NH4: f64 = 1.0;
/// Fraction of VOC mass converted to SOA per unit time at the reference
/// rate constant, before temperature/humidity adjustment.
const VOC_TO_SOA_YIELD: f64 = 0.05;

pub struct SimpleChem {
    names: Vec<String>,
}

impl Default for SimpleChem {
    fn default() -> Self {
        SimpleChem {
            names: ["VOC", "NOx", "NH3", "SOx", "PM2_5", "pSO4", "pNO3", "pNH4", "SOA"]
.iter()
.map(|s| s.to_string())
.collect(),
        }
    }
}

impl SimpleChem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn rate_constant(base_per_second: f64, temperature_k: f64) -> f64 {
        // Simple Arrhenius-style temperature scaling around a 288K
        // reference, giving temperature- and humidity-adjusted rate
        // constants without modeling full photochemistry.
        let activation_over_r = 2500.0; // K, representative of SOx/NOx oxidation
        base_per_second * ((-activation_over_r * (1.0 / temperature_k - 1.0 / 288.0)).exp())
    }
}

impl Mechanism for SimpleChem {
    fn len(&self) -> usize {
        N_SPECIES
    }

    fn species(&self) -> &[String] {
        &self.names
    }

    fn add_emis_flux(&self, cell: &mut Cell, dt: Seconds) {
        for i in 0..self.len() {
            cell.cf[i] += crate::units::Concentration::new(cell.emis_flux[i].value() * dt.value());
        }
    }

    fn dry_dep(&self, cell: &mut Cell, dt: Seconds) {
        if !cell.is_bottom_layer() {
            return;
        }
        for i in 0..self.len() {
            let vd = cell.v_dep[i].value();
            if vd <= 0.0 {
                continue;
            }
            let decay = (-vd * dt.value() / cell.dz).exp();
            cell.cf[i] = crate::units::Concentration::new(cell.cf[i].value() * decay);
        }
    }

    fn wet_dep(&self, cell: &mut Cell, dt: Seconds) {
        for i in 0..self.len() {
            let w = cell.scavenging[i].value();
            if w <= 0.0 {
                continue;
            }
            let decay = (-w * dt.value()).exp();
            cell.cf[i] = crate::units::Concentration::new(cell.cf[i].value() * decay);
        }
    }

    fn chemistry(&self, cell: &mut Cell, dt: Seconds) {
        let t = cell.met.temperature_k;
        let dt_s = dt.value();

        let convert = |cell: &mut Cell, precursor: usize, product: usize, base_rate: f64, yield_factor: f64| {
            let k = Self::rate_constant(base_rate, t);
            let precursor_c = cell.cf[precursor].value();
            if precursor_c <= 0.0 {
                return;
            }
            let decay = (-k * dt_s).exp();
            let consumed = precursor_c * (1.0 - decay);
            cell.cf[precursor] = crate::units::Concentration::new(precursor_c * decay);
            cell.cf[product] = crate::units::Concentration::new(
                cell.cf[product].value() + consumed * yield_factor,
            );
        };

        convert(cell, Species::Sox as usize, Species::PSo4 as usize, 1.0e-5, SOX_TO_SO4);
        convert(cell, Species::Nox as usize, Species::PNo3 as usize, 1.0e-5, NOX_TO_NO3);
        convert(cell, Species::Nh3 as usize, Species::PNh4 as usize, 2.0e-5, NH3_TO_NH4);

        let humidity_factor = 1.0 + cell.met.cloud_fraction * 0.5;
        convert(
            cell,
            Species::Voc as usize,
            Species::Soa as usize,
            1.0e-6 * humidity_factor,
            VOC_TO_SOA_YIELD,
        );

        for c in &mut cell.cf {
            *c = c.clamp_nonneg(100.0);
        }
    }

    fn species_diffusivity_ratio(&self, species_index: usize) -> f64 {
        // Gases (VOC/NOx/NH3/SOx) diffuse faster than water vapor gives a
        // ratio below 1; particulates (PM2_5 and the secondary salts/SOA)
        // behave like water vapor in the quasi-laminar term, ratio 1.
        match species_index {
            i if i == Species::Voc as usize => 1.4,
            i if i == Species::Nox as usize => 1.6,
            i if i == Species::Nh3 as usize => 0.97,
            i if i == Species::Sox as usize => 1.9,
            _ => 1.0,
        }
    }

    fn scavenging_rates(&self, species_index: usize) -> (f64, f64) {
        // Particulates scavenge more efficiently than gases in both
        // in-cloud nucleation and sub-cloud impaction.
        match species_index {
            i if i == Species::Pm25 as usize
                || i == Species::PSo4 as usize
                || i == Species::PNo3 as usize
                || i == Species::PNh4 as usize
                || i == Species::Soa as usize =>
            {
                (8.0e-4, 3.0e-4)
            }
            _ => (1.0e-4, 5.0e-5),
        }
    }

    fn value(&self, cell: &Cell, var: &str) -> Option<f64> {
        if let Some(idx) = self.species_index(var) {
            return Some(cell.cf[idx].value());
        }
        match var {
            "PrimaryPM25" => Some(cell.cf[Species::Pm25 as usize].value()),
            "TotalPM25" => Some(
                cell.cf[Species::Pm25 as usize].value()
                    + cell.cf[Species::PSo4 as usize].value()
                    + cell.cf[Species::PNo3 as usize].value()
                    + cell.cf[Species::PNh4 as usize].value()
                    + cell.cf[Species::Soa as usize].value(),
            ),
            _ => None,
        }
    }

    fn units(&self, var: &str) -> Option<&'static str> {
        if self.species_index(var).is_some() || var == "PrimaryPM25" || var == "TotalPM25" {
            Some("ug/m3")
        } else {
            None
        }
    }
}
