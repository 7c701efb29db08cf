//! The `Cell` control volume.
//!
//! A per-cell bundle of geometry, meteorology, and demographic scalars
//! with accessor methods. `Cell` carries a mechanism-sized concentration
//! vector rather than named per-species fields, because the species
//! list is a property of the active [`crate::mechanism::Mechanism`],
//! not of the cell type.

use crate::geom::Poly;
use crate::units::{Concentration, EmissionRate, MetersPerSecond, PerSecond, Seconds, VolumetricFlux};
use serde::{Deserialize, Serialize};

/// Stable arena handle for a [`Cell`]. Indices are reused only after a
/// merge/split epoch boundary (between iterations).
pub type CellId = u32;

/// The six neighbor directions a `Cell` links to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    West,
    East,
    South,
    North,
    Below,
    Above,
}

impl Direction {
    #[must_use]
    pub const fn opposite(self) -> Direction {
        match self {
            Direction::West => Direction::East,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::North => Direction::South,
            Direction::Below => Direction::Above,
            Direction::Above => Direction::Below,
        }
    }

    pub const ALL: [Direction; 6] = [
        Direction::West,
        Direction::East,
        Direction::South,
        Direction::North,
        Direction::Below,
        Direction::Above,
    ];
}

/// One (neighbor, fractional shared face area) edge. The fractions for a
/// given direction sum to 1 unless the face lies on the domain boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NeighborLink {
    pub id: CellId,
    pub fraction: f64,
    /// Face area of the neighbor on the shared boundary, used by upwind
    /// advection's `min(A_up/A_down, 1)` face-area ratio.
    pub face_area: f64,
}

/// Meteorological scalars sampled once from [`crate::ctmdata::CtmData`]
/// at build/mutation time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Meteorology {
    pub u: f64,
    pub v: f64,
    pub w: f64,
    pub kx: f64,
    pub ky: f64,
    pub kz: f64,
    pub boundary_layer_height: f64,
    pub monin_obukhov_length: f64,
    pub friction_velocity: f64,
    pub temperature_k: f64,
    pub density: f64,
    pub rain_rate: f64,
    pub cloud_fraction: f64,
    pub wind_direction_stddev: f64,
    pub s1: f64,
    pub s_class: f64,
}

impl Default for Meteorology {
    fn default() -> Self {
        Meteorology {
            u: 0.0,
            v: 0.0,
            w: 0.0,
            kx: 0.0,
            ky: 0.0,
            kz: 0.0,
            boundary_layer_height: 500.0,
            monin_obukhov_length: 100.0,
            friction_velocity: 0.3,
            temperature_k: 288.0,
            density: 1.2,
            rain_rate: 0.0,
            cloud_fraction: 0.0,
            wind_direction_stddev: 0.1,
            s1: 0.0,
            s_class: 0.0,
        }
    }
}

/// A 3-D control volume carrying per-species concentrations, meteorology,
/// emissions, neighbor links, and geometry. Spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    pub layer: usize,

    pub geom: Poly,
    pub z_bottom: f64,
    pub z_top: f64,

    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    pub volume: f64,

    /// Final (end-of-step) concentration vector, indexed by the active
    /// mechanism's species order.
    pub cf: Vec<Concentration>,
    /// Initial (start-of-step) concentration vector.
    pub ci: Vec<Concentration>,

    /// Per-species volumetric emission flux, derived once as
    /// `emission_rate / volume`.
    pub emis_flux: Vec<VolumetricFlux>,

    pub met: Meteorology,

    /// Per-species dry-deposition velocity (m/s), bottom layer only.
    pub v_dep: Vec<MetersPerSecond>,
    /// Per-species wet-scavenging coefficient (1/s).
    pub scavenging: Vec<PerSecond>,

    pub population: std::collections::BTreeMap<String, f64>,
    pub mortality: std::collections::BTreeMap<String, f64>,

    pub west: Vec<NeighborLink>,
    pub east: Vec<NeighborLink>,
    pub south: Vec<NeighborLink>,
    pub north: Vec<NeighborLink>,
    pub below: Vec<NeighborLink>,
    pub above: Vec<NeighborLink>,
}

impl Cell {
    #[must_use]
    pub fn neighbors(&self, dir: Direction) -> &[NeighborLink] {
        match dir {
            Direction::West => &self.west,
            Direction::East => &self.east,
            Direction::South => &self.south,
            Direction::North => &self.north,
            Direction::Below => &self.below,
            Direction::Above => &self.above,
        }
    }

    pub fn neighbors_mut(&mut self, dir: Direction) -> &mut Vec<NeighborLink> {
        match dir {
            Direction::West => &mut self.west,
            Direction::East => &mut self.east,
            Direction::South => &mut self.south,
            Direction::North => &mut self.north,
            Direction::Below => &mut self.below,
            Direction::Above => &mut self.above,
        }
    }

    /// `true` if this cell is in the bottom layer.
    #[must_use]
    pub fn is_bottom_layer(&self) -> bool {
        self.layer == 0
    }

    /// Total population across all demographic columns.
    #[must_use]
    pub fn total_population(&self) -> f64 {
        self.population.values().sum()
    }

    /// Set the per-cell emission rate (µg/s) for `species_index`,
    /// deriving the stored volumetric flux by dividing by `volume`.
    pub fn set_emission_rate(&mut self, species_index: usize, rate: EmissionRate) {
        self.emis_flux[species_index] = VolumetricFlux::new(rate.value() / self.volume);
    }

    /// `Ci = Cf` at the start of every step.
    pub fn swap_buffers(&mut self) {
        self.ci.clone_from(&self.cf);
    }

    /// Advance the time-origin timestamp implied by `Seconds` elapsing;
    /// a no-op placeholder kept so callers have a single seam to extend
    /// per-cell bookkeeping (e.g. persistent decay) without touching the
    /// manipulator call sites.
    pub fn tick(&mut self, _dt: Seconds) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::rect;

    fn test_cell(id: CellId, n_species: usize) -> Cell {
        Cell {
            id,
            layer: 0,
            geom: rect(0.0, 0.0, 100.0, 100.0),
            z_bottom: 0.0,
            z_top: 50.0,
            dx: 100.0,
            dy: 100.0,
            dz: 50.0,
            volume: 100.0 * 100.0 * 50.0,
            cf: vec![Concentration::ZERO; n_species],
            ci: vec![Concentration::ZERO; n_species],
            emis_flux: vec![VolumetricFlux::new(0.0); n_species],
            met: Meteorology::default(),
            v_dep: vec![MetersPerSecond::new(0.0); n_species],
            scavenging: vec![PerSecond::new(0.0); n_species],
            population: std::collections::BTreeMap::new(),
            mortality: std::collections::BTreeMap::new(),
            west: vec![],
            east: vec![],
            south: vec![],
            north: vec![],
            below: vec![],
            above: vec![],
        }
    }

    #[test]
    fn swap_buffers_copies_cf_into_ci() {
        let mut cell = test_cell(0, 2);
        cell.cf[0] = Concentration::new(5.0);
        cell.swap_buffers();
        assert_eq!(cell.ci[0].value(), 5.0);
    }

    #[test]
    fn set_emission_rate_derives_flux_from_volume() {
        let mut cell = test_cell(0, 1);
        cell.set_emission_rate(0, EmissionRate::new(1000.0));
        assert!((cell.emis_flux[0].value() - 1000.0 / cell.volume).abs() < 1e-12);
    }

    #[test]
    fn opposite_direction_is_involutive() {
        for d in Direction::ALL {
            assert_eq!(d.opposite().opposite(), d);
        }
    }
}
