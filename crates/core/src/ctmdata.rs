//! Immutable gridded meteorological/chemical fields, sampled from a CTM.
//!
//! Stores flat row-major `Vec<f64>` arrays over a regular lattice, with
//! a `flat()`-style constructor for tests and nearest-sample lookup by
//! index. Actual netCDF ingestion is an external collaborator; `CtmData`
//! only owns the in-memory lattice and sampling, not the file format.

use crate::cell::Meteorology;
use crate::operators::{LandUseCategory, Season};
use serde::{Deserialize, Serialize};

/// One scalar field on the outermost-resolution CTM lattice (nx*ny*nz,
/// row-major, z slowest-varying).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatticeField {
    pub values: Vec<f64>,
}

impl LatticeField {
    #[must_use]
    pub fn constant(value: f64, len: usize) -> Self {
        LatticeField { values: vec![value; len] }
    }
}

/// Immutable outermost-resolution CTM lattice. Loaded once; every `Cell`
/// samples it by spatial intersection during grid build/mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtmData {
    pub origin_x: f64,
    pub origin_y: f64,
    pub dx: f64,
    pub dy: f64,
    pub nx: usize,
    pub ny: usize,
    /// Vertical layer boundaries, length `nz + 1`.
    pub layer_heights: Vec<f64>,

    pub u: LatticeField,
    pub v: LatticeField,
    pub w: LatticeField,
    pub kx: LatticeField,
    pub ky: LatticeField,
    pub kz: LatticeField,
    pub boundary_layer_height: LatticeField,
    pub monin_obukhov_length: LatticeField,
    pub friction_velocity: LatticeField,
    pub temperature_k: LatticeField,
    pub density: LatticeField,
    pub rain_rate: LatticeField,
    pub cloud_fraction: LatticeField,
    pub wind_direction_stddev: LatticeField,

    /// Wesely land-use category per horizontal lattice cell (nx*ny,
    /// row-major), driving dry-deposition surface resistance.
    pub land_use: Vec<LandUseCategory>,
    /// Single season classification for the whole lattice; CTM inputs
    /// don't vary season spatially within one run.
    pub season: Season,
}

impl CtmData {
    #[must_use]
    pub fn nz(&self) -> usize {
        self.layer_heights.len().saturating_sub(1)
    }

    /// Build a spatially-uniform CTM lattice for tests and S1/S2-style
    /// scenarios: a fixed wind field over a flat-terrain domain.
    #[must_use]
    pub fn uniform(
        nx: usize,
        ny: usize,
        nz: usize,
        dx: f64,
        dy: f64,
        layer_height: f64,
        wind_u: f64,
        wind_v: f64,
    ) -> Self {
        let n = nx * ny * nz;
        let layer_heights: Vec<f64> = (0..=nz).map(|k| k as f64 * layer_height).collect();
        CtmData {
            origin_x: 0.0,
            origin_y: 0.0,
            dx,
            dy,
            nx,
            ny,
            layer_heights,
            u: LatticeField::constant(wind_u, n),
            v: LatticeField::constant(wind_v, n),
            w: LatticeField::constant(0.0, n),
            kx: LatticeField::constant(50.0, n),
            ky: LatticeField::constant(50.0, n),
            kz: LatticeField::constant(5.0, n),
            boundary_layer_height: LatticeField::constant(500.0, n),
            monin_obukhov_length: LatticeField::constant(100.0, n),
            friction_velocity: LatticeField::constant(0.3, n),
            temperature_k: LatticeField::constant(288.0, n),
            density: LatticeField::constant(1.2, n),
            rain_rate: LatticeField::constant(0.0, n),
            cloud_fraction: LatticeField::constant(0.0, n),
            wind_direction_stddev: LatticeField::constant(0.1, n),
            land_use: vec![LandUseCategory::Forest; nx * ny],
            season: Season::Midsummer,
        }
    }

    fn index(&self, ix: usize, iy: usize, iz: usize) -> usize {
        (iz * self.ny + iy) * self.nx + ix
    }

    /// Map a domain-projection (x, y) point and layer index to the
    /// containing lattice cell, clamping to the lattice bounds.
    #[must_use]
    pub fn lattice_index_at(&self, x: f64, y: f64, layer: usize) -> (usize, usize, usize) {
        let ix = (((x - self.origin_x) / self.dx).floor() as isize)
.clamp(0, self.nx as isize - 1) as usize;
        let iy = (((y - self.origin_y) / self.dy).floor() as isize)
.clamp(0, self.ny as isize - 1) as usize;
        let iz = layer.min(self.nz() - 1);
        (ix, iy, iz)
    }

    /// Sample meteorology at a domain point and layer by nearest-lattice
    /// lookup (the `Cell`'s footprint is area-weighted separately during
    /// refinement; this gives the per-lattice-cell scalar values that
    /// area-weighting combines).
    #[must_use]
    pub fn sample(&self, x: f64, y: f64, layer: usize) -> Meteorology {
        let (ix, iy, iz) = self.lattice_index_at(x, y, layer);
        let idx = self.index(ix, iy, iz);
        Meteorology {
            u: self.u.values[idx],
            v: self.v.values[idx],
            w: self.w.values[idx],
            kx: self.kx.values[idx],
            ky: self.ky.values[idx],
            kz: self.kz.values[idx],
            boundary_layer_height: self.boundary_layer_height.values[idx],
            monin_obukhov_length: self.monin_obukhov_length.values[idx],
            friction_velocity: self.friction_velocity.values[idx],
            temperature_k: self.temperature_k.values[idx],
            density: self.density.values[idx],
            rain_rate: self.rain_rate.values[idx],
            cloud_fraction: self.cloud_fraction.values[idx],
            wind_direction_stddev: self.wind_direction_stddev.values[idx],
            s1: 0.0,
            s_class: 0.0,
        }
    }

    #[must_use]
    pub fn layer_extent(&self, layer: usize) -> (f64, f64) {
        (self.layer_heights[layer], self.layer_heights[layer + 1])
    }

    /// Land-use category at a domain point, by nearest horizontal
    /// lattice cell.
    #[must_use]
    pub fn land_use_at(&self, x: f64, y: f64) -> LandUseCategory {
        let (ix, iy, _) = self.lattice_index_at(x, y, 0);
        self.land_use[iy * self.nx + ix]
    }

    #[must_use]
    pub fn season(&self) -> Season {
        self.season
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_lattice_samples_constant_wind_everywhere() {
        let ctm = CtmData::uniform(4, 4, 2, 9000.0, 9000.0, 200.0, 5.0, 0.0);
        let met = ctm.sample(1000.0, 1000.0, 0);
        assert_eq!(met.u, 5.0);
        assert_eq!(met.v, 0.0);

        let met_far = ctm.sample(30_000.0, 30_000.0, 1);
        assert_eq!(met_far.u, 5.0);
    }

    #[test]
    fn out_of_bounds_queries_clamp_to_lattice_edge() {
        let ctm = CtmData::uniform(2, 2, 1, 1000.0, 1000.0, 100.0, 1.0, 1.0);
        let met = ctm.sample(-500.0, -500.0, 0);
        assert_eq!(met.u, 1.0);
    }

    #[test]
    fn nz_matches_layer_heights_len_minus_one() {
        let ctm = CtmData::uniform(2, 2, 3, 1000.0, 1000.0, 100.0, 0.0, 0.0);
        assert_eq!(ctm.nz(), 3);
        assert_eq!(ctm.layer_heights.len(), 4);
    }
}
