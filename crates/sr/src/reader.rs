//! Loads a persisted [`SrMatrix`] and applies it to user emissions.

use crate::matrix::{SrGeometry, SrMatrix};
use geo_types::Point;
use inmap_core::geom::{contains_point, overlap_fraction, Poly};
use inmap_core::units::EmissionRate;
use std::collections::BTreeMap;
use std::io::{self, Read};
use tracing::warn;

/// Component names [`SrReader::route`] sums into `TotalPM25`, matching
/// `SimpleChem`'s own fixed component set.
const PM25_COMPONENTS: [&str; 5] = ["PrimaryPM25", "pSO4", "pNO3", "pNH4", "SOA"];

/// An emission source's horizontal footprint: a point (exact) or an
/// area (area-weighted across every overlapping source_column).
#[derive(Debug, Clone)]
pub enum Footprint {
    Point(f64, f64),
    Area(Poly),
}

/// One user-supplied emission to route through the matrix.
#[derive(Debug, Clone)]
pub struct EmissionRecord {
    pub footprint: Footprint,
    pub layer: usize,
    pub species: String,
    pub rate: EmissionRate,
}

/// Per-receptor predicted concentrations, named by species plus the
/// derived `TotalPM25`.
pub type Prediction = BTreeMap<String, f64>;

/// Reads a persisted SR matrix and predicts receptor concentrations from
/// a set of emission records.
pub struct SrReader {
    matrix: SrMatrix,
}

impl SrReader {
    /// Load a matrix previously written by `inmap_sr::matrix::SrMatrix::write`.
    ///
    /// # Errors
    /// Propagates I/O and format errors from [`SrMatrix::read`].
    pub fn load(input: &mut impl Read) -> io::Result<Self> {
        SrMatrix::read(input).map(|matrix| SrReader { matrix })
    }

    #[must_use]
    pub fn geometry(&self) -> &SrGeometry {
        &self.matrix.geometry
    }

    /// Predict per-receptor concentrations from a batch of emissions.
    ///
    /// Above-top-layer point sources drop to the top stored layer;
    /// fractional column weights are normalized to sum to 1 across all
    /// overlapping source_columns so total routed mass always equals
    /// the input rate (see `DESIGN.md` for the boundary apportionment
    /// decision).
    #[must_use]
    pub fn predict(&self, emissions: &[EmissionRecord]) -> Vec<Prediction> {
        let geometry = &self.matrix.geometry;
        let n_receptors = geometry.n_receptors();
        let n_species = geometry.n_species();
        let mut totals = vec![0.0; n_receptors * n_species];

        let top_layer = geometry.source_layers.iter().copied().max().unwrap_or(0);

        for record in emissions {
            let Some(species_index) = geometry.species.iter().position(|s| s == &record.species) else {
                warn!(species = %record.species, "SR predict: unknown species, skipping emission");
                continue;
            };
            let clamped_layer = record.layer.min(top_layer);
            let Some(layer_idx) = geometry.layer_index(clamped_layer) else {
                warn!(layer = record.layer, "SR predict: no matching source layer, skipping emission");
                continue;
            };

            let weights = self.column_weights(&record.footprint);
            let weight_sum: f64 = weights.iter().map(|&(_, w)| w).sum();
            if weight_sum <= 0.0 {
                warn!("SR predict: emission footprint does not overlap any source column, skipping");
                continue;
            }

            for (column, weight) in weights {
                let normalized = weight / weight_sum;
                let row = self.matrix.row(layer_idx, column);
                for receptor in 0..n_receptors {
                    totals[receptor * n_species + species_index] += normalized * row[receptor * n_species + species_index] * record.rate.value();
                }
            }
        }

        (0..n_receptors).map(|r| self.route(&totals[r * n_species..(r + 1) * n_species])).collect()
    }

    fn column_weights(&self, footprint: &Footprint) -> Vec<(usize, f64)> {
        match footprint {
            Footprint::Point(x, y) => {
                let point = Point::new(*x, *y);
                self.matrix
.geometry
.source_columns
.iter()
.position(|col| contains_point(col, point))
.map(|i| vec![(i, 1.0)])
.unwrap_or_default()
            }
            Footprint::Area(poly) => self
.matrix
.geometry
.source_columns
.iter()
.enumerate()
.map(|(i, col)| (i, overlap_fraction(col, poly)))
.filter(|&(_, w)| w > 0.0)
.collect(),
        }
    }

    fn route(&self, values: &[f64]) -> Prediction {
        let mut prediction = Prediction::new();
        let mut total = 0.0;
        for (name, &value) in self.matrix.geometry.species.iter().zip(values) {
            if PM25_COMPONENTS.contains(&name.as_str()) {
                total += value;
            }
            prediction.insert(name.clone(), value);
        }
        prediction.insert("TotalPM25".to_string(), total);
        prediction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inmap_core::geom::rect;

    fn sample_reader() -> SrReader {
        let geometry = SrGeometry {
            species: vec!["PrimaryPM25".to_string(), "pSO4".to_string()],
            source_layers: vec![0],
            source_columns: vec![rect(0.0, 0.0, 1000.0, 1000.0), rect(1000.0, 0.0, 2000.0, 1000.0)],
            receptors: vec![rect(0.0, 0.0, 1000.0, 1000.0)],
            emission_units: "ug/s".to_string(),
        };
        let mut matrix = SrMatrix::empty(geometry);
        matrix.set_row(0, 0, &[2.0, 0.5]);
        matrix.set_row(0, 1, &[4.0, 1.0]);
        SrReader { matrix }
    }

    #[test]
    fn point_source_uses_exact_single_column() {
        let reader = sample_reader();
        let predictions = reader.predict(&[EmissionRecord {
            footprint: Footprint::Point(500.0, 500.0),
            layer: 0,
            species: "PrimaryPM25".to_string(),
            rate: EmissionRate::new(10.0),
        }]);
        assert_eq!(predictions.len(), 1);
        assert!((predictions[0]["PrimaryPM25"] - 20.0).abs() < 1e-9);
        assert_eq!(predictions[0]["pSO4"], 0.0);
    }

    #[test]
    fn area_source_spanning_two_columns_is_weighted_and_conserves_mass() {
        let reader = sample_reader();
        let footprint = rect(500.0, 0.0, 1500.0, 1000.0);
        let predictions = reader.predict(&[EmissionRecord {
            footprint: Footprint::Area(footprint),
            layer: 0,
            species: "PrimaryPM25".to_string(),
            rate: EmissionRate::new(10.0),
        }]);
        let expected = 0.5 * 2.0 * 10.0 + 0.5 * 4.0 * 10.0;
        assert!((predictions[0]["PrimaryPM25"] - expected).abs() < 1e-9);
    }

    #[test]
    fn total_pm25_sums_known_components() {
        let reader = sample_reader();
        let predictions = reader.predict(&[
            EmissionRecord { footprint: Footprint::Point(500.0, 500.0), layer: 0, species: "PrimaryPM25".to_string(), rate: EmissionRate::new(1.0) },
            EmissionRecord { footprint: Footprint::Point(500.0, 500.0), layer: 0, species: "pSO4".to_string(), rate: EmissionRate::new(1.0) },
        ]);
        assert!((predictions[0]["TotalPM25"] - (2.0 + 0.5)).abs() < 1e-9);
    }

    #[test]
    fn above_top_layer_point_source_clamps_to_top_stored_layer() {
        let reader = sample_reader();
        let predictions = reader.predict(&[EmissionRecord {
            footprint: Footprint::Point(500.0, 500.0),
            layer: 50,
            species: "PrimaryPM25".to_string(),
            rate: EmissionRate::new(10.0),
        }]);
        assert!((predictions[0]["PrimaryPM25"] - 20.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_species_is_skipped_not_fatal() {
        let reader = sample_reader();
        let predictions = reader.predict(&[EmissionRecord {
            footprint: Footprint::Point(500.0, 500.0),
            layer: 0,
            species: "NotASpecies".to_string(),
            rate: EmissionRate::new(10.0),
        }]);
        assert_eq!(predictions[0]["PrimaryPM25"], 0.0);
    }
}
