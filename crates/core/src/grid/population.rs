//! Area-weighted population/mortality apportionment from census and
//! mortality-rate polygons into cells.
//!
//! Built on `geom::overlap_fraction`'s intersection-area machinery; the
//! census/mortality shapefile parsing itself is an external
//! collaborator, so this module only consumes already-parsed
//! `(polygon, column -> value)` records.

use crate::cell::Cell;
use crate::geom::{overlap_fraction, Poly};

/// One census or mortality polygon record: geometry plus named column
/// values (e.g. population counts by demographic group, or mortality
/// rates by cause).
pub struct AttributeRecord {
    pub geom: Poly,
    pub values: std::collections::BTreeMap<String, f64>,
}

/// Area-weight `records` into `cell.population`: for every record
/// overlapping `cell.geom`, add `value * overlap_fraction(cell, record)`
/// to the running per-column total.
pub fn apportion_population(cell: &mut Cell, records: &[AttributeRecord]) {
    apportion_into(cell, records, |c| &mut c.population);
}

/// Same apportionment for mortality-rate records.
pub fn apportion_mortality(cell: &mut Cell, records: &[AttributeRecord]) {
    apportion_into(cell, records, |c| &mut c.mortality);
}

fn apportion_into(
    cell: &mut Cell,
    records: &[AttributeRecord],
    field: impl Fn(&mut Cell) -> &mut std::collections::BTreeMap<String, f64>,
) {
    for record in records {
        let fraction = overlap_fraction(&cell.geom, &record.geom);
        if fraction <= 0.0 {
            continue;
        }
        let map = field(cell);
        for (column, value) in &record.values {
            *map.entry(column.clone()).or_insert(0.0) += value * fraction;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Meteorology;
    use crate::geom::rect;
    use crate::units::{Concentration, MetersPerSecond, PerSecond, VolumetricFlux};

    fn test_cell(x0: f64, y0: f64, x1: f64, y1: f64) -> Cell {
        Cell {
            id: 0,
            layer: 0,
            geom: rect(x0, y0, x1, y1),
            z_bottom: 0.0,
            z_top: 50.0,
            dx: x1 - x0,
            dy: y1 - y0,
            dz: 50.0,
            volume: (x1 - x0) * (y1 - y0) * 50.0,
            cf: vec![Concentration::ZERO],
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
    fn half_overlap_yields_half_the_population() {
        let mut cell = test_cell(0.0, 0.0, 10.0, 10.0);
        let mut values = std::collections::BTreeMap::new();
        values.insert("total".to_string(), 1000.0);
        let records = vec![AttributeRecord { geom: rect(0.0, 0.0, 5.0, 10.0), values }];
        apportion_population(&mut cell, &records);
        assert!((cell.population["total"] - 500.0).abs() < 1e-6);
    }

    #[test]
    fn disjoint_record_contributes_nothing() {
        let mut cell = test_cell(0.0, 0.0, 10.0, 10.0);
        let mut values = std::collections::BTreeMap::new();
        values.insert("total".to_string(), 1000.0);
        let records = vec![AttributeRecord { geom: rect(100.0, 100.0, 110.0, 110.0), values }];
        apportion_population(&mut cell, &records);
        assert!(cell.population.is_empty());
    }

    #[test]
    fn multiple_overlapping_records_accumulate() {
        let mut cell = test_cell(0.0, 0.0, 10.0, 10.0);
        let mut v1 = std::collections::BTreeMap::new();
        v1.insert("total".to_string(), 1000.0);
        let mut v2 = std::collections::BTreeMap::new();
        v2.insert("total".to_string(), 2000.0);
        let records = vec![
            AttributeRecord { geom: rect(0.0, 0.0, 10.0, 10.0), values: v1 },
            AttributeRecord { geom: rect(0.0, 0.0, 10.0, 10.0), values: v2 },
        ];
        apportion_population(&mut cell, &records);
        assert!((cell.population["total"] - 3000.0).abs() < 1e-6);
    }
}
