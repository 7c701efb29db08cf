//! Spatial index over cell footprints, keyed by (layer, envelope).
//!
//! Uses a real R-tree (`rstar`) rather than a bucket hash over a
//! uniform lattice, since cells are not on a uniform lattice after
//! refinement and a hash bucket can't answer arbitrary point queries.

use crate::cell::CellId;
use rstar::{RTree, RTreeObject, AABB};

/// One R-tree entry: a cell's axis-aligned bounding box plus its id and
/// layer, so a point query can filter by layer without a second index.
#[derive(Debug, Clone, Copy)]
pub struct CellEnvelope {
    pub id: CellId,
    pub layer: usize,
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl RTreeObject for CellEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.min, self.max)
    }
}

/// Thin wrapper over `rstar::RTree<CellEnvelope>` with the
/// layer-filtered point query the grid invariants require.
#[derive(Debug, Default, Clone)]
pub struct SpatialIndex {
    tree: RTree<CellEnvelope>,
}

impl SpatialIndex {
    #[must_use]
    pub fn new() -> Self {
        SpatialIndex { tree: RTree::new() }
    }

    #[must_use]
    pub fn from_envelopes(envelopes: Vec<CellEnvelope>) -> Self {
        SpatialIndex { tree: RTree::bulk_load(envelopes) }
    }

    pub fn insert(&mut self, envelope: CellEnvelope) {
        self.tree.insert(envelope);
    }

    pub fn remove(&mut self, envelope: &CellEnvelope) {
        self.tree.remove(envelope);
    }

    /// Candidate cells whose bounding box contains `(x, y)` at `layer`.
    /// Callers still need an exact polygon-containment check
    /// ([`crate::geom::contains_point`]) since bounding boxes can
    /// overlap across layer boundaries or refinement siblings.
    #[must_use]
    pub fn candidates_at(&self, x: f64, y: f64, layer: usize) -> Vec<CellEnvelope> {
        self.tree
.locate_all_at_point(&[x, y])
.filter(|e| e.layer == layer)
.copied()
.collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_inside_one_envelope_is_found() {
        let mut idx = SpatialIndex::new();
        idx.insert(CellEnvelope { id: 0, layer: 0, min: [0.0, 0.0], max: [10.0, 10.0] });
        let hits = idx.candidates_at(5.0, 5.0, 0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 0);
    }

    #[test]
    fn layer_filter_excludes_other_layers() {
        let mut idx = SpatialIndex::new();
        idx.insert(CellEnvelope { id: 0, layer: 0, min: [0.0, 0.0], max: [10.0, 10.0] });
        idx.insert(CellEnvelope { id: 1, layer: 1, min: [0.0, 0.0], max: [10.0, 10.0] });
        let hits = idx.candidates_at(5.0, 5.0, 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
    }

    #[test]
    fn remove_drops_the_envelope_from_future_queries() {
        let mut idx = SpatialIndex::new();
        let env = CellEnvelope { id: 0, layer: 0, min: [0.0, 0.0], max: [10.0, 10.0] };
        idx.insert(env);
        idx.remove(&env);
        assert!(idx.candidates_at(5.0, 5.0, 0).is_empty());
    }
}
