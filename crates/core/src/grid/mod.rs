//! The `Grid`: an arena of [`Cell`]s plus the R-tree, layer lists, and
//! demographic column maps that make it a queryable control-volume mesh.
//!
//! Cells live in an append-only arena with a free list, so handles stay
//! stable across structural edits (split/merge), with per-layer
//! active-cell bookkeeping over an adaptively split/merged mesh rather
//! than a fixed Cartesian lattice.

pub mod build;
pub mod mutate;
pub mod persist;
pub mod population;
pub mod rtree;

use crate::cell::{Cell, CellId, Direction};
use crate::error::GridError;
use crate::geom::contains_point;
use geo_types::Point;
use rtree::{CellEnvelope, SpatialIndex};
use rustc_hash::FxHashMap;

/// The set of all cells plus the spatial index, per-layer lists, and
/// demographic column maps.
///
/// `Clone` is needed by `inmap-sr`: every SR worker job runs a full
/// single-source simulation against its own mutable grid, so the
/// builder clones a shared base grid once per dispatched job rather
/// than serializing it over a channel.
#[derive(Clone)]
pub struct Grid {
    cells: Vec<Option<Cell>>,
    free_list: Vec<CellId>,
    index: SpatialIndex,
    layers: FxHashMap<usize, Vec<CellId>>,
    population_columns: Vec<String>,
    mortality_columns: Vec<String>,
}

impl Grid {
    #[must_use]
    pub fn empty(population_columns: Vec<String>, mortality_columns: Vec<String>) -> Self {
        Grid {
            cells: Vec::new(),
            free_list: Vec::new(),
            index: SpatialIndex::new(),
            layers: FxHashMap::default(),
            population_columns,
            mortality_columns,
        }
    }

    #[must_use]
    pub fn population_columns(&self) -> &[String] {
        &self.population_columns
    }

    #[must_use]
    pub fn mortality_columns(&self) -> &[String] {
        &self.mortality_columns
    }

    /// Insert a new cell, assigning it a stable [`CellId`] (reusing a
    /// freed slot if one exists) and indexing it spatially.
    pub fn insert(&mut self, mut cell: Cell) -> CellId {
        let id = if let Some(reused) = self.free_list.pop() {
            cell.id = reused;
            self.cells[reused as usize] = Some(cell);
            reused
        } else {
            let id = self.cells.len() as CellId;
            cell.id = id;
            self.cells.push(Some(cell));
            id
        };

        let envelope = envelope_of(self.cells[id as usize].as_ref().unwrap());
        self.index.insert(envelope);
        self.layers.entry(self.cells[id as usize].as_ref().unwrap().layer).or_default().push(id);
        id
    }

    /// Remove a cell entirely: drop it from the arena, the spatial
    /// index, and its layer list. Used by merges and by
    /// `Drop`-time cleanup of stale neighbor references is the caller's
    /// responsibility — this only removes the cell itself.
    pub fn remove(&mut self, id: CellId) -> Option<Cell> {
        let removed = self.cells[id as usize].take()?;
        let envelope = envelope_of(&removed);
        self.index.remove(&envelope);
        if let Some(list) = self.layers.get_mut(&removed.layer) {
            list.retain(|&c| c != id);
        }
        self.free_list.push(id);
        Some(removed)
    }

    #[must_use]
    pub fn cell(&self, id: CellId) -> Option<&Cell> {
        self.cells.get(id as usize).and_then(|c| c.as_ref())
    }

    pub fn cell_mut(&mut self, id: CellId) -> Option<&mut Cell> {
        self.cells.get_mut(id as usize).and_then(|c| c.as_mut())
    }

    /// All live cells, in arena order. `Runner`/`operators` iterate this
    /// to apply manipulators.
    #[must_use]
    pub fn live_cells(&self) -> Vec<&Cell> {
        self.cells.iter().filter_map(|c| c.as_ref()).collect()
    }

    pub fn live_cells_mut(&mut self) -> Vec<&mut Cell> {
        self.cells.iter_mut().filter_map(|c| c.as_mut()).collect()
    }

    #[must_use]
    pub fn layer_cells(&self, layer: usize) -> &[CellId] {
        self.layers.get(&layer).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point query: the unique cell at `layer` containing `(x, y)`.
    /// Bounding-box candidates are filtered by exact polygon containment.
    #[must_use]
    pub fn point_query(&self, x: f64, y: f64, layer: usize) -> Option<CellId> {
        let point = Point::new(x, y);
        self.index
.candidates_at(x, y, layer)
.into_iter()
.find(|env| {
                self.cell(env.id)
.map(|c| contains_point(&c.geom, point))
.unwrap_or(false)
            })
.map(|env| env.id)
    }

    /// Reindex a cell's envelope after its geometry changed (splits
    /// rebuild from scratch instead; this is for targeted updates).
    pub fn reindex(&mut self, id: CellId) {
        if let Some(cell) = self.cell(id) {
            let envelope = envelope_of(cell);
            self.index.insert(envelope);
        }
    }

    /// Verify invariants 1-4: each cell's own per-direction fractions
    /// sum to 1, and every neighbor link has a symmetric back-link. Used
    /// after build and after every mutation.
    ///
    /// A link's `fraction` is relative to its own cell's face, so it is
    /// not itself symmetric across a size mismatch (a coarse cell's
    /// fraction toward one of several finer neighbors on the same face
    /// is smaller than that neighbor's fraction back toward it, which
    /// alone covers the whole of the neighbor's own face). `face_area`
    /// is the physical shared-boundary area, which both sides must
    /// agree on regardless of how each normalizes its own fraction, so
    /// it is what symmetry is checked against here.
    ///
    /// # Errors
    /// Returns the first violated invariant found.
    pub fn check_invariants(&self) -> Result<(), GridError> {
        for cell in self.cells.iter().filter_map(|c| c.as_ref()) {
            for &dir in &Direction::ALL {
                let sum: f64 = cell.neighbors(dir).iter().map(|n| n.fraction).sum();
                if !cell.neighbors(dir).is_empty() && (sum - 1.0).abs() > 1e-9 {
                    return Err(GridError::InvariantViolation {
                        cell: cell.id,
                        detail: format!("{dir:?} fractions sum to {sum}, expected 1"),
                    });
                }
                for link in cell.neighbors(dir) {
                    let Some(neighbor) = self.cell(link.id) else {
                        return Err(GridError::InvariantViolation {
                            cell: cell.id,
                            detail: format!("{dir:?} neighbor {} does not exist", link.id),
                        });
                    };
                    let back = neighbor.neighbors(dir.opposite());
                    let has_symmetric = back.iter().any(|b| b.id == cell.id && (b.face_area - link.face_area).abs() < 1e-9);
                    if !has_symmetric {
                        return Err(GridError::InvariantViolation {
                            cell: cell.id,
                            detail: format!(
                                "neighbor {} (dir {dir:?}) has no symmetric back-link",
                                link.id
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn envelope_of(cell: &Cell) -> CellEnvelope {
    use geo::BoundingRect;
    let rect = cell.geom.bounding_rect().expect("cell polygon must be non-degenerate");
    CellEnvelope {
        id: cell.id,
        layer: cell.layer,
        min: [rect.min().x, rect.min().y],
        max: [rect.max().x, rect.max().y],
    }
}
