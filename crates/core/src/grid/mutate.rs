//! Grid mutation: static refinement at build time and the dynamic
//! "PopConcMutator" that runs periodically during simulation.
//!
//! Splitting and merging both resample population, emissions, and
//! meteorology by area-weighting across the structural change, rather
//! than cloning stale values from the parent/children.

use super::Grid;
use crate::cell::{Cell, CellId, Direction, Meteorology, NeighborLink};
use crate::ctmdata::CtmData;
use crate::geom::rect;
use crate::mechanism::Mechanism;
use crate::operators::derive_cell_deposition_params;
use crate::units::Concentration;
use geo::BoundingRect;

/// Split `id` into `nx * ny` children by geometric subdivision. Returns
/// the new children's ids. Re-wires neighbors on all six sides for the
/// children and every touched adjacent cell, and reapportions
/// population, mortality, and emissions flux by child/parent area
/// ratio.
///
/// # Panics
/// Panics if `id` does not name a live cell, or `nx`/`ny` are zero.
pub fn split_cell(
    grid: &mut Grid,
    id: CellId,
    nx: usize,
    ny: usize,
    ctm: &CtmData,
    mechanism: &dyn Mechanism,
) -> Vec<CellId> {
    assert!(nx > 0 && ny > 0, "split factors must be nonzero");
    let parent = grid.remove(id).expect("split target must be a live cell");

    let bbox = parent.geom.bounding_rect().expect("cell polygon must be non-degenerate");
    let (x0, y0, x1, y1) = (bbox.min().x, bbox.min().y, bbox.max().x, bbox.max().y);
    let child_dx = (x1 - x0) / nx as f64;
    let child_dy = (y1 - y0) / ny as f64;
    let area_ratio = 1.0 / (nx * ny) as f64;

    // Detach the parent's old neighbor links from the far side so the
    // new children can be wired in cleanly.
    for &dir in &Direction::ALL {
        for link in parent.neighbors(dir) {
            if let Some(far) = grid.cell_mut(link.id) {
                far.neighbors_mut(dir.opposite()).retain(|l| l.id != id);
            }
        }
    }

    let mut grid_of_children = vec![vec![0 as CellId; nx]; ny];
    for row in 0..ny {
        for col in 0..nx {
            let cx0 = x0 + col as f64 * child_dx;
            let cy0 = y0 + row as f64 * child_dy;
            let cx1 = cx0 + child_dx;
            let cy1 = cy0 + child_dy;
            let centroid_x = (cx0 + cx1) / 2.0;
            let centroid_y = (cy0 + cy1) / 2.0;
            let met: Meteorology = ctm.sample(centroid_x, centroid_y, parent.layer);
            let (v_dep, scavenging) = derive_cell_deposition_params(
                ctm,
                mechanism,
                centroid_x,
                centroid_y,
                &met,
                parent.cf.len(),
            );

            // emis_flux is already per-volume (ug/m3/s); unlike
            // population it does not get re-scaled by area_ratio here.
            let child_emis_flux = parent.emis_flux.clone();

            let child = Cell {
                id: 0,
                layer: parent.layer,
                geom: rect(cx0, cy0, cx1, cy1),
                z_bottom: parent.z_bottom,
                z_top: parent.z_top,
                dx: child_dx,
                dy: child_dy,
                dz: parent.dz,
                volume: child_dx * child_dy * parent.dz,
                cf: parent.cf.clone(),
                ci: parent.ci.clone(),
                emis_flux: child_emis_flux,
                met,
                v_dep,
                scavenging,
                population: parent
.population
.iter()
.map(|(k, v)| (k.clone(), v * area_ratio))
.collect(),
                mortality: parent.mortality.clone(),
                west: vec![],
                east: vec![],
                south: vec![],
                north: vec![],
                below: vec![],
                above: vec![],
            };
            let new_id = grid.insert(child);
            grid_of_children[row][col] = new_id;
        }
    }

    // Wire siblings to each other.
    for row in 0..ny {
        for col in 0..nx {
            let this_id = grid_of_children[row][col];
            if col + 1 < nx {
                link_siblings(grid, this_id, grid_of_children[row][col + 1], Direction::East, child_dy * parent.dz);
            }
            if row + 1 < ny {
                link_siblings(grid, this_id, grid_of_children[row + 1][col], Direction::North, child_dx * parent.dz);
            }
        }
    }

    // Re-wire the parent's old external neighbors to the bordering
    // children. Each child's own face is still fully (or however the
    // parent's fraction said) covered by that neighbor, so the child's
    // own fraction carries over unscaled; it's the neighbor's single
    // face that is now split among `border_children.len()` children,
    // so only the far side's back-link fraction is divided by `share`.
    for &dir in &Direction::ALL {
        let border_children = border_children_for(&grid_of_children, dir, nx, ny);
        if border_children.is_empty() {
            continue;
        }
        let share = 1.0 / border_children.len() as f64;
        for link in parent.neighbors(dir) {
            for &child_id in &border_children {
                let face_area = link.face_area * share;
                add_neighbor_link(grid, child_id, dir, link.id, link.fraction, face_area);
                add_neighbor_link(grid, link.id, dir.opposite(), child_id, link.fraction * share, face_area);
            }
        }
    }

    grid_of_children.into_iter().flatten().collect()
}

fn link_siblings(grid: &mut Grid, a: CellId, b: CellId, dir_a_to_b: Direction, face_area: f64) {
    add_neighbor_link(grid, a, dir_a_to_b, b, 1.0, face_area);
    add_neighbor_link(grid, b, dir_a_to_b.opposite(), a, 1.0, face_area);
}

fn add_neighbor_link(grid: &mut Grid, on: CellId, dir: Direction, target: CellId, fraction: f64, face_area: f64) {
    if let Some(cell) = grid.cell_mut(on) {
        cell.neighbors_mut(dir).push(NeighborLink { id: target, fraction, face_area });
    }
}

fn border_children_for(
    children: &[Vec<CellId>],
    dir: Direction,
    nx: usize,
    ny: usize,
) -> Vec<CellId> {
    match dir {
        Direction::West => (0..ny).map(|row| children[row][0]).collect(),
        Direction::East => (0..ny).map(|row| children[row][nx - 1]).collect(),
        Direction::South => (0..nx).map(|col| children[0][col]).collect(),
        Direction::North => (0..nx).map(|col| children[ny - 1][col]).collect(),
        Direction::Below | Direction::Above => children.iter().flatten().copied().collect(),
    }
}

/// Merge a family of co-parented children back into one cell (the
/// inverse of [`split_cell`]): sum population/mortality, volume-weight
/// concentrations, and re-wire external neighbors back onto the merged
/// footprint. Returns the merged cell's id.
///
/// # Panics
/// Panics if `children` is empty or any id does not name a live cell.
pub fn merge_siblings(grid: &mut Grid, children: &[CellId], ctm: &CtmData, mechanism: &dyn Mechanism) -> CellId {
    assert!(!children.is_empty(), "cannot merge an empty sibling set");
    let removed: Vec<Cell> = children.iter().map(|&id| grid.remove(id).expect("merge target must be live")).collect();

    let n_species = removed[0].cf.len();
    let total_volume: f64 = removed.iter().map(|c| c.volume).sum();

    let mut merged_cf = vec![Concentration::ZERO; n_species];
    let mut merged_ci = vec![Concentration::ZERO; n_species];
    for cell in &removed {
        let weight = cell.volume / total_volume;
        for s in 0..n_species {
            merged_cf[s] += Concentration::new(cell.cf[s].value() * weight);
            merged_ci[s] += Concentration::new(cell.ci[s].value() * weight);
        }
    }

    let mut merged_population = std::collections::BTreeMap::new();
    let mut merged_mortality = std::collections::BTreeMap::new();
    for cell in &removed {
        for (k, v) in &cell.population {
            *merged_population.entry(k.clone()).or_insert(0.0) += v;
        }
        for (k, v) in &cell.mortality {
            merged_mortality.entry(k.clone()).or_insert(*v);
        }
    }

    let xs0 = removed.iter().map(|c| c.geom.bounding_rect().unwrap().min().x).fold(f64::INFINITY, f64::min);
    let ys0 = removed.iter().map(|c| c.geom.bounding_rect().unwrap().min().y).fold(f64::INFINITY, f64::min);
    let xs1 = removed.iter().map(|c| c.geom.bounding_rect().unwrap().max().x).fold(f64::NEG_INFINITY, f64::max);
    let ys1 = removed.iter().map(|c| c.geom.bounding_rect().unwrap().max().y).fold(f64::NEG_INFINITY, f64::max);

    let first = &removed[0];
    let centroid_x = (xs0 + xs1) / 2.0;
    let centroid_y = (ys0 + ys1) / 2.0;
    let met = ctm.sample(centroid_x, centroid_y, first.layer);
    let (v_dep, scavenging) =
        derive_cell_deposition_params(ctm, mechanism, centroid_x, centroid_y, &met, n_species);
    let merged = Cell {
        id: 0,
        layer: first.layer,
        geom: rect(xs0, ys0, xs1, ys1),
        z_bottom: first.z_bottom,
        z_top: first.z_top,
        dx: xs1 - xs0,
        dy: ys1 - ys0,
        dz: first.dz,
        volume: total_volume,
        cf: merged_cf,
        ci: merged_ci,
        emis_flux: first.emis_flux.clone(),
        met,
        v_dep,
        scavenging,
        population: merged_population,
        mortality: merged_mortality,
        west: vec![],
        east: vec![],
        south: vec![],
        north: vec![],
        below: vec![],
        above: vec![],
    };
    let merged_id = grid.insert(merged);

    // Re-point every outside neighbor that referenced a removed sibling
    // at the merged cell instead. A direction's links are grouped by
    // neighbor id and the merged cell's fraction is rebuilt from summed
    // face area, since a neighbor that bordered only some of the
    // siblings now covers just part of the merged cell's larger face.
    // The far side's own fraction total is preserved by summing its
    // existing per-sibling fractions rather than recomputing them.
    let removed_ids: std::collections::HashSet<CellId> = children.iter().copied().collect();
    for &dir in &Direction::ALL {
        let mut by_neighbor: std::collections::BTreeMap<CellId, f64> = std::collections::BTreeMap::new();
        let mut total_face_area = 0.0;
        for cell in &removed {
            for link in cell.neighbors(dir) {
                if removed_ids.contains(&link.id) {
                    continue;
                }
                *by_neighbor.entry(link.id).or_insert(0.0) += link.face_area;
                total_face_area += link.face_area;
            }
        }
        if total_face_area <= 0.0 {
            continue;
        }
        for (&neighbor_id, &face_area) in &by_neighbor {
            let fraction = face_area / total_face_area;
            add_neighbor_link(grid, merged_id, dir, neighbor_id, fraction, face_area);

            if let Some(far) = grid.cell_mut(neighbor_id) {
                let opp = dir.opposite();
                let (far_fraction, far_face_area) = far
.neighbors(opp)
.iter()
.filter(|l| removed_ids.contains(&l.id))
.fold((0.0, 0.0), |(f, a), l| (f + l.fraction, a + l.face_area));
                far.neighbors_mut(opp).retain(|l| !removed_ids.contains(&l.id));
                far.neighbors_mut(opp).push(NeighborLink {
                    id: merged_id,
                    fraction: far_fraction,
                    face_area: far_face_area,
                });
            }
        }
    }

    merged_id
}

/// The dynamic "PopConcMutator" score:
/// `Σ|ΔC_species * volume * ΔPopulation| / (Σ|total_mass_species| * total_population)`,
/// summed over horizontal neighbors.
#[must_use]
pub fn pop_conc_score(grid: &Grid, id: CellId) -> f64 {
    let Some(cell) = grid.cell(id) else { return 0.0 };
    let total_population = cell.total_population();
    let total_mass: f64 = cell.cf.iter().map(|c| (c.value() * cell.volume).abs()).sum();
    if total_population <= 0.0 || total_mass <= 0.0 {
        return 0.0;
    }

    let mut numerator = 0.0;
    for &dir in &[Direction::West, Direction::East, Direction::South, Direction::North] {
        for link in cell.neighbors(dir) {
            let Some(neighbor) = grid.cell(link.id) else { continue };
            let delta_population = (neighbor.total_population() - total_population).abs();
            for s in 0..cell.cf.len() {
                let delta_c = (neighbor.cf[s].value() - cell.cf[s].value()).abs();
                numerator += delta_c * cell.volume * delta_population;
            }
        }
    }

    numerator / (total_mass * total_population)
}
