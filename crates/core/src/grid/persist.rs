//! Self-describing binary grid persistence.
//!
//! Manual length-prefixed little-endian framing via `write_all`/
//! `to_le_bytes`, rather than a generic serializer, so the on-disk
//! format is stable across serde-derive changes. Loading reconstructs
//! cells and population/mortality column orders, then re-derives
//! neighbor links by geometric query rather than persisting them,
//! staying resilient to future changes in how adjacency is represented.

use super::Grid;
use crate::cell::{Cell, CellId, Direction, Meteorology, NeighborLink};
use crate::error::GridError;
use crate::geom::rect;
use crate::units::{Concentration, MetersPerSecond, PerSecond, VolumetricFlux};
use std::io::{self, Read, Write};

const MAGIC: u32 = 0x494E_4D50; // "INMP"
const VERSION: u32 = 1;

fn write_string(out: &mut impl Write, s: &str) -> io::Result<()> {
    out.write_all(&(s.len() as u32).to_le_bytes())?;
    out.write_all(s.as_bytes())
}

fn read_string(input: &mut impl Read) -> io::Result<String> {
    let mut len_buf = [0u8; 4];
    input.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    input.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn write_f64(out: &mut impl Write, v: f64) -> io::Result<()> {
    out.write_all(&v.to_le_bytes())
}

fn read_f64(input: &mut impl Read) -> io::Result<f64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn write_u32(out: &mut impl Write, v: u32) -> io::Result<()> {
    out.write_all(&v.to_le_bytes())
}

fn read_u32(input: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn write_map(out: &mut impl Write, map: &std::collections::BTreeMap<String, f64>) -> io::Result<()> {
    write_u32(out, map.len() as u32)?;
    for (k, v) in map {
        write_string(out, k)?;
        write_f64(out, *v)?;
    }
    Ok(())
}

fn read_map(input: &mut impl Read) -> io::Result<std::collections::BTreeMap<String, f64>> {
    let n = read_u32(input)?;
    let mut map = std::collections::BTreeMap::new();
    for _ in 0..n {
        let k = read_string(input)?;
        let v = read_f64(input)?;
        map.insert(k, v);
    }
    Ok(map)
}

/// Write the cell sequence plus population/mortality column orders.
/// Neighbor links are intentionally not persisted.
///
/// # Errors
/// Returns a [`GridError::Io`] wrapping any underlying write failure.
pub fn serialize(
    out: &mut impl Write,
    cells: &[Cell],
    population_columns: &[String],
    mortality_columns: &[String],
) -> Result<(), GridError> {
    (|| -> io::Result<()> {
        write_u32(out, MAGIC)?;
        write_u32(out, VERSION)?;

        write_u32(out, population_columns.len() as u32)?;
        for name in population_columns {
            write_string(out, name)?;
        }
        write_u32(out, mortality_columns.len() as u32)?;
        for name in mortality_columns {
            write_string(out, name)?;
        }

        write_u32(out, cells.len() as u32)?;
        for cell in cells {
            write_u32(out, cell.id)?;
            write_u32(out, cell.layer as u32)?;

            let exterior: Vec<(f64, f64)> = cell.geom.exterior().points().map(|p| (p.x(), p.y())).collect();
            write_u32(out, exterior.len() as u32)?;
            for (x, y) in exterior {
                write_f64(out, x)?;
                write_f64(out, y)?;
            }

            write_f64(out, cell.z_bottom)?;
            write_f64(out, cell.z_top)?;
            write_f64(out, cell.dx)?;
            write_f64(out, cell.dy)?;
            write_f64(out, cell.dz)?;
            write_f64(out, cell.volume)?;

            write_u32(out, cell.cf.len() as u32)?;
            for c in &cell.cf {
                write_f64(out, c.value())?;
            }
            for c in &cell.ci {
                write_f64(out, c.value())?;
            }
            for f in &cell.emis_flux {
                write_f64(out, f.value())?;
            }
            for v in &cell.v_dep {
                write_f64(out, v.value())?;
            }
            for w in &cell.scavenging {
                write_f64(out, w.value())?;
            }

            write_f64(out, cell.met.u)?;
            write_f64(out, cell.met.v)?;
            write_f64(out, cell.met.w)?;
            write_f64(out, cell.met.kx)?;
            write_f64(out, cell.met.ky)?;
            write_f64(out, cell.met.kz)?;
            write_f64(out, cell.met.boundary_layer_height)?;
            write_f64(out, cell.met.monin_obukhov_length)?;
            write_f64(out, cell.met.friction_velocity)?;
            write_f64(out, cell.met.temperature_k)?;
            write_f64(out, cell.met.density)?;
            write_f64(out, cell.met.rain_rate)?;
            write_f64(out, cell.met.cloud_fraction)?;
            write_f64(out, cell.met.wind_direction_stddev)?;
            write_f64(out, cell.met.s1)?;
            write_f64(out, cell.met.s_class)?;

            write_map(out, &cell.population)?;
            write_map(out, &cell.mortality)?;
        }
        Ok(())
    })()
.map_err(|e| GridError::Io(e.to_string()))
}

/// The result of [`deserialize`]: reconstructed cells (with empty
/// neighbor lists — callers must re-wire them by geometric query) plus
/// the persisted column orders.
pub struct LoadedGrid {
    pub cells: Vec<Cell>,
    pub population_columns: Vec<String>,
    pub mortality_columns: Vec<String>,
}

/// Read back a grid previously written by [`serialize`].
///
/// # Errors
/// Returns [`GridError::Io`] on a malformed or truncated stream, or a
/// version mismatch.
pub fn deserialize(input: &mut impl Read) -> Result<LoadedGrid, GridError> {
    (|| -> io::Result<LoadedGrid> {
        let magic = read_u32(input)?;
        if magic != MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad grid file magic"));
        }
        let version = read_u32(input)?;
        if version != VERSION {
            return Err(io::Error::new(io::ErrorKind::InvalidData, format!("unsupported grid version {version}")));
        }

        let n_pop = read_u32(input)?;
        let population_columns: Vec<String> = (0..n_pop).map(|_| read_string(input)).collect::<io::Result<_>>()?;
        let n_mort = read_u32(input)?;
        let mortality_columns: Vec<String> = (0..n_mort).map(|_| read_string(input)).collect::<io::Result<_>>()?;

        let n_cells = read_u32(input)?;
        let mut cells = Vec::with_capacity(n_cells as usize);
        for _ in 0..n_cells {
            let id = read_u32(input)?;
            let layer = read_u32(input)? as usize;

            let n_points = read_u32(input)?;
            let mut coords = Vec::with_capacity(n_points as usize);
            for _ in 0..n_points {
                let x = read_f64(input)?;
                let y = read_f64(input)?;
                coords.push((x, y));
            }
            let (x0, y0) = coords.first().copied().unwrap_or((0.0, 0.0));
            let (x1, y1) = coords.get(2).copied().unwrap_or((x0, y0));
            let geom = rect(x0, y0, x1, y1);

            let z_bottom = read_f64(input)?;
            let z_top = read_f64(input)?;
            let dx = read_f64(input)?;
            let dy = read_f64(input)?;
            let dz = read_f64(input)?;
            let volume = read_f64(input)?;

            let n_species = read_u32(input)? as usize;
            let cf: Vec<Concentration> = (0..n_species).map(|_| read_f64(input).map(Concentration::new)).collect::<io::Result<_>>()?;
            let ci: Vec<Concentration> = (0..n_species).map(|_| read_f64(input).map(Concentration::new)).collect::<io::Result<_>>()?;
            let emis_flux: Vec<VolumetricFlux> = (0..n_species).map(|_| read_f64(input).map(VolumetricFlux::new)).collect::<io::Result<_>>()?;
            let v_dep: Vec<MetersPerSecond> = (0..n_species).map(|_| read_f64(input).map(MetersPerSecond::new)).collect::<io::Result<_>>()?;
            let scavenging: Vec<PerSecond> = (0..n_species).map(|_| read_f64(input).map(PerSecond::new)).collect::<io::Result<_>>()?;

            let met = Meteorology {
                u: read_f64(input)?,
                v: read_f64(input)?,
                w: read_f64(input)?,
                kx: read_f64(input)?,
                ky: read_f64(input)?,
                kz: read_f64(input)?,
                boundary_layer_height: read_f64(input)?,
                monin_obukhov_length: read_f64(input)?,
                friction_velocity: read_f64(input)?,
                temperature_k: read_f64(input)?,
                density: read_f64(input)?,
                rain_rate: read_f64(input)?,
                cloud_fraction: read_f64(input)?,
                wind_direction_stddev: read_f64(input)?,
                s1: read_f64(input)?,
                s_class: read_f64(input)?,
            };

            let population = read_map(input)?;
            let mortality = read_map(input)?;

            cells.push(Cell {
                id,
                layer,
                geom,
                z_bottom,
                z_top,
                dx,
                dy,
                dz,
                volume,
                cf,
                ci,
                emis_flux,
                met,
                v_dep,
                scavenging,
                population,
                mortality,
                west: vec![],
                east: vec![],
                south: vec![],
                north: vec![],
                below: vec![],
                above: vec![],
            });
        }

        Ok(LoadedGrid { cells, population_columns, mortality_columns })
    })()
.map_err(|e| GridError::Io(e.to_string()))
}

const ADJACENCY_EPS: f64 = 1e-6;

/// Turn a [`LoadedGrid`] into a fully neighbor-wired [`Grid`] by
/// geometric query rather than anything persisted: same-layer cells are
/// horizontal neighbors when one's east (or north) face coincides with
/// the other's west (or south) face over some shared extent, and cells
/// on adjacent layers are vertical neighbors when their footprints
/// overlap in plan view.
#[must_use]
pub fn rewire_neighbors(loaded: LoadedGrid) -> Grid {
    let mut grid = Grid::empty(loaded.population_columns, loaded.mortality_columns);
    let ids: Vec<CellId> = loaded.cells.into_iter().map(|cell| grid.insert(cell)).collect();

    for i in 0..ids.len() {
        for j in (i + 1)..ids.len() {
            wire_if_adjacent(&mut grid, ids[i], ids[j]);
        }
    }
    grid
}

struct Footprint {
    layer: usize,
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
    z_bottom: f64,
    z_top: f64,
}

fn footprint(cell: &Cell) -> Footprint {
    use geo::BoundingRect;
    let r = cell.geom.bounding_rect().expect("cell polygon must be non-degenerate");
    Footprint {
        layer: cell.layer,
        x0: r.min().x,
        y0: r.min().y,
        x1: r.max().x,
        y1: r.max().y,
        z_bottom: cell.z_bottom,
        z_top: cell.z_top,
    }
}

fn wire_if_adjacent(grid: &mut Grid, a_id: CellId, b_id: CellId) {
    let a = footprint(grid.cell(a_id).expect("live cell"));
    let b = footprint(grid.cell(b_id).expect("live cell"));

    if a.layer == b.layer {
        let dz = (a.z_top.min(b.z_top) - a.z_bottom.max(b.z_bottom)).max(0.0);
        if dz <= ADJACENCY_EPS {
            return;
        }
        if (a.x1 - b.x0).abs() < ADJACENCY_EPS {
            wire_horizontal(grid, a_id, b_id, Direction::East, &a, &b, dz);
        } else if (b.x1 - a.x0).abs() < ADJACENCY_EPS {
            wire_horizontal(grid, b_id, a_id, Direction::East, &b, &a, dz);
        }
        if (a.y1 - b.y0).abs() < ADJACENCY_EPS {
            wire_horizontal(grid, a_id, b_id, Direction::North, &a, &b, dz);
        } else if (b.y1 - a.y0).abs() < ADJACENCY_EPS {
            wire_horizontal(grid, b_id, a_id, Direction::North, &b, &a, dz);
        }
    } else if a.layer + 1 == b.layer {
        wire_vertical(grid, a_id, b_id, &a, &b);
    } else if b.layer + 1 == a.layer {
        wire_vertical(grid, b_id, a_id, &b, &a);
    }
}

/// Wire `low` (the south/west side) to `high` across a shared vertical
/// face in `dir`, each side's fraction relative to its own face extent.
fn wire_horizontal(
    grid: &mut Grid,
    low: CellId,
    high: CellId,
    dir: Direction,
    low_fp: &Footprint,
    high_fp: &Footprint,
    dz: f64,
) {
    let (low_extent, high_extent, overlap) = match dir {
        Direction::East => (
            low_fp.y1 - low_fp.y0,
            high_fp.y1 - high_fp.y0,
            (low_fp.y1.min(high_fp.y1) - low_fp.y0.max(high_fp.y0)).max(0.0),
        ),
        Direction::North => (
            low_fp.x1 - low_fp.x0,
            high_fp.x1 - high_fp.x0,
            (low_fp.x1.min(high_fp.x1) - low_fp.x0.max(high_fp.x0)).max(0.0),
        ),
        _ => unreachable!("wire_horizontal is only called for East/North"),
    };
    if overlap <= ADJACENCY_EPS || low_extent <= 0.0 || high_extent <= 0.0 {
        return;
    }
    let face_area = overlap * dz;
    push_link(grid, low, dir, high, overlap / low_extent, face_area);
    push_link(grid, high, dir.opposite(), low, overlap / high_extent, face_area);
}

/// Wire `below` to `above` across their plan-view footprint overlap.
fn wire_vertical(grid: &mut Grid, below: CellId, above: CellId, below_fp: &Footprint, above_fp: &Footprint) {
    let overlap_x = (below_fp.x1.min(above_fp.x1) - below_fp.x0.max(above_fp.x0)).max(0.0);
    let overlap_y = (below_fp.y1.min(above_fp.y1) - below_fp.y0.max(above_fp.y0)).max(0.0);
    let overlap_area = overlap_x * overlap_y;
    if overlap_area <= ADJACENCY_EPS {
        return;
    }
    let below_area = (below_fp.x1 - below_fp.x0) * (below_fp.y1 - below_fp.y0);
    let above_area = (above_fp.x1 - above_fp.x0) * (above_fp.y1 - above_fp.y0);
    if below_area <= 0.0 || above_area <= 0.0 {
        return;
    }
    push_link(grid, below, Direction::Above, above, overlap_area / below_area, overlap_area);
    push_link(grid, above, Direction::Below, below, overlap_area / above_area, overlap_area);
}

fn push_link(grid: &mut Grid, on: CellId, dir: Direction, target: CellId, fraction: f64, face_area: f64) {
    if let Some(cell) = grid.cell_mut(on) {
        cell.neighbors_mut(dir).push(NeighborLink { id: target, fraction, face_area });
    }
}
