//! Global timestep selection from the CFL stability condition.
//!
//! Reduces over every cell's local stability bound (horizontal/vertical
//! advection and diffusion) and takes the minimum with a safety factor.

use crate::cell::{Cell, Direction};
use crate::units::Seconds;
use rayon::prelude::*;

/// Per-direction CFL bound for one cell: `min(dx / |u|, dx^2 / (2K))`,
/// skipping directions with no flow/diffusivity (unbounded).
fn cell_bound(cell: &Cell) -> f64 {
    let mut bound = f64::INFINITY;

    let horiz = [
        (cell.met.u.abs(), cell.dx, cell.met.kx),
        (cell.met.v.abs(), cell.dy, cell.met.ky),
    ];
    for (speed, length, diffusivity) in horiz {
        if speed > 0.0 {
            bound = bound.min(length / speed);
        }
        if diffusivity > 0.0 {
            bound = bound.min(length * length / (2.0 * diffusivity));
        }
    }

    let speed_w = cell.met.w.abs();
    if speed_w > 0.0 {
        bound = bound.min(cell.dz / speed_w);
    }
    if cell.met.kz > 0.0 {
        bound = bound.min(cell.dz * cell.dz / (2.0 * cell.met.kz));
    }

    bound
}

/// Compute the global `Δt` for the whole cell set: the minimum
/// per-cell CFL bound across the domain, scaled by `safety_factor`.
///
/// Returns `Seconds::ZERO` if the domain is empty (callers should treat
/// this as "no step possible" rather than divide by it).
#[must_use]
pub fn compute_timestep(cells: &[Cell], safety_factor: f64) -> Seconds {
    let min_bound = cells
.par_iter()
.map(cell_bound)
.reduce(|| f64::INFINITY, f64::min);

    if !min_bound.is_finite() || cells.is_empty() {
        return Seconds::ZERO;
    }
    Seconds::new(min_bound * safety_factor.min(1.0))
}

/// Verify the CFL bound holds: `max(|u|Δt/dx, 2KΔt/dx²) < 1` in every
/// direction, for every cell. Used by tests and by the runner's
/// post-mutation sanity check.
#[must_use]
pub fn cfl_numbers_are_stable(cells: &[Cell], dt: Seconds) -> bool {
    let dt_s = dt.value();
    cells.iter().all(|cell| {
        let checks = [
            (cell.met.u.abs() * dt_s / cell.dx, 2.0 * cell.met.kx * dt_s / (cell.dx * cell.dx)),
            (cell.met.v.abs() * dt_s / cell.dy, 2.0 * cell.met.ky * dt_s / (cell.dy * cell.dy)),
            (cell.met.w.abs() * dt_s / cell.dz, 2.0 * cell.met.kz * dt_s / (cell.dz * cell.dz)),
        ];
        checks.iter().all(|&(advect, diffuse)| advect < 1.0 && diffuse < 1.0)
    })
}

/// Recompute the upwind/downwind face area ratio used by advection
///: `min(A_up/A_down, 1)`.
#[must_use]
pub fn face_area_ratio(cell: &Cell, dir: Direction) -> f64 {
    let upwind_area: f64 = cell.neighbors(dir).iter().map(|n| n.face_area).sum();
    let downwind_area = match dir {
        Direction::West | Direction::East => cell.dy * cell.dz,
        Direction::South | Direction::North => cell.dx * cell.dz,
        Direction::Below | Direction::Above => cell.dx * cell.dy,
    };
    if downwind_area <= 0.0 {
        1.0
    } else {
        (upwind_area / downwind_area).min(1.0)
    }
}
