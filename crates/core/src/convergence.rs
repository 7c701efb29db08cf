//! Population-weighted convergence testing.
//!
//! Tracks a rolling history of a population-weighted mean per species
//! and compares the newest value against one `window` samples back.

use crate::cell::Cell;
use crate::config::ConvergenceConfig;
use crate::mechanism::Mechanism;

/// Population-weighted mean concentration per species:
/// `μ_s = Σ_c pop_c · Cf_c,s / Σ_c pop_c`.
#[must_use]
pub fn population_weighted_means(cells: &[Cell]) -> Vec<f64> {
    let n_species = cells.first().map_or(0, |c| c.cf.len());
    let mut sums = vec![0.0; n_species];
    let mut total_population = 0.0;

    for cell in cells {
        let pop = cell.total_population();
        total_population += pop;
        for (s, c) in cell.cf.iter().enumerate() {
            sums[s] += pop * c.value();
        }
    }

    if total_population <= 0.0 {
        return vec![0.0; n_species];
    }
    sums.iter().map(|s| s / total_population).collect()
}

/// Tracks a rolling history of population-weighted means and answers
/// whether the run has converged.
#[derive(Debug, Default)]
pub struct ConvergenceTracker {
    history: Vec<Vec<f64>>,
}

impl ConvergenceTracker {
    #[must_use]
    pub fn new() -> Self {
        ConvergenceTracker { history: Vec::new() }
    }

    /// Record one iteration's means, keeping only the most recent
    /// `window + 1` entries.
    pub fn push(&mut self, means: Vec<f64>, window: usize) {
        self.history.push(means);
        let keep = window + 1;
        if self.history.len() > keep {
            let drop = self.history.len() - keep;
            self.history.drain(0..drop);
        }
    }

    /// `true` once the max relative change between the latest means and
    /// the means `window` entries back is under `tolerance`, across
    /// every species. Requires a full window of history.
    #[must_use]
    pub fn has_converged(&self, window: usize, tolerance: f64) -> bool {
        if self.history.len() < window + 1 {
            return false;
        }
        let latest = self.history.last().unwrap();
        let past = &self.history[self.history.len() - 1 - window];

        latest.iter().zip(past.iter()).all(|(&now, &then)| {
            if now.abs() < f64::EPSILON {
                then.abs() < f64::EPSILON
            } else {
                ((now - then) / now).abs() < tolerance
            }
        })
    }

    /// Convenience wrapper combining [`Self::push`] and
    /// [`Self::has_converged`] against a [`ConvergenceConfig`].
    pub fn record_and_check(&mut self, cells: &[Cell], _mechanism: &dyn Mechanism, config: &ConvergenceConfig) -> bool {
        let means = population_weighted_means(cells);
        self.push(means, config.window);
        self.has_converged(config.window, config.relative_tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Meteorology;
    use crate::geom::rect;
    use crate::units::{Concentration, MetersPerSecond, PerSecond, VolumetricFlux};

    fn weighted_cell(pop: f64, conc: f64) -> Cell {
        let mut population = std::collections::BTreeMap::new();
        population.insert("total".to_string(), pop);
        Cell {
            id: 0,
            layer: 0,
            geom: rect(0.0, 0.0, 1000.0, 1000.0),
            z_bottom: 0.0,
            z_top: 50.0,
            dx: 1000.0,
            dy: 1000.0,
            dz: 50.0,
            volume: 1000.0 * 1000.0 * 50.0,
            cf: vec![Concentration::new(conc)],
            ci: vec![Concentration::new(conc)],
            emis_flux: vec![VolumetricFlux::new(0.0)],
            met: Meteorology::default(),
            v_dep: vec![MetersPerSecond::new(0.0)],
            scavenging: vec![PerSecond::new(0.0)],
            population,
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
    fn population_weighted_mean_ignores_unpopulated_cells() {
        let cells = vec![weighted_cell(0.0, 100.0), weighted_cell(10.0, 5.0)];
        let means = population_weighted_means(&cells);
        assert!((means[0] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn identical_means_across_the_window_converge() {
        let mut tracker = ConvergenceTracker::new();
        for _ in 0..=5 {
            tracker.push(vec![3.0], 5);
        }
        assert!(tracker.has_converged(5, 1e-4));
    }

    #[test]
    fn large_drift_does_not_converge() {
        let mut tracker = ConvergenceTracker::new();
        for i in 0..=5 {
            tracker.push(vec![1.0 + i as f64], 5);
        }
        assert!(!tracker.has_converged(5, 1e-4));
    }

    #[test]
    fn insufficient_history_never_converges() {
        let mut tracker = ConvergenceTracker::new();
        tracker.push(vec![1.0], 10);
        assert!(!tracker.has_converged(10, 1e-4));
    }
}
