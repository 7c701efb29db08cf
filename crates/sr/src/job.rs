//! Source-receptor job identity and status tracking.

use std::collections::HashMap;

/// A single dispatched unit: one base-grid `(source_layer, source_column)`
/// pair, corresponding to exactly one full single-source simulation.
pub type JobKey = (usize, usize);

/// State machine for one SR job: `Missing -> Waiting ->
/// Running -> {Complete, Failed}`. `Failed` is recoverable by re-submit;
/// `Complete` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Missing,
    Waiting,
    Running,
    Complete,
    Failed,
}

/// Tracks every job's current status so a caller can poll progress
/// independently of the final matrix/missing-row result.
#[derive(Debug, Default)]
pub struct JobTable {
    statuses: HashMap<JobKey, JobStatus>,
}

impl JobTable {
    #[must_use]
    pub fn new(jobs: impl IntoIterator<Item = JobKey>) -> Self {
        JobTable { statuses: jobs.into_iter().map(|key| (key, JobStatus::Missing)).collect() }
    }

    pub fn set(&mut self, key: JobKey, status: JobStatus) {
        self.statuses.insert(key, status);
    }

    #[must_use]
    pub fn status(&self, key: JobKey) -> JobStatus {
        self.statuses.get(&key).copied().unwrap_or(JobStatus::Missing)
    }

    #[must_use]
    pub fn all_terminal(&self) -> bool {
        self.statuses.values().all(|s| matches!(s, JobStatus::Complete | JobStatus::Failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_job_reports_missing() {
        let table = JobTable::new([(0, 0), (0, 1)]);
        assert_eq!(table.status((0, 0)), JobStatus::Missing);
        assert_eq!(table.status((5, 5)), JobStatus::Missing);
    }

    #[test]
    fn transitions_are_visible_through_status() {
        let mut table = JobTable::new([(0, 0)]);
        table.set((0, 0), JobStatus::Waiting);
        assert_eq!(table.status((0, 0)), JobStatus::Waiting);
        table.set((0, 0), JobStatus::Running);
        assert_eq!(table.status((0, 0)), JobStatus::Running);
        table.set((0, 0), JobStatus::Complete);
        assert_eq!(table.status((0, 0)), JobStatus::Complete);
    }

    #[test]
    fn all_terminal_requires_every_job_resolved() {
        let mut table = JobTable::new([(0, 0), (0, 1)]);
        assert!(!table.all_terminal());
        table.set((0, 0), JobStatus::Complete);
        assert!(!table.all_terminal());
        table.set((0, 1), JobStatus::Failed);
        assert!(table.all_terminal());
    }
}
