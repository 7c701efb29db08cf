//! Drives the worker pool across every `(source_layer, source_column)`
//! job and assembles the results into an [`SrMatrix`].
//!
//! Jobs are dispatched over a bounded crossbeam-channel request/reply
//! pair rather than a plain in-process fan-out, since SR jobs are
//! independently retryable units of work that may run on remote hosts.

use crate::job::{JobKey, JobStatus, JobTable};
use crate::matrix::{SrGeometry, SrMatrix};
use crate::worker::{run_source_job, MechanismFactory};
use crossbeam_channel::{bounded, RecvTimeoutError};
use inmap_core::cell::CellId;
use inmap_core::ctmdata::CtmData;
use inmap_core::grid::Grid;
use inmap_core::runner::CancellationToken;
use inmap_core::RunConfig;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Policy governing worker count, retry attempts, and backoff, for an
/// [`SrBuilder`] run.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub n_workers: usize,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        BuilderConfig {
            n_workers: 4,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            backoff_multiplier: 2.0,
        }
    }
}

/// Outcome of a full SR build: the matrix (rows for missing jobs left
/// zero) plus the list of jobs that never completed after exhausting
/// retries or due to cancellation.
pub struct SrBuildResult {
    pub matrix: SrMatrix,
    pub missing: Vec<JobKey>,
    pub jobs: JobTable,
}

struct JobRequest {
    source_layer: usize,
    source_column: usize,
    layer_idx: usize,
    attempt: u32,
}

struct JobReply {
    request_key: JobKey,
    layer_idx: usize,
    attempt: u32,
    outcome: Result<Vec<f64>, String>,
}

/// Dispatches one full SR build across an in-process worker pool.
pub struct SrBuilder {
    config: BuilderConfig,
}

impl SrBuilder {
    #[must_use]
    pub fn new(config: BuilderConfig) -> Self {
        SrBuilder { config }
    }

    /// Build the matrix for `source_layers x [0, n_source_columns)`
    /// against `receptor_ids` (in the order they'll be indexed in the
    /// resulting matrix).
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &self,
        base_grid: &Grid,
        ctm: &CtmData,
        mechanism_factory: MechanismFactory,
        run_config: &RunConfig,
        source_layers: &[usize],
        n_source_columns: usize,
        receptor_ids: Vec<CellId>,
        emission_units: &str,
        cancellation: &CancellationToken,
    ) -> SrBuildResult {
        let species = (mechanism_factory)().species().to_vec();
        let source_columns: Vec<_> = (0..n_source_columns)
.map(|col| crate::worker::source_footprint(ctm, col))
.collect();
        let receptors: Vec<_> = receptor_ids
.iter()
.filter_map(|&id| base_grid.cell(id).map(|c| c.geom.clone()))
.collect();

        let geometry = SrGeometry {
            species,
            source_layers: source_layers.to_vec(),
            source_columns,
            receptors,
            emission_units: emission_units.to_string(),
        };
        let mut matrix = SrMatrix::empty(geometry);

        let all_jobs: Vec<JobKey> = source_layers
.iter()
.flat_map(|&layer| (0..n_source_columns).map(move |col| (layer, col)))
.collect();
        let mut jobs = JobTable::new(all_jobs.iter().copied());
        let mut attempts: std::collections::HashMap<JobKey, u32> = std::collections::HashMap::new();

        let queue_capacity = (all_jobs.len().max(1)).min(1024);
        let (req_tx, req_rx) = bounded::<JobRequest>(queue_capacity);
        let (reply_tx, reply_rx) = bounded::<JobReply>(queue_capacity);

        let handles: Vec<_> = (0..self.config.n_workers)
.map(|worker_id| {
                let req_rx = req_rx.clone();
                let reply_tx = reply_tx.clone();
                let base_grid = base_grid.clone();
                let ctm = ctm.clone();
                let mechanism_factory = mechanism_factory.clone();
                let run_config = run_config.clone();
                let receptor_ids = receptor_ids.clone();
                thread::Builder::new()
.name(format!("sr-worker-{worker_id}"))
.spawn(move || {
                        while let Ok(req) = req_rx.recv() {
                            let outcome = run_source_job(
                                &base_grid,
                                &ctm,
                                &mechanism_factory,
                                &run_config,
                                req.source_layer,
                                req.source_column,
                                &receptor_ids,
                            )
.map_err(|e| e.to_string());
                            let reply = JobReply {
                                request_key: (req.source_layer, req.source_column),
                                layer_idx: req.layer_idx,
                                attempt: req.attempt,
                                outcome,
                            };
                            if reply_tx.send(reply).is_err() {
                                break;
                            }
                        }
                    })
.expect("failed to spawn SR worker thread")
            })
.collect();
        drop(req_rx);
        drop(reply_tx);

        for &(layer, col) in &all_jobs {
            let layer_idx = matrix.geometry.layer_index(layer).expect("layer must be in source_layers");
            jobs.set((layer, col), JobStatus::Waiting);
            let _ = req_tx.send(JobRequest { source_layer: layer, source_column: col, layer_idx, attempt: 1 });
        }

        let mut remaining = all_jobs.len();
        while remaining > 0 {
            if cancellation.is_cancelled() {
                warn!(remaining, "SR build cancelled, reporting partial result");
                break;
            }
            match reply_rx.recv_timeout(Duration::from_secs(5)) {
                Ok(reply) => {
                    remaining -= 1;
                    match reply.outcome {
                        Ok(row) => {
                            matrix.set_row(reply.layer_idx, reply.request_key.1, &row);
                            jobs.set(reply.request_key, JobStatus::Complete);
                        }
                        Err(detail) => {
                            let attempt_count = attempts.entry(reply.request_key).or_insert(0);
                            *attempt_count += 1;
                            if *attempt_count < self.config.max_attempts {
                                let backoff = self.config.initial_backoff.mul_f64(self.config.backoff_multiplier.powi(*attempt_count as i32 - 1));
                                warn!(?reply.request_key, attempt = *attempt_count, %detail, backoff_ms = backoff.as_millis(), "SR job failed, retrying");
                                thread::sleep(backoff);
                                jobs.set(reply.request_key, JobStatus::Waiting);
                                remaining += 1;
                                let _ = req_tx.send(JobRequest {
                                    source_layer: reply.request_key.0,
                                    source_column: reply.request_key.1,
                                    layer_idx: reply.layer_idx,
                                    attempt: reply.attempt + 1,
                                });
                            } else {
                                warn!(?reply.request_key, attempts = *attempt_count, "SR job exhausted retries");
                                jobs.set(reply.request_key, JobStatus::Failed);
                            }
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(remaining, "SR build stalled waiting on workers");
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        drop(req_tx);
        for handle in handles {
            let _ = handle.join();
        }

        let missing: Vec<JobKey> = all_jobs.into_iter().filter(|&key| jobs.status(key) != JobStatus::Complete).collect();
        info!(total = matrix.geometry.n_source_layers() * matrix.geometry.n_source_columns(), missing = missing.len(), "SR build finished");

        SrBuildResult { matrix, missing, jobs }
    }
}
