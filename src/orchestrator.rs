//! Submit conversion jobs to SLURM and reconcile their outcomes into the
//! catalogue, with bounded automatic retries for transient failures

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use rusqlite::Connection;

use crate::db::catalogue;
use crate::db::record::DatasetStatus;
use crate::slurm::job::{create_job_script, JobOptions};
use crate::slurm::scheduler::{FailureKind, JobState, Scheduler};
use crate::WorkingDirectory;

/// Maps one tracked dataset to its external SLURM job. Discarded once the
/// record reaches a terminal state.
#[derive(Debug, Clone)]
struct JobHandle {
    slurm_id: String,
}

/// Owns the collection of in-flight job handles. Multiple independent
/// orchestrators can coexist in one process; nothing here is global.
pub struct Orchestrator<S: Scheduler> {
    scheduler: S,
    /// dataset uuid -> outstanding job handle
    handles: HashMap<String, JobHandle>,
    max_attempts: u32,
    pub job_options: JobOptions,
}

impl<S: Scheduler> Orchestrator<S> {
    pub fn new(scheduler: S, max_attempts: u32) -> Self {
        Orchestrator {
            scheduler,
            handles: HashMap::new(),
            max_attempts,
            job_options: JobOptions::default(),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.handles.len()
    }

    /// Rebuild in-flight handles from catalogue records that still carry a
    /// SLURM job id, so polling survives process restarts
    pub fn recover(&mut self, conn: &Connection) -> Result<()> {
        for status in [DatasetStatus::Submitted, DatasetStatus::Running] {
            for record in catalogue::list_by_status(conn, status)? {
                if let Some(slurm_id) = record.slurm_id {
                    info!("Recovered in-flight job {slurm_id} for dataset {}", record.uuid);
                    self.handles.insert(record.uuid, JobHandle { slurm_id });
                }
            }
        }

        Ok(())
    }

    /// Render a job script, submit it, and move the record to `submitted`
    pub fn submit(&mut self, conn: &Connection, wd: &WorkingDirectory, id: &str) -> Result<String> {
        let record = catalogue::find(conn, id)?;
        let script = create_job_script(wd, &record.uuid, &self.job_options)?;
        let slurm_id = self.scheduler.submit(&script.path)?;

        catalogue::update_status(conn, id, DatasetStatus::Submitted, None)?;
        catalogue::set_job(conn, id, &slurm_id)?;
        self.handles
            .insert(id.to_string(), JobHandle { slurm_id: slurm_id.clone() });

        info!("Submitted dataset {id} as SLURM job {slurm_id}");
        Ok(slurm_id)
    }

    /// Ask the scheduler to kill the job. The catalogue only moves to
    /// `failed` once a later poll confirms the job actually left the queue,
    /// never optimistically.
    pub fn cancel(&mut self, conn: &Connection, id: &str) -> Result<()> {
        let record = catalogue::find(conn, id)?;
        let slurm_id = record
            .slurm_id
            .with_context(|| format!("dataset {id} has no scheduler job to cancel"))?;

        self.scheduler.cancel(&slurm_id)?;
        catalogue::mark_cancel_requested(conn, id)?;
        info!("Requested cancellation of SLURM job {slurm_id} for dataset {id}");

        Ok(())
    }

    /// One batched reconciliation pass over all outstanding handles
    pub fn poll_once(&mut self, conn: &Connection, wd: &WorkingDirectory) -> Result<()> {
        if self.handles.is_empty() {
            return Ok(());
        }

        let job_ids: Vec<String> = self
            .handles
            .values()
            .map(|handle| handle.slurm_id.clone())
            .collect();
        let states = self.scheduler.query(&job_ids)?;

        let datasets: Vec<(String, String)> = self
            .handles
            .iter()
            .map(|(dataset, handle)| (dataset.clone(), handle.slurm_id.clone()))
            .collect();

        for (dataset, slurm_id) in datasets {
            let Some(state) = states.get(&slurm_id).copied() else {
                continue;
            };
            self.reconcile(conn, wd, &dataset, state)?;
        }

        Ok(())
    }

    /// Poll until every outstanding job reaches a terminal state
    pub async fn run(
        &mut self,
        conn: &Connection,
        wd: &WorkingDirectory,
        interval: Duration,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;
            if let Err(err) = self.poll_once(conn, wd) {
                warn!("Poll failed, retrying next tick: {err:#}");
            }
            if self.handles.is_empty() {
                info!("All outstanding jobs reconciled");
                return Ok(());
            }
        }
    }

    fn reconcile(
        &mut self,
        conn: &Connection,
        wd: &WorkingDirectory,
        dataset: &str,
        state: JobState,
    ) -> Result<()> {
        let record = catalogue::find(conn, dataset)?;

        match state {
            JobState::Queued => {}
            JobState::Running => {
                if record.status == DatasetStatus::Submitted {
                    catalogue::update_status(conn, dataset, DatasetStatus::Running, None)?;
                }
            }
            JobState::Completed => {
                // the worker normally records `converted` itself; cover the
                // polls that missed intermediate states
                if record.status == DatasetStatus::Submitted {
                    catalogue::update_status(conn, dataset, DatasetStatus::Running, None)?;
                }
                if catalogue::find(conn, dataset)?.status == DatasetStatus::Running {
                    catalogue::update_status(conn, dataset, DatasetStatus::Converted, None)?;
                }
                self.handles.remove(dataset);
            }
            JobState::Cancelled => {
                let detail = if record.cancel_requested {
                    "cancelled on operator request"
                } else {
                    "cancelled by the scheduler"
                };
                self.fail(conn, dataset, record.status, detail)?;
                self.handles.remove(dataset);
            }
            JobState::Failed(kind) => {
                if record.status == DatasetStatus::Converted {
                    self.handles.remove(dataset);
                    return Ok(());
                }
                if record.status == DatasetStatus::Failed {
                    // the worker already recorded a conversion-fatal failure;
                    // those are never retried automatically
                    self.handles.remove(dataset);
                    return Ok(());
                }

                match kind {
                    FailureKind::Transient if record.attempts < self.max_attempts => {
                        self.fail(conn, dataset, record.status, "transient scheduler failure")?;
                        let attempts = catalogue::bump_attempts(conn, dataset)?;
                        info!("Resubmitting dataset {dataset} (attempt {attempts})");
                        self.handles.remove(dataset);
                        self.submit(conn, wd, dataset)?;
                    }
                    FailureKind::Transient => {
                        self.fail(
                            conn,
                            dataset,
                            record.status,
                            "retries exhausted after transient scheduler failures",
                        )?;
                        self.handles.remove(dataset);
                    }
                    FailureKind::Fatal => {
                        self.fail(conn, dataset, record.status, "scheduler reported job failure")?;
                        self.handles.remove(dataset);
                    }
                }
            }
        }

        Ok(())
    }

    fn fail(
        &self,
        conn: &Connection,
        dataset: &str,
        current: DatasetStatus,
        detail: &str,
    ) -> Result<()> {
        if current.can_transition(DatasetStatus::Failed) {
            catalogue::update_status(conn, dataset, DatasetStatus::Failed, Some(detail))?;
        } else {
            warn!("Dataset {dataset} is {current}, not marking failed ({detail})");
        }

        Ok(())
    }
}
