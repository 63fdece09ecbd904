use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

use log::{info, warn};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to run {command}: {detail}")]
    Spawn { command: String, detail: String },
    #[error("{command} exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("can't parse scheduler output: {0}")]
    Parse(String),
}

/// Transient failures (node loss, preemption, timeout) are resubmitted by
/// the orchestrator; fatal ones wait for operator action.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Fatal,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Cancelled,
    Failed(FailureKind),
}

impl JobState {
    /// Short state codes as printed by `squeue --format=%t`
    pub fn from_slurm_code(code: &str) -> Option<JobState> {
        match code {
            "PD" | "S" => Some(JobState::Queued),
            "R" | "CG" => Some(JobState::Running),
            "CD" => Some(JobState::Completed),
            "CA" => Some(JobState::Cancelled),
            "F" | "OOM" => Some(JobState::Failed(FailureKind::Fatal)),
            "TO" | "NF" | "PR" => Some(JobState::Failed(FailureKind::Transient)),
            _ => None,
        }
    }

    /// Long state names as printed by sacct, e.g. "CANCELLED by 1000"
    pub fn from_slurm_name(name: &str) -> Option<JobState> {
        let head = name.split_whitespace().next().unwrap_or(name);
        match head {
            "PENDING" | "SUSPENDED" => Some(JobState::Queued),
            "RUNNING" | "COMPLETING" => Some(JobState::Running),
            "COMPLETED" => Some(JobState::Completed),
            "FAILED" | "OUT_OF_MEMORY" => Some(JobState::Failed(FailureKind::Fatal)),
            "TIMEOUT" | "NODE_FAIL" | "PREEMPTED" => {
                Some(JobState::Failed(FailureKind::Transient))
            }
            head if head.starts_with("CANCELLED") => Some(JobState::Cancelled),
            _ => None,
        }
    }
}

/// External scheduler boundary. Queries are batched across all outstanding
/// job ids so one poll tick costs one (or two) scheduler commands.
pub trait Scheduler {
    fn submit(&self, script: &Path) -> Result<String, SchedulerError>;
    fn query(&self, job_ids: &[String]) -> Result<HashMap<String, JobState>, SchedulerError>;
    fn cancel(&self, job_id: &str) -> Result<(), SchedulerError>;
}

/// Shells out to the SLURM command line tools
pub struct SlurmScheduler {
    pub sbatch: String,
    pub squeue: String,
    pub sacct: String,
    pub scancel: String,
}

impl Default for SlurmScheduler {
    fn default() -> Self {
        SlurmScheduler {
            sbatch: "sbatch".to_string(),
            squeue: "squeue".to_string(),
            sacct: "sacct".to_string(),
            scancel: "scancel".to_string(),
        }
    }
}

impl Scheduler for SlurmScheduler {
    fn submit(&self, script: &Path) -> Result<String, SchedulerError> {
        let script = script.to_string_lossy();
        info!("Running {} --parsable {script}", self.sbatch);
        let stdout = run(&self.sbatch, &["--parsable", &script])?;

        // --parsable prints "jobid[;cluster]"
        let job_id = stdout
            .trim()
            .split(';')
            .next()
            .filter(|id| !id.is_empty() && id.chars().all(|ch| ch.is_ascii_digit()))
            .ok_or_else(|| SchedulerError::Parse(format!("unexpected sbatch output: {stdout}")))?;

        Ok(job_id.to_string())
    }

    fn query(&self, job_ids: &[String]) -> Result<HashMap<String, JobState>, SchedulerError> {
        let mut states = HashMap::new();
        if job_ids.is_empty() {
            return Ok(states);
        }

        let joined = job_ids.join(",");
        let stdout = run(
            &self.squeue,
            &["--noheader", "--format=%i,%t", "--jobs", &joined],
        )?;
        for line in stdout.lines().filter(|line| !line.trim().is_empty()) {
            let (job_id, code) = line
                .trim()
                .split_once(',')
                .ok_or_else(|| SchedulerError::Parse(format!("unexpected squeue line: {line}")))?;
            if let Some(state) = JobState::from_slurm_code(code) {
                states.insert(job_id.to_string(), state);
            } else {
                warn!("Unknown squeue state code {code} for job {job_id}");
            }
        }

        // jobs that already left the queue are resolved through accounting
        let finished: Vec<&String> = job_ids
            .iter()
            .filter(|id| !states.contains_key(*id))
            .collect();
        if !finished.is_empty() {
            self.query_accounting(&finished, &mut states);
        }

        Ok(states)
    }

    fn cancel(&self, job_id: &str) -> Result<(), SchedulerError> {
        info!("Running {} {job_id}", self.scancel);
        run(&self.scancel, &[job_id])?;

        Ok(())
    }
}

impl SlurmScheduler {
    fn query_accounting(&self, job_ids: &[&String], states: &mut HashMap<String, JobState>) {
        let joined = job_ids
            .iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let stdout = match run(
            &self.sacct,
            &[
                "--parsable2",
                "--noheader",
                "--format=JobID,State",
                "--jobs",
                &joined,
            ],
        ) {
            Ok(stdout) => stdout,
            Err(err) => {
                // no accounting available: a job missing from squeue is done
                warn!("sacct unavailable ({err}), assuming finished jobs completed");
                for id in job_ids {
                    states.insert((*id).clone(), JobState::Completed);
                }
                return;
            }
        };

        for line in stdout.lines().filter(|line| !line.trim().is_empty()) {
            let Some((job_id, name)) = line.trim().split_once('|') else {
                continue;
            };
            // skip ".batch"/".extern" step rows
            if !job_ids.iter().any(|id| id.as_str() == job_id) {
                continue;
            }
            if let Some(state) = JobState::from_slurm_name(name) {
                states.insert(job_id.to_string(), state);
            }
        }

        // accounting can be purged or disabled while sacct still exits 0;
        // a job in neither squeue nor accounting has left the system
        for id in job_ids {
            if !states.contains_key(id.as_str()) {
                warn!("Job {id} is missing from accounting, assuming it completed");
                states.insert((*id).clone(), JobState::Completed);
            }
        }
    }
}

fn run(command: &str, arguments: &[&str]) -> Result<String, SchedulerError> {
    let output = Command::new(command)
        .args(arguments)
        .output()
        .map_err(|err| SchedulerError::Spawn {
            command: command.to_string(),
            detail: err.to_string(),
        })?;

    if !output.status.success() {
        return Err(SchedulerError::CommandFailed {
            command: command.to_string(),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
