//! SLURM boundary: render job scripts and talk to the scheduler commands

/// Scheduler trait and the sbatch/squeue/sacct/scancel implementation
pub mod scheduler;
/// Render per-dataset job scripts from configuration templates
pub mod job;
