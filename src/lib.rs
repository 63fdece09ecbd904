//! Track ASTEC simulation result archives, convert them into HDF5 datasets,
//! and reconcile SLURM batch job outcomes into a persistent catalogue.

use std::path::PathBuf;

/// Static variable schema shared by every conversion
pub mod schema;
/// Read timepoints, variables, and element metadata from a result archive
pub mod archive;
/// Project one archive into one HDF5 output container
pub mod convert;
/// All dataset state is stored in a SQLite catalogue
pub mod db;
/// SLURM boundary: job script rendering and scheduler commands
pub mod slurm;
/// Submit conversion jobs and reconcile their outcomes
pub mod orchestrator;

/// Directory holding the catalogue database and per-dataset job directories
pub struct WorkingDirectory {
    pub path: PathBuf,
}
