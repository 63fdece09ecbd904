//! Project one archive into one HDF5 output container whose group layout
//! mirrors the variable schema

/// Schema-driven conversion of archive contents to HDF5
pub mod engine;
/// Outcome summary of one conversion
pub mod report;
/// Worker entry point run inside the SLURM allocation
pub mod worker;
