//! Variable schema: which physical domains exist, how their sub-groups map
//! to raw ASTEC storage locations, and which per-element metadata to extract

/// Typed configuration structures
pub mod config;
/// Load and validate the embedded schema tables
pub mod load;
