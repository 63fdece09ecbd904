//! Adapter over the simulator's native result archives
//!
//! The proprietary odessa reader lives behind the [`source::ArchiveSource`]
//! trait; [`handle::ArchiveHandle`] drives any source through the schema's
//! vocabulary of domains, sub-groups, and metadata entries.

/// Raw reading boundary and the JSON archive export implementation
pub mod source;
/// Scoped archive handle exposing timepoints, variables, and metadata
pub mod handle;
