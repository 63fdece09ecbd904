//! All dataset state is stored in a SQLite catalogue

/// Connect to the catalogue database
pub mod open;
/// Dataset records and the status state machine
pub mod record;
/// Register, query, and transition dataset records
pub mod catalogue;
