//! Utility modules for savepoint.

pub mod errors;
pub mod logger;

pub use errors::{Result, SavepointError};
