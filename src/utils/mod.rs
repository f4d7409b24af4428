//! Utility modules.
pub mod querylog;
