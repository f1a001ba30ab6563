//! Manual, conflict-aware synchronization between a local vault directory
//! and a flat remote folder.

pub mod config;
pub mod sync;
pub mod token_provider;
