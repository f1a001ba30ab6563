pub mod backoff;
pub mod conflict;
pub mod engine;
pub mod filter;
pub mod hasher;
pub mod paths;
pub mod reconcile;
pub mod remote;
pub mod snapshot;
#[cfg(test)]
mod testing;
pub mod transfer;
pub mod vault;
