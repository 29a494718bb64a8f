//! Room block allocation: pick the cheapest group of nearby units, then
//! commit it atomically against a shared inventory.

pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod store;
pub mod tasks;
pub mod wal;
