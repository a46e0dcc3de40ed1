//! Persistence boundary: JSON schedule snapshots and Parquet formula exports.

mod error;
mod export;
mod snapshot;

pub use error::StoreError;
pub use export::{formula_batch, write_formula_parquet};
pub use snapshot::SnapshotStore;
