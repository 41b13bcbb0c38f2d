pub mod models;
pub mod runs;

pub use runs::{ResetCounts, RunFilter, RunStore};
