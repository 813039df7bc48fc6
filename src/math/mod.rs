// src/math/mod.rs
pub mod delta;
pub mod reconcile;

pub use delta::{DeltaNormalizer, NormalizeReport};
pub use reconcile::{stale_year_groups, VersionReconciler};
