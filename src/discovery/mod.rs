// src/discovery/mod.rs
pub mod nsd;
pub mod queue;

pub use nsd::{discover, DiscoveryOutcome};
pub use queue::build_scrape_queue;
