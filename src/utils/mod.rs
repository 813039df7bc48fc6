// src/utils/mod.rs
pub mod debug_dump;
pub mod error;
pub mod logging;
pub mod progress;
pub mod text;

pub use error::AppError; // Re-export main error type for convenience
