//! Destinations of validated records.

mod base;
pub mod memory;
pub mod postgres;
pub mod stdout;

pub use base::{BatchOrigin, Sink};
