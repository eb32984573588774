//! Configuration management for the tap executor.
//!
//! Provides environment detection, layered configuration loading from YAML files and
//! environment variables, secret handling, and the shared configuration types used by
//! the executor library and the runner binary.

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::*;
pub use load::*;
pub use secret::*;
