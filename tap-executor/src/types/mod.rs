//! Common types used throughout the executor.
//!
//! Includes the value model shared by the protocol and the schema registry, the protocol
//! messages themselves, and the identifiers and state of runs.

mod message;
mod run;
mod value;

pub use message::*;
pub use run::*;
pub use value::*;
