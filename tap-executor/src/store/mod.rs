//! Durable storage of runs and their bookmarks.

mod base;
pub mod file;
pub mod memory;
pub mod postgres;

pub use base::{StateStore, StoredRun};
