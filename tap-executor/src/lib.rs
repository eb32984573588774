//! Execution engine for taps speaking the line-delimited JSON streaming protocol.
//!
//! A run spawns a tap, decodes its standard output into SCHEMA, RECORD and STATE messages,
//! validates records against the latest schema of their stream, delivers them in batches to a
//! [`sink::Sink`] and commits bookmarks to a [`store::StateStore`] once every record emitted
//! before them has been delivered.
//!
//! Runs are started through [`run::RunManager`], or driven directly with
//! [`run::RunCoordinator`].

pub mod concurrency;
pub mod conversions;
pub mod discovery;
pub mod error;
mod macros;
pub mod metrics;
pub mod process;
pub mod protocol;
pub mod run;
pub mod schema;
pub mod sink;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
