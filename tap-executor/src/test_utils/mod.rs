//! Helpers for testing runs without real taps or databases.
//!
//! Taps are replaced by scripts replaying protocol lines, and stores and sinks can be wrapped
//! to inject failures and to wait for progress.
pub mod database;
pub mod launcher;
pub mod messages;
pub mod notify;
pub mod sink;
pub mod store;
