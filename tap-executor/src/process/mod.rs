//! Launching taps and reading their output.

mod base;
pub mod command;
mod lines;
mod stderr;

pub use base::{
    TapConfigSource, TapExit, TapInvocation, TapLauncher, TapLine, TapMode, TapProcess,
};
pub use command::{CommandLauncher, CommandProcess};
pub use lines::LineReader;
pub use stderr::StderrTail;
