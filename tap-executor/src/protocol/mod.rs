//! Line-delimited JSON protocol spoken by taps on standard output.
//!
//! Each line is one message tagged by its `type` field: `SCHEMA`, `RECORD` or `STATE`.
//! `ACTIVATE_VERSION` messages are recognised and dropped.

mod decoder;
mod encoder;

pub use decoder::{DecodeError, DecodeReason, decode_line};
pub use encoder::encode_message;
