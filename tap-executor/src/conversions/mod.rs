//! Conversions between the executor's value model and its serialization formats.

pub mod json;
