//! Per-run registry of stream schemas and validation of records against them.

mod node;
mod registry;
mod violation;

pub use node::{JsonType, NodeViolation, SchemaNode};
pub use registry::{SchemaRegistry, StreamSchema};
pub use violation::SchemaViolation;
