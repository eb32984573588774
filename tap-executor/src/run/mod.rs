mod batch;
pub mod coordinator;
pub mod manager;
mod request;

pub use batch::RecordBatcher;
pub use coordinator::RunCoordinator;
pub use manager::{RunHandle, RunManager};
pub use request::{ResumePolicy, RunRequest};
