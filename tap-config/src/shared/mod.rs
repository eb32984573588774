mod base;
mod batch;
mod connection;
mod retry;
mod run;
mod runner;
mod sentry;
mod sink;
mod state_store;
mod tap;

pub use base::*;
pub use batch::*;
pub use connection::*;
pub use retry::*;
pub use run::*;
pub use runner::*;
pub use sentry::*;
pub use sink::*;
pub use state_store::*;
pub use tap::*;
