// Application layer: the transfer orchestrator and the service façade the
// CLI (or any other front end) talks to.

pub mod error;
pub mod orchestrator;
pub mod service;

pub use error::*;
pub use orchestrator::*;
pub use service::*;
