//! Worker side of the fleet: the claim/execute/report loop and job sandboxes.

pub mod runtime;
pub mod sandbox;

pub use runtime::WorkerRuntime;
pub use sandbox::Sandbox;
