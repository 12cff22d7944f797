//! Run orchestration.
//!
//! The controller owns how a module is launched (foreground or background) and
//! the registry tracks background runs so they can be listed and stopped by
//! prompt. Console layers call into this module and never touch cancellation
//! tokens directly.

mod controller;
mod registry;

pub use controller::{LaunchOutcome, RunController, RunEvent};
pub use registry::StopOutcome;
