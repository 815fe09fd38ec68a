//! Coordinator for the worker pool
//!
//! The coordinator is the controller side of the token protocol. It spawns
//! the initial workers, accepts one handshake step at a time, advances the
//! shared clock, replaces workers as they exit and decides when the run is
//! over.

mod config;
mod core;
mod report;
mod state;

pub use config::CoordinatorConfig;
pub use core::Coordinator;
pub use report::RunReport;
pub use state::{RunState, StopFlag, StopReason};
