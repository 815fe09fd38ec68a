//! tokenpool - bounded worker pool driven by a token-passing shared clock
//!
//! A single controller spawns workers, lets exactly one of them hold the
//! token at a time, advances a simulated clock on every accepted message
//! and replaces workers as they exit, until an exit-count or time bound
//! ends the run.
//!
//! # Modules
//!
//! - [`clock`] - shared simulated clock, in memory or in POSIX shared memory
//! - [`protocol`] - LOCK/UNLOCK handshake, message bus and socket transport
//! - [`pool`] - admission control and worker launchers
//! - [`worker`] - the reference worker loop
//! - [`coordinator`] - the controller's main loop
//! - [`session`] - wiring a configured run together
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod id;
pub mod logging;
pub mod pool;
pub mod protocol;
pub mod session;
pub mod worker;

// Re-export commonly used types
pub use clock::{SharedClock, SimTime};
pub use config::Config;
pub use coordinator::{Coordinator, CoordinatorConfig, RunReport, RunState, StopReason};
pub use id::WorkerId;
pub use pool::{Launcher, PoolError, ProcessPool};
pub use protocol::{ControllerChannel, MessageBus, ProtocolError, WorkerChannel};
pub use worker::{Worker, WorkerProfile};
