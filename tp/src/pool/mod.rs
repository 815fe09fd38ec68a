//! Worker pool
//!
//! [`ProcessPool`] decides whether another worker may start; a [`Launcher`]
//! decides how. Workers are child processes in normal runs and tokio tasks
//! under `--simulate`.

pub mod error;
pub mod launcher;
pub mod manager;
pub mod process;
pub mod task;

pub use error::PoolError;
pub use launcher::Launcher;
pub use manager::{Admission, HARD_CAP, ProcessPool};
pub use process::ProcessLauncher;
pub use task::TaskLauncher;
