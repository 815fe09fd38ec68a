//! Launcher seam between the pool and the way workers actually run

use async_trait::async_trait;

use crate::id::WorkerId;

use super::error::PoolError;

/// Starts, reaps and stops worker units
///
/// The pool owns admission policy; a launcher only knows how to bring one
/// worker up and take it down again.
#[async_trait]
pub trait Launcher: Send {
    /// Short label for logs
    fn label(&self) -> &'static str;

    /// Start one worker and return its id
    async fn launch(&mut self) -> Result<WorkerId, PoolError>;

    /// Wait for a worker that announced its exit to finish
    async fn wait(&mut self, id: WorkerId) -> Result<(), PoolError>;

    /// Stop a worker that is still running
    async fn terminate(&mut self, id: WorkerId) -> Result<(), PoolError>;

    /// Wait until some worker finishes on its own, without reaping it
    ///
    /// Must be safe to drop at any await point; a finished worker keeps
    /// being reported until it is reaped with [`Launcher::wait`].
    async fn next_exit(&mut self) -> Result<WorkerId, PoolError>;
}
