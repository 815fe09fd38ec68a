//! tp-user - worker process started by `tp`
//!
//! Reads its connection details from the environment, attaches to the
//! controller's clock and socket, and runs the worker loop once.

use std::sync::Arc;

use eyre::{Context, Result};
use tracing::{debug, info, warn};

use tokenpool::clock::SharedClock;
use tokenpool::id::WorkerId;
use tokenpool::logging;
use tokenpool::protocol::SocketLink;
use tokenpool::worker::{Worker, WorkerEnv};

#[tokio::main]
async fn main() -> Result<()> {
    let env = WorkerEnv::from_env()?;
    logging::init(&env.log_file, Some(&env.log_level), true).context("Failed to setup logging")?;

    let id = WorkerId::current_process();
    debug!(%id, ?env, "tp-user: starting");

    let clock = SharedClock::open(&env.clock).context(format!("Failed to open shared clock {}", env.clock))?;
    let link = SocketLink::connect(&env.socket)
        .await
        .context(format!("Failed to connect to {}", env.socket.display()))?;

    match Worker::new(id, Arc::new(link), clock, env.profile).run().await {
        Ok(summary) => {
            info!(
                %id,
                cycles = summary.cycles,
                started_at = %summary.started_at,
                exited_at = %summary.exited_at,
                "Worker exiting"
            );
            Ok(())
        }
        // The controller tore the run down first
        Err(e) if e.is_closed() => {
            warn!(%id, "Controller closed the channel");
            Ok(())
        }
        Err(e) => Err(e).context("Worker failed"),
    }
}
