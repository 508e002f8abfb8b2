// Background worker lifecycle: at most one monitor loop per handle

use crate::monitor::engine::{MonitorEngine, MonitorStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    NotRunning,
    /// The loop did not exit within the shutdown timeout. It has been told to
    /// stop and will exit at its next tenant or feed boundary.
    TimedOut,
}

struct Worker {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl Worker {
    fn is_alive(&self) -> bool {
        !self.join.is_finished()
    }
}

/// Owns the background monitor task
pub struct MonitorHandle {
    engine: Arc<MonitorEngine>,
    worker: Mutex<Option<Worker>>,
}

impl MonitorHandle {
    pub fn new(engine: Arc<MonitorEngine>) -> Self {
        Self {
            engine,
            worker: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<MonitorEngine> {
        &self.engine
    }

    /// Spawn the monitor loop unless one is already alive
    pub async fn start(&self) -> StartOutcome {
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(Worker::is_alive) {
            info!("Monitor already running");
            return StartOutcome::AlreadyRunning;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = Arc::clone(&self.engine);
        let join = tokio::spawn(engine.run(shutdown_rx));

        *worker = Some(Worker { shutdown_tx, join });
        info!("Monitor started");
        StartOutcome::Started
    }

    /// Signal the loop and wait a bounded time for it to exit. The worker
    /// slot is not locked during the wait.
    pub async fn stop(&self) -> StopOutcome {
        let Some(mut worker) = self.worker.lock().await.take() else {
            return StopOutcome::NotRunning;
        };
        if !worker.is_alive() {
            return StopOutcome::NotRunning;
        }

        // Receivers live inside the task, so a send only fails once it exited
        let _ = worker.shutdown_tx.send(true);

        let limit = Duration::from_secs(self.engine.config().shutdown_timeout_seconds);
        match tokio::time::timeout(limit, &mut worker.join).await {
            Ok(Ok(())) => {
                info!("Monitor stopped");
                StopOutcome::Stopped
            }
            Ok(Err(e)) => {
                error!(error = %e, "Monitor task ended abnormally");
                StopOutcome::Stopped
            }
            Err(_) => {
                warn!(
                    timeout_seconds = limit.as_secs(),
                    "Monitor did not stop in time, leaving it to finish its current check"
                );
                let mut slot = self.worker.lock().await;
                if slot.as_ref().is_some_and(Worker::is_alive) {
                    // Started again meanwhile; the old loop exits on its own
                    debug!("Monitor restarted while stopping");
                } else {
                    *slot = Some(worker);
                }
                StopOutcome::TimedOut
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(Worker::is_alive)
    }

    pub async fn status(&self) -> MonitorStatus {
        let running = self.is_running().await;
        self.engine.status(running).await
    }
}
