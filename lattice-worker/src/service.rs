//! Accept loop of the worker process.
//!
//! One coordinator is served at a time. Each accepted connection runs a
//! [`Worker`] to completion; the loop ends when a coordinator stops this
//! worker or the service is stopped from outside.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use lattice_core::{Connection, LatticeError, Link, NullRenderer, Worker, WorkerExit};

use crate::settings::WorkerSettings;

// ── WorkerService ────────────────────────────────────────────────

pub struct WorkerService {
    settings: WorkerSettings,
    running: Arc<AtomicBool>,
}

impl WorkerService {
    pub fn new(settings: WorkerSettings) -> Self {
        Self {
            settings,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle that stops the service from another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bind the configured address and serve until stopped.
    pub async fn run(&self) -> Result<(), LatticeError> {
        let listener = TcpListener::bind(self.settings.listen_address()).await?;
        self.serve(listener).await
    }

    /// Serve coordinators arriving on `listener` until one sends
    /// `NodeStop` or the service is stopped.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), LatticeError> {
        self.running.store(true, Ordering::SeqCst);
        let local = listener.local_addr()?;
        info!("worker listening on {local}");

        while self.is_running() {
            let accept = tokio::select! {
                result = listener.accept() => result,
                _ = Self::wait_for_stop(&self.running) => break,
            };
            let (stream, peer) = match accept {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                warn!("{peer}: {e}");
            }
            info!("coordinator connected from {peer}");

            let Link { tx, rx } =
                Connection::new(stream, self.settings.heartbeat()).into_link();
            let renderer = NullRenderer::with_frame_cost(self.settings.frame_cost());
            let worker = Worker::new(format!("worker@{local}"), tx, Box::new(renderer));

            let outcome = tokio::select! {
                outcome = worker.run(rx) => outcome,
                _ = Self::wait_for_stop(&self.running) => break,
            };
            match outcome {
                Ok(WorkerExit::Stopped) => {
                    info!("stopped by coordinator {peer}");
                    break;
                }
                Ok(WorkerExit::Disconnected) => info!("coordinator {peer} went away"),
                Err(e) => error!("session with {peer} failed: {e}"),
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("worker service stopped");
        Ok(())
    }

    /// Resolves once `running` becomes false.
    async fn wait_for_stop(running: &Arc<AtomicBool>) {
        while running.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
