//! # WAL Worker
//!
//! Single writer task for async hosts. Callers submit events over a bounded
//! channel; the task owns the [`LiveLogger`], the state machine and the
//! effect sink, so appends never interleave. A ticker drives group-commit
//! windows while the queue is idle.
//!
//! Log I/O runs inline on the task. Hosts that cannot afford blocking a
//! runtime thread on fsync should spawn it on a dedicated runtime.

use crate::domain::entities::Event;
use crate::domain::errors::{WalError, WalResult};
use crate::ports::outbound::{AppendLog, ConsensusStateMachine, EffectSink, TimeSource};
use crate::service::live::LiveLogger;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Commands buffered before `submit` waits.
    pub queue_depth: usize,
    /// How often the group-commit window is checked.
    pub tick_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_depth: 1024,
            tick_interval: Duration::from_millis(5),
        }
    }
}

enum WalCommand {
    Submit {
        event: Event,
        reply: oneshot::Sender<WalResult<u64>>,
    },
    Flush {
        reply: oneshot::Sender<WalResult<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<WalResult<()>>,
    },
}

/// Cloneable handle to a running worker.
#[derive(Clone)]
pub struct WalWorkerHandle {
    tx: mpsc::Sender<WalCommand>,
}

impl WalWorkerHandle {
    /// Record `event`, feed it to the state machine and emit its effects.
    /// Returns the entry's offset.
    pub async fn submit(&self, event: Event) -> WalResult<u64> {
        let (reply, rx) = oneshot::channel();
        self.send(WalCommand::Submit { event, reply }).await?;
        rx.await.map_err(|_| WalError::WorkerStopped)?
    }

    pub async fn flush(&self) -> WalResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(WalCommand::Flush { reply }).await?;
        rx.await.map_err(|_| WalError::WorkerStopped)?
    }

    /// Flush and stop the worker.
    pub async fn shutdown(&self) -> WalResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(WalCommand::Shutdown { reply }).await?;
        rx.await.map_err(|_| WalError::WorkerStopped)?
    }

    pub fn is_stopped(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, command: WalCommand) -> WalResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| WalError::WorkerStopped)
    }
}

/// What the worker hands back when it stops.
pub struct WorkerParts<L: AppendLog, T: TimeSource, M, S> {
    pub logger: LiveLogger<L, T>,
    pub machine: M,
    pub sink: S,
}

/// Spawn the writer task on the current tokio runtime.
///
/// The task stops on shutdown, when every handle is dropped, or after the
/// first failed operation. A failed submit or flush receives the error;
/// later calls get [`WalError::WorkerStopped`].
pub fn spawn_wal_worker<L, T, M, S>(
    logger: LiveLogger<L, T>,
    machine: M,
    sink: S,
    config: WorkerConfig,
) -> (WalWorkerHandle, JoinHandle<WorkerParts<L, T, M, S>>)
where
    L: AppendLog + Send + 'static,
    T: TimeSource + 'static,
    M: ConsensusStateMachine + Send + 'static,
    S: EffectSink + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
    let parts = WorkerParts {
        logger,
        machine,
        sink,
    };
    let task = tokio::spawn(run_worker(parts, rx, config.tick_interval));
    (WalWorkerHandle { tx }, task)
}

async fn run_worker<L, T, M, S>(
    mut parts: WorkerParts<L, T, M, S>,
    mut rx: mpsc::Receiver<WalCommand>,
    tick_interval: Duration,
) -> WorkerParts<L, T, M, S>
where
    L: AppendLog,
    T: TimeSource,
    M: ConsensusStateMachine,
    S: EffectSink,
{
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("[qc-18] WAL worker started");

    loop {
        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else {
                    debug!("[qc-18] All WAL worker handles dropped");
                    if let Err(e) = parts.logger.flush() {
                        error!("[qc-18] Final WAL flush failed: {}", e);
                    }
                    break;
                };
                if !handle_command(&mut parts, command) {
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = parts.logger.tick() {
                    error!("[qc-18] Group commit flush failed, stopping WAL worker: {}", e);
                    break;
                }
            }
        }
    }

    rx.close();
    info!("[qc-18] WAL worker stopped");
    parts
}

/// Returns false when the worker must stop.
fn handle_command<L, T, M, S>(parts: &mut WorkerParts<L, T, M, S>, command: WalCommand) -> bool
where
    L: AppendLog,
    T: TimeSource,
    M: ConsensusStateMachine,
    S: EffectSink,
{
    match command {
        WalCommand::Submit { event, reply } => {
            let result = parts
                .logger
                .dispatch(event, &mut parts.machine, &mut parts.sink);
            let ok = result.is_ok();
            if let Err(e) = &result {
                error!("[qc-18] WAL dispatch failed, stopping worker: {}", e);
            }
            let _ = reply.send(result);
            ok
        }
        WalCommand::Flush { reply } => {
            let result = parts.logger.flush();
            let ok = result.is_ok();
            let _ = reply.send(result);
            ok
        }
        WalCommand::Shutdown { reply } => {
            let _ = reply.send(parts.logger.flush());
            false
        }
    }
}
