//! Ownership and lifecycle of the single worker process.
//!
//! The supervisor is the only component that spawns, signals or reaps the
//! worker. Every state change goes through [`WorkerState::can_transition_to`]
//! and is published both on a `watch` channel and as a
//! [`SupervisorEvent::StateChanged`] notification.
//!
//! Each launch gets a new generation number. Observers (exit monitor, kill
//! timer, an in-flight `start()`) carry the generation they were created for
//! and re-check it after every await, so a stale observer never touches a
//! newer worker.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use client_core::{ControlClient, ControlError};
use shared::{domain::WorkerState, protocol::ControlAck};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, error, info, warn};

mod command;

pub use command::WorkerCommand;

pub const DEFAULT_ACTIVATION_GRACE: Duration = Duration::from_millis(3000);
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Wait between launching the worker and calling `/start`. This only
    /// tolerates the worker's boot time; it does not prove readiness.
    pub activation_grace: Duration,
    /// Wait between requesting a graceful stop and killing the worker.
    pub kill_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            activation_grace: DEFAULT_ACTIVATION_GRACE,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    StateChanged(WorkerState),
    /// One line of the worker's diagnostic stream.
    Log(String),
    Exited { code: Option<i32>, forced: bool },
    Failure(String),
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to launch worker `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("worker activation failed: {0}")]
    Activation(#[from] ControlError),
    #[error("start interrupted; worker is now {0}")]
    Interrupted(WorkerState),
    #[error("worker is {0}; wait for it to settle before starting")]
    Busy(WorkerState),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Activated(ControlAck),
    AlreadyActive(WorkerState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopping,
    AlreadyStopped(WorkerState),
}

struct WorkerHandle {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
}

struct SupervisorInner {
    state: WorkerState,
    generation: u64,
    worker: Option<WorkerHandle>,
}

pub struct ProcessSupervisor {
    config: SupervisorConfig,
    command: WorkerCommand,
    control: Arc<dyn ControlClient>,
    inner: Mutex<SupervisorInner>,
    state_tx: watch::Sender<WorkerState>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
}

impl ProcessSupervisor {
    pub fn new(
        config: SupervisorConfig,
        command: WorkerCommand,
        control: Arc<dyn ControlClient>,
        events: mpsc::UnboundedSender<SupervisorEvent>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(WorkerState::Stopped);
        Arc::new(Self {
            config,
            command,
            control,
            inner: Mutex::new(SupervisorInner {
                state: WorkerState::Stopped,
                generation: 0,
                worker: None,
            }),
            state_tx,
            events,
        })
    }

    pub fn state(&self) -> WorkerState {
        *self.state_tx.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<WorkerState> {
        self.state_tx.subscribe()
    }

    pub async fn worker_pid(&self) -> Option<u32> {
        self.inner
            .lock()
            .await
            .worker
            .as_ref()
            .and_then(|worker| worker.pid)
    }

    pub async fn has_worker(&self) -> bool {
        self.inner.lock().await.worker.is_some()
    }

    /// Launches the worker (unless a failed one is still alive), waits the
    /// activation grace, then asks the worker to start processing.
    ///
    /// A no-op while `Starting` or `Running`. An activation failure leaves
    /// the worker alive in `Failed` for diagnostics.
    pub async fn start(self: &Arc<Self>) -> Result<StartOutcome, SupervisorError> {
        let (generation, mut state_rx, launched) = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                state if state.is_active() => return Ok(StartOutcome::AlreadyActive(state)),
                WorkerState::Stopping => {
                    return Err(SupervisorError::Busy(WorkerState::Stopping))
                }
                _ => {}
            }

            let reuse = inner.state == WorkerState::Failed && inner.worker.is_some();
            self.transition(&mut inner, WorkerState::Starting);
            if reuse {
                info!(
                    generation = inner.generation,
                    "supervisor: retrying activation against the running worker"
                );
            } else {
                inner.generation += 1;
                match self.launch(inner.generation) {
                    Ok(handle) => {
                        info!(
                            generation = inner.generation,
                            pid = ?handle.pid,
                            command = %self.command,
                            "supervisor: worker launched"
                        );
                        inner.worker = Some(handle);
                    }
                    Err(source) => {
                        let program = self.command.program.display().to_string();
                        error!("supervisor: failed to launch worker `{program}`: {source}");
                        self.transition(&mut inner, WorkerState::Failed);
                        self.notify(SupervisorEvent::Failure(format!(
                            "Failed to start the worker `{program}`. Make sure it is installed and its dependencies are met. {source}"
                        )));
                        return Err(SupervisorError::Spawn { program, source });
                    }
                }
            }
            (inner.generation, self.state_tx.subscribe(), !reuse)
        };

        if launched {
            self.wait_activation_grace(&mut state_rx).await;
        }
        self.ensure_still_starting(generation).await?;

        let result = self.control.start().await;

        let mut inner = self.inner.lock().await;
        if inner.generation != generation || inner.state != WorkerState::Starting {
            return Err(SupervisorError::Interrupted(inner.state));
        }
        match result {
            Ok(ack) => {
                info!(status = %ack.status, generation, "supervisor: worker activated");
                self.transition(&mut inner, WorkerState::Running);
                Ok(StartOutcome::Activated(ack))
            }
            Err(err) => {
                warn!(generation, "supervisor: activation failed, leaving worker alive: {err}");
                self.transition(&mut inner, WorkerState::Failed);
                self.notify(SupervisorEvent::Failure(format!(
                    "worker activation failed: {err}"
                )));
                Err(SupervisorError::Activation(err))
            }
        }
    }

    /// Requests a graceful stop and arms the kill timer. A no-op when there
    /// is nothing to stop.
    pub async fn stop(self: &Arc<Self>) -> StopOutcome {
        let generation = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                WorkerState::Stopped | WorkerState::Stopping => {
                    return StopOutcome::AlreadyStopped(inner.state)
                }
                WorkerState::Failed if inner.worker.is_none() => {
                    return StopOutcome::AlreadyStopped(WorkerState::Failed)
                }
                _ => {}
            }
            self.transition(&mut inner, WorkerState::Stopping);
            if inner.worker.is_none() {
                self.transition(&mut inner, WorkerState::Stopped);
                return StopOutcome::Stopping;
            }
            inner.generation
        };

        let control = Arc::clone(&self.control);
        tokio::spawn(async move {
            match control.stop().await {
                Ok(ack) => info!(status = %ack.status, "supervisor: worker acknowledged stop"),
                Err(err) => warn!("supervisor: graceful stop request failed: {err}"),
            }
        });

        let supervisor = Arc::downgrade(self);
        let kill_grace = self.config.kill_grace;
        tokio::spawn(async move {
            tokio::time::sleep(kill_grace).await;
            if let Some(supervisor) = supervisor.upgrade() {
                supervisor.kill_if_stopping(generation).await;
            }
        });

        StopOutcome::Stopping
    }

    /// Terminates the worker immediately, e.g. when the host is quitting.
    pub async fn kill_now(&self) {
        let mut inner = self.inner.lock().await;
        if inner.worker.is_none() {
            return;
        }
        if inner.state != WorkerState::Stopping {
            self.transition(&mut inner, WorkerState::Stopping);
        }
        Self::signal_kill(&mut inner, "host shutdown");
    }

    fn launch(self: &Arc<Self>, generation: u64) -> std::io::Result<WorkerHandle> {
        let mut child = self.command.to_command().spawn()?;
        let pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(command::trace_stdout(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(command::forward_stderr(stderr, self.events.clone()));
        }

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let supervisor: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            // a dropped sender means the supervisor is gone; treat it as a kill
            let waited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_rx => None,
            };
            let (status, forced) = match waited {
                Some(status) => (status, false),
                None => {
                    if let Err(err) = child.start_kill() {
                        warn!(generation, "supervisor: kill signal failed: {err}");
                    }
                    (child.wait().await, true)
                }
            };
            let code = match status {
                Ok(status) => status.code(),
                Err(err) => {
                    warn!(generation, "supervisor: failed to reap worker: {err}");
                    None
                }
            };
            if let Some(supervisor) = supervisor.upgrade() {
                supervisor.on_worker_exit(generation, code, forced).await;
            }
        });

        Ok(WorkerHandle {
            pid,
            kill_tx: Some(kill_tx),
        })
    }

    async fn wait_activation_grace(&self, state_rx: &mut watch::Receiver<WorkerState>) {
        let grace = tokio::time::sleep(self.config.activation_grace);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                _ = &mut grace => return,
                changed = state_rx.changed() => {
                    if changed.is_err() || *state_rx.borrow_and_update() != WorkerState::Starting {
                        return;
                    }
                }
            }
        }
    }

    async fn ensure_still_starting(&self, generation: u64) -> Result<(), SupervisorError> {
        let inner = self.inner.lock().await;
        if inner.generation != generation || inner.state != WorkerState::Starting {
            debug!(
                generation,
                state = %inner.state,
                "supervisor: start superseded during grace period"
            );
            return Err(SupervisorError::Interrupted(inner.state));
        }
        Ok(())
    }

    async fn kill_if_stopping(&self, generation: u64) {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation || inner.state != WorkerState::Stopping {
            return;
        }
        Self::signal_kill(&mut inner, "kill grace elapsed");
    }

    fn signal_kill(inner: &mut SupervisorInner, reason: &str) {
        let Some(worker) = inner.worker.as_mut() else {
            return;
        };
        if let Some(kill_tx) = worker.kill_tx.take() {
            warn!(pid = ?worker.pid, "supervisor: forcibly terminating worker: {reason}");
            let _ = kill_tx.send(());
        }
    }

    async fn on_worker_exit(&self, generation: u64, code: Option<i32>, forced: bool) {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            debug!(generation, "supervisor: ignoring exit of a superseded worker");
            return;
        }
        inner.worker = None;
        info!(generation, ?code, forced, state = %inner.state, "supervisor: worker exited");
        self.notify(SupervisorEvent::Exited { code, forced });

        match inner.state {
            WorkerState::Stopping | WorkerState::Running => {
                self.transition(&mut inner, WorkerState::Stopped);
            }
            WorkerState::Starting => {
                self.transition(&mut inner, WorkerState::Failed);
                self.notify(SupervisorEvent::Failure(format!(
                    "worker exited before activation (exit code {})",
                    code.map_or_else(|| "unknown".to_string(), |code| code.to_string())
                )));
            }
            WorkerState::Failed | WorkerState::Stopped => {}
        }
    }

    fn transition(&self, inner: &mut SupervisorInner, next: WorkerState) -> bool {
        let current = inner.state;
        if current == next {
            return true;
        }
        if !current.can_transition_to(next) {
            error!(from = %current, to = %next, "supervisor: refusing invalid transition");
            return false;
        }
        inner.state = next;
        self.state_tx.send_replace(next);
        info!(
            from = %current,
            to = %next,
            generation = inner.generation,
            "supervisor: state changed"
        );
        self.notify(SupervisorEvent::StateChanged(next));
        true
    }

    fn notify(&self, event: SupervisorEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
