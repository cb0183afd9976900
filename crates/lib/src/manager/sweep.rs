//! Eager expiry of idle and time-to-live limited sessions.
//!
//! Lookups already expire sessions lazily. The sweep closes sessions that
//! nobody looks up again, so the provider and the cache do not accumulate
//! abandoned logins.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::{
    sync::{mpsc, oneshot},
    time::interval,
};
use tracing::{Instrument, debug, error, info, info_span};

use super::SessionManager;
use crate::Result;
use crate::session::Expiry;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Cached sessions inspected.
    pub examined: usize,
    /// Sessions expired by this pass, with the limit each one hit.
    pub expired: Vec<(String, Expiry)>,
    /// Sessions whose close failed in the provider.
    pub failures: usize,
}

impl SessionManager {
    /// Expire every cached session past its idle or time-to-live limit.
    ///
    /// A session that fails to close in the provider is still evicted and
    /// counted in [`SweepReport::failures`].
    pub async fn sweep(&self) -> SweepReport {
        let now = self.clock.now_millis();
        let mut due = Vec::new();
        let mut examined = 0;
        self.cache.each(|context| {
            examined += 1;
            if context.count().is_closing() {
                return;
            }
            let last_access = self.cache.timestamp(context.uuid()).millis();
            if let Some(reason) = context.record().expiry(now, last_access) {
                due.push((context.uuid().to_string(), reason));
            }
        });

        let mut report = SweepReport {
            examined,
            ..SweepReport::default()
        };
        for (uuid, reason) in due {
            match self.expire(&uuid, reason).await {
                Ok(()) => report.expired.push((uuid, reason)),
                Err(e) => {
                    error!(uuid = %uuid, error = %e, "Failed to expire session");
                    report.failures += 1;
                }
            }
        }

        if !report.expired.is_empty() || report.failures > 0 {
            info!(
                examined = report.examined,
                expired = report.expired.len(),
                failures = report.failures,
                "Session sweep finished"
            );
        }
        report
    }
}

/// Commands accepted by a running [`Sweeper`].
#[derive(Debug)]
pub enum SweepCommand {
    /// Run a pass immediately and report it
    SweepNow {
        response: oneshot::Sender<SweepReport>,
    },
    /// Stop the sweeper
    Shutdown,
}

/// Background task that calls [`SessionManager::sweep`] periodically.
///
/// The task holds only a weak reference to the manager and stops once the
/// manager is dropped, when the handle is dropped or on [`SweeperHandle::shutdown`].
pub struct Sweeper {
    manager: Weak<SessionManager>,
    period: Duration,
    command_rx: mpsc::Receiver<SweepCommand>,
}

impl Sweeper {
    /// Start sweeping `manager` every `sweep_interval_ms`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(manager: &Arc<SessionManager>) -> SweeperHandle {
        let (tx, rx) = mpsc::channel(16);
        // interval() panics on a zero period.
        let period = Duration::from_millis(manager.settings().sweep_interval_ms.max(1));

        let sweeper = Self {
            manager: Arc::downgrade(manager),
            period,
            command_rx: rx,
        };
        let task = tokio::spawn(sweeper.run());
        SweeperHandle { commands: tx, task }
    }

    async fn run(mut self) {
        async move {
            info!(period_ms = self.period.as_millis() as u64, "Starting session sweeper");
            let mut ticker = interval(self.period);
            // Skip initial tick to avoid immediate execution
            ticker.tick().await;

            loop {
                tokio::select! {
                    command = self.command_rx.recv() => match command {
                        Some(SweepCommand::SweepNow { response }) => {
                            let Some(manager) = self.manager.upgrade() else { break };
                            let report = manager.sweep().await;
                            // The requester may have given up waiting.
                            let _ = response.send(report);
                        }
                        Some(SweepCommand::Shutdown) | None => break,
                    },

                    _ = ticker.tick() => {
                        let Some(manager) = self.manager.upgrade() else { break };
                        let report = manager.sweep().await;
                        debug!(examined = report.examined, "Periodic sweep");
                    }
                }
            }
            info!("Session sweeper shutting down");
        }
        .instrument(info_span!("session_sweeper"))
        .await
    }
}

/// Control handle for a running [`Sweeper`].
#[derive(Debug)]
pub struct SweeperHandle {
    commands: mpsc::Sender<SweepCommand>,
    task: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    /// Run a sweep now and wait for its report.
    pub async fn sweep_now(&self) -> Result<SweepReport> {
        let (response, rx) = oneshot::channel();
        self.commands
            .send(SweepCommand::SweepNow { response })
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    /// Stop the sweeper and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(SweepCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            error!(error = %e, "Session sweeper task failed");
        }
    }

    /// Whether the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

fn stopped() -> crate::Error {
    super::SessionError::Internal {
        operation: "sweep",
    }
    .into()
}
