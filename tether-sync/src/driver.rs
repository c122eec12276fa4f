//! Background loop that triggers reconciliation passes.
//!
//! Triggers:
//! - an offline → online transition of the connectivity signal;
//! - the periodic retry tick (retests a degraded link, otherwise retries
//!   entries whose backoff has elapsed);
//! - commands sent through [`SyncDriverHandle`].

use crate::connectivity::ConnectivityMonitor;
use crate::engine::{ReconciliationEngine, Trigger};
use crate::error::{SyncError, SyncResult};
use std::sync::Arc;
use std::time::Duration;
use tether_types::SyncReport;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

/// Commands accepted by the driver loop.
#[derive(Debug)]
pub enum DriverCommand {
    /// Runs a forced pass and replies with its report.
    ForceSync(oneshot::Sender<SyncResult<SyncReport>>),
    Stop,
}

/// Handle for sending commands to a running [`SyncDriver`].
#[derive(Clone)]
pub struct SyncDriverHandle {
    command_tx: mpsc::Sender<DriverCommand>,
}

impl SyncDriverHandle {
    pub async fn stop(&self) -> SyncResult<()> {
        self.command_tx
            .send(DriverCommand::Stop)
            .await
            .map_err(|_| SyncError::Disposed)
    }

    pub async fn force_sync(&self) -> SyncResult<SyncReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(DriverCommand::ForceSync(reply_tx))
            .await
            .map_err(|_| SyncError::Disposed)?;
        reply_rx.await.map_err(|_| SyncError::Disposed)?
    }
}

pub struct SyncDriver {
    engine: Arc<ReconciliationEngine>,
    monitor: ConnectivityMonitor,
    retry_interval: Option<Duration>,
    command_rx: mpsc::Receiver<DriverCommand>,
}

/// Creates a driver and its command handle. The caller spawns [`SyncDriver::run`].
pub fn create_sync_driver(
    engine: Arc<ReconciliationEngine>,
    monitor: ConnectivityMonitor,
    retry_interval: Option<Duration>,
) -> (SyncDriverHandle, SyncDriver) {
    let (command_tx, command_rx) = mpsc::channel(16);
    let driver = SyncDriver {
        engine,
        monitor,
        retry_interval,
        command_rx,
    };
    (SyncDriverHandle { command_tx }, driver)
}

impl SyncDriver {
    pub async fn run(mut self) {
        let mut online_rx = self.monitor.subscribe();
        let online = *online_rx.borrow_and_update();

        let mut retry = self.retry_interval.map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });

        info!("[SYNC] driver started (online: {online})");
        if online {
            self.pass(Trigger::Automatic, "startup").await;
        }

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(DriverCommand::ForceSync(reply)) => {
                            let result = self.engine.run(Trigger::Forced).await;
                            let _ = reply.send(result);
                        }
                        Some(DriverCommand::Stop) => {
                            info!("[SYNC] driver stopping");
                            break;
                        }
                        None => {
                            info!("[SYNC] command channel closed, stopping driver");
                            break;
                        }
                    }
                }

                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    // The signal only publishes transitions, so reading
                    // "online" here means the link came back, even if the
                    // offline blip in between was never observed.
                    if *online_rx.borrow_and_update() {
                        self.pass(Trigger::Automatic, "reconnect").await;
                    }
                }

                _ = async {
                    match retry.as_mut() {
                        Some(interval) => {
                            interval.tick().await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    if self.monitor.is_degraded() {
                        debug!("[SYNC] retry tick: retesting degraded link");
                        // The resulting transition triggers the pass.
                        self.monitor.report_recovered();
                    } else if self.monitor.is_online() {
                        self.pass(Trigger::Automatic, "retry").await;
                    }
                }
            }
        }

        info!("[SYNC] driver stopped");
    }

    async fn pass(&self, trigger: Trigger, reason: &str) {
        match self.engine.run(trigger).await {
            Ok(report) => debug!("[SYNC] {reason} pass: {report:?}"),
            Err(e) => error!("[SYNC] {reason} pass failed: {e}"),
        }
    }
}
