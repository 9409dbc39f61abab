//! Connectivity signal and the background tasks around it.
//!
//! `ConnectivityProbe` pings the backend on an interval and publishes the
//! result on a `watch` channel. `ConnectivityWatcher` feeds every published
//! state into the coordinator, which replays queued writes on Offline -> Online.
//! `ConnectivityMonitor` runs both for one coordinator and stops them together.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use crate::coordinator::SyncCoordinator;
use crate::remote::RemoteStore;
use crate::types::ConnectivityState;

/// Periodic backend health check.
pub struct ConnectivityProbe {
    remote: Arc<dyn RemoteStore>,
    tx: watch::Sender<ConnectivityState>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl ConnectivityProbe {
    pub fn new(remote: Arc<dyn RemoteStore>, interval: Duration) -> Self {
        let (tx, _) = watch::channel(ConnectivityState::Online);
        Self {
            remote,
            tx,
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }

    /// Handle that stops the probe loop once notified.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Ping once and publish the result.
    pub async fn check(&self) -> ConnectivityState {
        Self::probe(self.remote.as_ref(), &self.tx).await
    }

    async fn probe(remote: &dyn RemoteStore, tx: &watch::Sender<ConnectivityState>) -> ConnectivityState {
        let state = if remote.ping().await {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        };
        // Publish every observation; the coordinator decides what counts as a transition.
        tx.send_replace(state);
        state
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(interval = ?self.interval, "connectivity probe started");

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = self.shutdown.notified() => {
                        tracing::info!("connectivity probe received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let state = Self::probe(self.remote.as_ref(), &self.tx).await;
                        tracing::debug!(state = ?state, "connectivity probed");
                    }
                }
            }

            tracing::info!("connectivity probe stopped");
        })
    }
}

/// Forwards connectivity changes to the coordinator.
pub struct ConnectivityWatcher {
    coordinator: Arc<SyncCoordinator>,
    shutdown: Arc<Notify>,
}

impl ConnectivityWatcher {
    pub fn new(coordinator: Arc<SyncCoordinator>) -> Self {
        Self {
            coordinator,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    /// Spawn the task reacting to `rx`. It ends on `stop` or when the sender is dropped.
    pub fn spawn_watch(&self, mut rx: watch::Receiver<ConnectivityState>) -> JoinHandle<()> {
        let coordinator = self.coordinator.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        tracing::info!("connectivity watcher received shutdown signal");
                        break;
                    }
                    changed = rx.changed() => {
                        if changed.is_err() {
                            tracing::debug!("connectivity source closed");
                            break;
                        }
                        let state = *rx.borrow_and_update();
                        let reports = coordinator.on_connectivity(state).await;
                        for report in reports.iter().filter(|r| !r.is_complete()) {
                            tracing::warn!(
                                resource = ?report.resource,
                                remaining = report.remaining,
                                "replay incomplete: {}",
                                report.error.as_deref().unwrap_or("writes still queued")
                            );
                        }
                    }
                }
            }
        })
    }
}

/// A running probe and watcher pair.
pub struct ConnectivityMonitor {
    probe_shutdown: Arc<Notify>,
    watcher: ConnectivityWatcher,
    probe_task: JoinHandle<()>,
    watch_task: JoinHandle<()>,
}

impl ConnectivityMonitor {
    pub fn start(coordinator: Arc<SyncCoordinator>, remote: Arc<dyn RemoteStore>, interval: Duration) -> Self {
        let probe = ConnectivityProbe::new(remote, interval);
        let probe_shutdown = probe.shutdown_handle();
        let watcher = ConnectivityWatcher::new(coordinator);
        let watch_task = watcher.spawn_watch(probe.subscribe());
        let probe_task = probe.start();
        Self {
            probe_shutdown,
            watcher,
            probe_task,
            watch_task,
        }
    }

    /// Stop both loops and wait for them to finish.
    pub async fn stop(self) {
        self.probe_shutdown.notify_one();
        self.watcher.stop();
        for (name, task) in [("probe", self.probe_task), ("watcher", self.watch_task)] {
            if let Err(err) = task.await {
                tracing::error!(task = name, "connectivity task failed: {err}");
            }
        }
    }
}
