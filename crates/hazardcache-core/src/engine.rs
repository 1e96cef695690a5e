//! Single-writer event loop tying the cache and the monitor together.
//!
//! Position updates, post-ingestion re-evaluations and refresh requests all go
//! through one mailbox processed by `Engine::run`, so alert decisions are
//! serialized. Refreshes run in a spawned task that never holds a store lock
//! while the fetch is in flight, and post `RecordsReplaced` back to the mailbox
//! once the new batch is stored.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::RecordStore;
use crate::clock::Clock;
use crate::fetch::RecordFetcher;
use crate::freshness::{FreshnessCoordinator, IngestMode, IngestObserver, IngestReport};
use crate::models::Position;
use crate::monitor::{AlertSink, ProximityMonitor};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineEvent {
    Position(Position),
    RecordsReplaced,
    Refresh { force: bool },
    /// Posted when a refresh task ends, including when it panics or is aborted.
    RefreshFinished,
    Shutdown,
}

/// Runtime parameters of the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub max_cache_age_millis: i64,
    pub proximity_radius_meters: f64,
    pub alert_cooldown_millis: u64,
    pub ingest_mode: IngestMode,
    pub refresh_check_interval: Duration,
}

/// Cheap handle for feeding events into a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineHandle {
    /// Returns false once the engine has stopped.
    pub fn update_position(&self, position: Position) -> bool {
        self.tx.send(EngineEvent::Position(position)).is_ok()
    }

    pub fn request_refresh(&self, force: bool) -> bool {
        self.tx.send(EngineEvent::Refresh { force }).is_ok()
    }

    pub fn shutdown(&self) -> bool {
        self.tx.send(EngineEvent::Shutdown).is_ok()
    }
}

/// Posts `RefreshFinished` when the refresh task it lives in is dropped.
struct RefreshFinishedGuard {
    tx: mpsc::WeakUnboundedSender<EngineEvent>,
}

impl Drop for RefreshFinishedGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.upgrade() {
            let _ = tx.send(EngineEvent::RefreshFinished);
        }
    }
}

/// Posts `RecordsReplaced` after ingestion without keeping the mailbox open.
struct MailboxObserver {
    tx: mpsc::WeakUnboundedSender<EngineEvent>,
}

impl IngestObserver for MailboxObserver {
    fn records_ingested(&self, report: IngestReport) {
        if let Some(tx) = self.tx.upgrade() {
            debug!(ingested = report.ingested, "Queueing re-evaluation after ingest");
            let _ = tx.send(EngineEvent::RecordsReplaced);
        }
    }
}

pub struct Engine {
    monitor: Arc<ProximityMonitor>,
    coordinator: Arc<FreshnessCoordinator>,
    settings: EngineSettings,
    rx: mpsc::UnboundedReceiver<EngineEvent>,
    tx: mpsc::WeakUnboundedSender<EngineEvent>,
    refresh_task: Option<JoinHandle<()>>,
    pending_force: bool,
}

impl Engine {
    pub fn new(
        settings: EngineSettings,
        store: Arc<RecordStore>,
        fetcher: Arc<dyn RecordFetcher>,
        sink: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
    ) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();

        let observer = Arc::new(MailboxObserver { tx: tx.downgrade() });
        let coordinator = FreshnessCoordinator::new(Arc::clone(&store), fetcher, Arc::clone(&clock))
            .with_mode(settings.ingest_mode)
            .with_observer(observer);
        let monitor = ProximityMonitor::new(
            store,
            sink,
            clock,
            settings.proximity_radius_meters,
            settings.alert_cooldown_millis,
        );

        let engine = Self {
            monitor: Arc::new(monitor),
            coordinator: Arc::new(coordinator),
            settings,
            rx,
            tx: tx.downgrade(),
            refresh_task: None,
            pending_force: false,
        };
        (engine, EngineHandle { tx })
    }

    pub fn monitor(&self) -> &Arc<ProximityMonitor> {
        &self.monitor
    }

    pub fn coordinator(&self) -> &Arc<FreshnessCoordinator> {
        &self.coordinator
    }

    /// Process events until `Shutdown` arrives or every handle is dropped.
    ///
    /// A freshness check runs immediately and then every
    /// `refresh_check_interval`.
    pub async fn run(mut self) {
        info!(
            radius_m = self.settings.proximity_radius_meters,
            cooldown_ms = self.settings.alert_cooldown_millis,
            max_age_ms = self.settings.max_cache_age_millis,
            "Engine started"
        );
        let mut ticker = tokio::time::interval(self.settings.refresh_check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.spawn_refresh(false),
                event = self.rx.recv() => match event {
                    Some(EngineEvent::Position(position)) => {
                        if let Err(e) = self.monitor.on_position_update(position) {
                            warn!(error = %e, "Position update rejected");
                        }
                    }
                    Some(EngineEvent::RecordsReplaced) => {
                        if let Err(e) = self.monitor.on_records_replaced() {
                            error!(error = %e, "Re-evaluation after ingest failed");
                        }
                    }
                    Some(EngineEvent::Refresh { force }) => self.spawn_refresh(force),
                    Some(EngineEvent::RefreshFinished) => {
                        self.refresh_task = None;
                        if std::mem::take(&mut self.pending_force) {
                            debug!("Starting queued forced refresh");
                            self.spawn_refresh(true);
                        }
                    }
                    Some(EngineEvent::Shutdown) | None => break,
                },
            }
        }

        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
        info!("Engine stopped");
    }

    /// Start a refresh task unless one is in flight.
    ///
    /// A forced request that arrives while a task runs is queued and started
    /// once that task reports `RefreshFinished`.
    fn spawn_refresh(&mut self, force: bool) {
        if self.refresh_task.is_some() {
            if force {
                debug!("Refresh in flight, queueing forced refresh");
                self.pending_force = true;
            } else {
                debug!("Refresh already in flight");
            }
            return;
        }

        let coordinator = Arc::clone(&self.coordinator);
        let max_age = self.settings.max_cache_age_millis;
        let guard = RefreshFinishedGuard {
            tx: self.tx.clone(),
        };
        self.refresh_task = Some(tokio::spawn(async move {
            let _guard = guard;
            let result = if force {
                coordinator.force_refresh().await
            } else {
                coordinator.ensure_fresh(max_age).await
            };
            match result {
                Ok(outcome) if outcome.was_refreshed() => {
                    info!(records = outcome.records().len(), "Cache refreshed");
                }
                Ok(outcome) => {
                    debug!(records = outcome.records().len(), "Serving cached records");
                }
                Err(e) => warn!(error = %e, "Refresh failed, serving last-known-good cache"),
            }
        }));
    }
}
