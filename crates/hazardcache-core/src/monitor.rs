//! Proximity monitoring.
//!
//! On every position update the monitor measures the distance to each cached
//! record and asks the alert gate whether a record inside the radius should
//! alert now. Position and gate share one mutex that is held for the whole
//! evaluation, so two updates never interleave their check-then-set.

use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cache::{RecordStore, StorageError};
use crate::clock::Clock;
use crate::gate::AlertGate;
use crate::geo::distance_meters;
use crate::models::{NearbyRecord, Position, ProximityAlert, Record};

/// Default alert radius in meters.
pub const DEFAULT_RADIUS_METERS: f64 = 500.0;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Invalid position: {0:?}")]
    InvalidPosition(Position),

    #[error("Monitor state poisoned by a panicked update")]
    Poisoned,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Receives proximity alerts. Delivery is fire-and-forget: the monitor does
/// not wait for acknowledgement and never retries.
pub trait AlertSink: Send + Sync {
    fn deliver(&self, alert: &ProximityAlert);
}

/// Forwards alerts into a tokio channel. Alerts are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProximityAlert>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProximityAlert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelSink {
    fn deliver(&self, alert: &ProximityAlert) {
        if self.tx.send(alert.clone()).is_err() {
            debug!(label = %alert.label, "Alert receiver closed, dropping alert");
        }
    }
}

/// Writes alerts to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn deliver(&self, alert: &ProximityAlert) {
        info!(label = %alert.label, distance_m = alert.distance_meters, "Proximity alert");
    }
}

struct MonitorState {
    position: Option<Position>,
    gate: AlertGate,
}

pub struct ProximityMonitor {
    store: Arc<RecordStore>,
    sink: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    radius_meters: f64,
    state: Mutex<MonitorState>,
}

impl ProximityMonitor {
    pub fn new(
        store: Arc<RecordStore>,
        sink: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
        radius_meters: f64,
        cooldown_millis: u64,
    ) -> Self {
        Self {
            store,
            sink,
            clock,
            radius_meters,
            state: Mutex::new(MonitorState {
                position: None,
                gate: AlertGate::new(cooldown_millis),
            }),
        }
    }

    pub fn radius_meters(&self) -> f64 {
        self.radius_meters
    }

    pub fn current_position(&self) -> Result<Option<Position>, MonitorError> {
        Ok(self.lock()?.position)
    }

    /// Record `position` as current and emit alerts for records within the radius.
    pub fn on_position_update(
        &self,
        position: Position,
    ) -> Result<Vec<ProximityAlert>, MonitorError> {
        if !position.is_valid() {
            return Err(MonitorError::InvalidPosition(position));
        }

        let mut state = self.lock()?;
        state.position = Some(position);
        self.evaluate(&mut state, position)
    }

    /// Re-check the current position after the record set changed.
    pub fn on_records_replaced(&self) -> Result<Vec<ProximityAlert>, MonitorError> {
        let mut state = self.lock()?;
        match state.position {
            Some(position) => self.evaluate(&mut state, position),
            None => {
                debug!("Records changed before any position was known");
                Ok(Vec::new())
            }
        }
    }

    /// Records sorted by distance from the current position, nearest first.
    pub fn nearby(&self, limit: usize) -> Result<Vec<NearbyRecord>, MonitorError> {
        let Some(position) = self.current_position()? else {
            return Ok(Vec::new());
        };
        let mut ranked = rank_by_distance(self.store.all()?, position);
        ranked.truncate(limit);
        Ok(ranked)
    }

    fn evaluate(
        &self,
        state: &mut MonitorState,
        position: Position,
    ) -> Result<Vec<ProximityAlert>, MonitorError> {
        let records = self.store.all()?;
        let now = self.clock.monotonic_millis();
        let mut alerts = Vec::new();

        for record in &records {
            let distance = distance_meters(position, record.position());
            if distance <= self.radius_meters && state.gate.should_alert(&record.label, now) {
                let alert = ProximityAlert {
                    label: record.label.clone(),
                    distance_meters: distance,
                };
                self.sink.deliver(&alert);
                alerts.push(alert);
            }
        }

        debug!(
            %position,
            records = records.len(),
            alerts = alerts.len(),
            "Evaluated proximity"
        );
        Ok(alerts)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MonitorState>, MonitorError> {
        self.state.lock().map_err(|_| MonitorError::Poisoned)
    }
}

/// Pair each record with its distance from `position`, nearest first.
pub fn rank_by_distance(records: Vec<Record>, position: Position) -> Vec<NearbyRecord> {
    let mut ranked: Vec<NearbyRecord> = records
        .into_iter()
        .map(|record| NearbyRecord {
            distance_meters: distance_meters(position, record.position()),
            record,
        })
        .collect();
    ranked.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));
    ranked
}

// ============================================================================
// Tests
// ============================================================================
