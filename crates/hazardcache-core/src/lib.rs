//! hazardcache core library.
//!
//! Keeps a locally persisted cache of geotagged hazard records fresh, and
//! raises deduplicated proximity alerts as a subject moves around them.
//!
//! - `cache`: durable record and metadata storage
//! - `freshness`: serve-cached / refresh decision and ingestion
//! - `geo`: haversine distance
//! - `gate`: per-label alert cooldown
//! - `monitor`: per-position-update proximity evaluation
//! - `engine`: single-writer event loop over all of the above
//! - `fetch`: HTTP and file fetch collaborators

pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod fetch;
pub mod freshness;
pub mod gate;
pub mod geo;
pub mod models;
pub mod monitor;

pub use cache::{RecordStore, StorageError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use engine::{Engine, EngineEvent, EngineHandle, EngineSettings};
pub use fetch::{FetchError, FileImporter, OpenDataClient, RecordFetcher};
pub use freshness::{
    CacheStatus, FreshnessCoordinator, FreshnessOutcome, IngestMode, IngestReport, RefreshError,
};
pub use gate::AlertGate;
pub use geo::{distance_meters, format_distance};
pub use models::{MalformedRecord, NearbyRecord, NewRecord, Position, ProximityAlert, RawRecord, Record};
pub use monitor::{AlertSink, ChannelSink, LogSink, MonitorError, ProximityMonitor};
