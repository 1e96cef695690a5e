//! Freshness policy for the record cache.
//!
//! The cache is **Fresh** while `now - last_fetch_time < max_age` and is served
//! as is. Otherwise it is **Stale** and the fetch collaborator is called once.
//! A failed fetch leaves the cache untouched; the stale records stay the
//! last-known-good data.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{RecordStore, StorageError};
use crate::clock::Clock;
use crate::fetch::{FetchError, RecordFetcher};
use crate::models::{RawRecord, Record};

/// Epoch milliseconds of the last successful refresh, as decimal text.
pub const LAST_FETCH_TIME: &str = "last_fetch_time";

/// Number of records ingested by the last successful refresh.
pub const LAST_FETCH_COUNT: &str = "last_fetch_count";

/// Where the last successful refresh came from.
pub const SOURCE: &str = "source";

/// Consider the cache stale after one day.
pub const DEFAULT_MAX_AGE_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// How far in the future `last_fetch_time` may lie and still count as fresh.
pub const CLOCK_SKEW_TOLERANCE_MILLIS: i64 = 5 * 60 * 1000;

/// How a fetched batch lands in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    /// Append every batch (duplicates accumulate).
    #[default]
    Append,
    /// Replace the whole cache with each batch.
    Replace,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub ingested: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FreshnessOutcome {
    Fresh { records: Vec<Record> },
    Refreshed { records: Vec<Record>, report: IngestReport },
}

impl FreshnessOutcome {
    pub fn records(&self) -> &[Record] {
        match self {
            FreshnessOutcome::Fresh { records } => records,
            FreshnessOutcome::Refreshed { records, .. } => records,
        }
    }

    pub fn was_refreshed(&self) -> bool {
        matches!(self, FreshnessOutcome::Refreshed { .. })
    }
}

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("Refresh failed: {0}")]
    RefreshFailed(#[from] FetchError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Notified after a batch has been written to the store.
pub trait IngestObserver: Send + Sync {
    fn records_ingested(&self, report: IngestReport);
}

/// Snapshot of the cache state for display.
#[derive(Debug, Clone)]
pub struct CacheStatus {
    pub record_count: usize,
    pub last_fetch: Option<DateTime<Utc>>,
    pub age_display: String,
    pub source: Option<String>,
    pub is_stale: bool,
}

pub struct FreshnessCoordinator {
    store: Arc<RecordStore>,
    fetcher: Arc<dyn RecordFetcher>,
    clock: Arc<dyn Clock>,
    mode: IngestMode,
    observer: Option<Arc<dyn IngestObserver>>,
}

impl FreshnessCoordinator {
    pub fn new(
        store: Arc<RecordStore>,
        fetcher: Arc<dyn RecordFetcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            fetcher,
            clock,
            mode: IngestMode::default(),
            observer: None,
        }
    }

    pub fn with_mode(mut self, mode: IngestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn IngestObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Serve the cache if younger than `max_age_millis`, otherwise refresh it.
    ///
    /// A `last_fetch_time` more than `CLOCK_SKEW_TOLERANCE_MILLIS` in the
    /// future counts as stale, so a stamp written while the wall clock ran
    /// ahead does not pin the cache fresh after the clock is corrected.
    pub async fn ensure_fresh(&self, max_age_millis: i64) -> Result<FreshnessOutcome, RefreshError> {
        match self.cache_age_millis()? {
            Some(age) if within_max_age(age, max_age_millis) => {
                debug!(age_ms = age, max_age_ms = max_age_millis, "Cache is fresh");
                Ok(FreshnessOutcome::Fresh {
                    records: self.store.all()?,
                })
            }
            age => {
                info!(
                    age_ms = ?age,
                    max_age_ms = max_age_millis,
                    "Cache is stale, refreshing"
                );
                self.refresh().await
            }
        }
    }

    /// Refresh regardless of age (user-triggered).
    pub async fn force_refresh(&self) -> Result<FreshnessOutcome, RefreshError> {
        info!("Forced refresh requested");
        self.refresh().await
    }

    /// Ingest a record set from another collaborator, such as a file import.
    ///
    /// Does not touch `last_fetch_time`: only the primary source decides freshness.
    pub async fn import(
        &self,
        importer: &dyn RecordFetcher,
    ) -> Result<IngestReport, RefreshError> {
        let raw = importer.fetch_records().await?;
        let source = importer.describe();
        let (_, report) = self.ingest(raw, &source)?;
        Ok(report)
    }

    /// Validate `raw` and write the valid entries to the store.
    ///
    /// Malformed entries are skipped with a warning. A non-empty batch in which
    /// every entry is malformed is rejected as malformed data.
    pub fn ingest(
        &self,
        raw: Vec<RawRecord>,
        source: &str,
    ) -> Result<(Vec<Record>, IngestReport), RefreshError> {
        let total = raw.len();
        let mut valid = Vec::with_capacity(total);
        for (index, entry) in raw.into_iter().enumerate() {
            match entry.validate() {
                Ok(record) => valid.push(record),
                Err(e) => warn!(source, index, error = %e, "Skipping malformed record"),
            }
        }

        let report = IngestReport {
            ingested: valid.len(),
            skipped: total - valid.len(),
        };
        if total > 0 && valid.is_empty() {
            return Err(FetchError::InvalidResponse(format!(
                "all {} entries from {} were malformed",
                total, source
            ))
            .into());
        }

        let stored = match self.mode {
            IngestMode::Append => self.store.put(valid)?,
            IngestMode::Replace => self.store.replace_all(valid)?,
        };
        info!(
            source,
            ingested = report.ingested,
            skipped = report.skipped,
            mode = ?self.mode,
            "Ingested records"
        );

        if let Some(observer) = &self.observer {
            observer.records_ingested(report);
        }
        Ok((stored, report))
    }

    async fn refresh(&self) -> Result<FreshnessOutcome, RefreshError> {
        // No store lock is held while the fetch is in flight
        let raw = match self.fetcher.fetch_records().await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Refresh failed, keeping cached records");
                return Err(e.into());
            }
        };

        let source = self.fetcher.describe();
        let (_, report) = self.ingest(raw, &source)?;

        // A wall clock that jumped backwards never lowers last_fetch_time
        let now = self.clock.wall_millis();
        let stamp = match self.last_fetch_time()? {
            Some(previous) => now.max(previous),
            None => now,
        };
        self.store.set_metadata(LAST_FETCH_TIME, &stamp.to_string())?;
        self.store
            .set_metadata(LAST_FETCH_COUNT, &report.ingested.to_string())?;
        self.store.set_metadata(SOURCE, &source)?;

        Ok(FreshnessOutcome::Refreshed {
            records: self.store.all()?,
            report,
        })
    }

    /// Parsed `last_fetch_time`. An unparsable value counts as absent.
    pub fn last_fetch_time(&self) -> Result<Option<i64>, StorageError> {
        let Some(value) = self.store.get_metadata(LAST_FETCH_TIME)? else {
            return Ok(None);
        };
        match value.trim().parse::<i64>() {
            Ok(millis) => Ok(Some(millis)),
            Err(e) => {
                warn!(value = %value, error = %e, "Ignoring unparsable last_fetch_time");
                Ok(None)
            }
        }
    }

    /// Milliseconds since the last successful refresh, if any.
    ///
    /// A stamp so far off that the difference overflows counts as absent.
    pub fn cache_age_millis(&self) -> Result<Option<i64>, StorageError> {
        let now = self.clock.wall_millis();
        Ok(self.last_fetch_time()?.and_then(|last| now.checked_sub(last)))
    }

    pub fn status(&self, max_age_millis: i64) -> Result<CacheStatus, StorageError> {
        let last = self.last_fetch_time()?;
        let age = self.cache_age_millis()?;
        Ok(CacheStatus {
            record_count: self.store.len()?,
            last_fetch: last.and_then(DateTime::<Utc>::from_timestamp_millis),
            age_display: age.map(age_display).unwrap_or_else(|| "never".to_string()),
            source: self.store.get_metadata(SOURCE)?,
            is_stale: !age.is_some_and(|a| within_max_age(a, max_age_millis)),
        })
    }
}

fn within_max_age(age_millis: i64, max_age_millis: i64) -> bool {
    age_millis >= -CLOCK_SKEW_TOLERANCE_MILLIS && age_millis < max_age_millis
}

/// Human-readable age: "just now", "5m ago", "3h ago", "2d ago".
pub fn age_display(age_millis: i64) -> String {
    let minutes = age_millis / 60_000;
    if minutes < 1 {
        // Also covers clock skew (negative age)
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        if minutes % 60 >= 30 {
            // Round up: 1h 30m+ becomes 2h
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        let days = minutes / 1440;
        if (minutes % 1440) / 60 >= 12 {
            format!("{}d ago", days + 1)
        } else {
            format!("{}d ago", days)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NOW: i64 = 1_700_000_000_000;

    struct StubFetcher {
        calls: AtomicUsize,
        response: Option<Vec<RawRecord>>,
    }

    impl StubFetcher {
        fn ok(records: Vec<RawRecord>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                response: Some(records),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                response: None,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RecordFetcher for StubFetcher {
        async fn fetch_records(&self) -> Result<Vec<RawRecord>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.response {
                Some(records) => Ok(records.clone()),
                None => Err(FetchError::ServerError("unavailable".to_string())),
            }
        }

        fn describe(&self) -> String {
            "stub".to_string()
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<RecordStore>,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordStore::open(dir.path()).unwrap());
        Fixture {
            _dir: dir,
            store,
            clock: ManualClock::new(NOW),
        }
    }

    fn coordinator(f: &Fixture, fetcher: Arc<StubFetcher>) -> FreshnessCoordinator {
        FreshnessCoordinator::new(Arc::clone(&f.store), fetcher, Arc::new(f.clock.clone()))
    }

    #[tokio::test]
    async fn test_empty_cache_is_stale() {
        let f = fixture();
        let fetcher = StubFetcher::ok(vec![RawRecord::new(48.85, 2.35, "chantier A")]);
        let coordinator = coordinator(&f, Arc::clone(&fetcher));

        let outcome = coordinator.ensure_fresh(DEFAULT_MAX_AGE_MILLIS).await.unwrap();
        assert!(outcome.was_refreshed());
        assert_eq!(outcome.records().len(), 1);
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(
            f.store.get_metadata(LAST_FETCH_TIME).unwrap(),
            Some(NOW.to_string())
        );
        assert_eq!(f.store.get_metadata(SOURCE).unwrap().as_deref(), Some("stub"));
    }

    #[tokio::test]
    async fn test_stale_by_one_milli_fetches_once() {
        let f = fixture();
        let max_age = 10_000;
        f.store
            .set_metadata(LAST_FETCH_TIME, &(NOW - (max_age + 1)).to_string())
            .unwrap();
        let fetcher = StubFetcher::ok(vec![]);
        let coordinator = coordinator(&f, Arc::clone(&fetcher));

        coordinator.ensure_fresh(max_age).await.unwrap();
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_fresh_by_one_milli_does_not_fetch() {
        let f = fixture();
        let max_age = 10_000;
        f.store
            .set_metadata(LAST_FETCH_TIME, &(NOW - (max_age - 1)).to_string())
            .unwrap();
        let fetcher = StubFetcher::ok(vec![RawRecord::new(1.0, 1.0, "x")]);
        let coordinator = coordinator(&f, Arc::clone(&fetcher));

        let outcome = coordinator.ensure_fresh(max_age).await.unwrap();
        assert!(!outcome.was_refreshed());
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_age_equal_to_max_is_stale() {
        let f = fixture();
        f.store
            .set_metadata(LAST_FETCH_TIME, &(NOW - 500).to_string())
            .unwrap();
        let fetcher = StubFetcher::ok(vec![]);
        coordinator(&f, Arc::clone(&fetcher)).ensure_fresh(500).await.unwrap();
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_unparsable_timestamp_is_stale() {
        let f = fixture();
        f.store.set_metadata(LAST_FETCH_TIME, "yesterday").unwrap();
        let fetcher = StubFetcher::ok(vec![]);
        coordinator(&f, Arc::clone(&fetcher))
            .ensure_fresh(DEFAULT_MAX_AGE_MILLIS)
            .await
            .unwrap();
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_extreme_last_fetch_time_is_stale() {
        let f = fixture();
        f.store
            .set_metadata(LAST_FETCH_TIME, &i64::MIN.to_string())
            .unwrap();
        let fetcher = StubFetcher::ok(vec![]);
        let coordinator = coordinator(&f, Arc::clone(&fetcher));

        assert_eq!(coordinator.cache_age_millis().unwrap(), None);
        assert!(coordinator.status(DEFAULT_MAX_AGE_MILLIS).unwrap().is_stale);

        let outcome = coordinator.ensure_fresh(DEFAULT_MAX_AGE_MILLIS).await.unwrap();
        assert!(outcome.was_refreshed());
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_small_future_stamp_is_fresh() {
        let f = fixture();
        f.store
            .set_metadata(LAST_FETCH_TIME, &(NOW + 30_000).to_string())
            .unwrap();
        let fetcher = StubFetcher::ok(vec![]);
        let outcome = coordinator(&f, Arc::clone(&fetcher))
            .ensure_fresh(DEFAULT_MAX_AGE_MILLIS)
            .await
            .unwrap();

        assert!(!outcome.was_refreshed());
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_far_future_stamp_is_stale() {
        let f = fixture();
        let fetcher = StubFetcher::ok(vec![]);
        let coordinator = coordinator(&f, Arc::clone(&fetcher));

        // Refresh while the wall clock runs a day ahead, then correct it
        f.clock.set_wall(NOW + DEFAULT_MAX_AGE_MILLIS);
        coordinator.force_refresh().await.unwrap();
        f.clock.set_wall(NOW);

        let outcome = coordinator.ensure_fresh(DEFAULT_MAX_AGE_MILLIS).await.unwrap();
        assert!(outcome.was_refreshed());
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(
            coordinator.last_fetch_time().unwrap(),
            Some(NOW + DEFAULT_MAX_AGE_MILLIS)
        );
        assert!(coordinator.status(DEFAULT_MAX_AGE_MILLIS).unwrap().is_stale);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_cache() {
        let f = fixture();
        f.store
            .put(vec![RawRecord::new(1.0, 1.0, "kept").validate().unwrap()])
            .unwrap();
        let old = (NOW - 2 * DEFAULT_MAX_AGE_MILLIS).to_string();
        f.store.set_metadata(LAST_FETCH_TIME, &old).unwrap();

        let coordinator = coordinator(&f, StubFetcher::failing());
        let result = coordinator.ensure_fresh(DEFAULT_MAX_AGE_MILLIS).await;

        assert!(matches!(result, Err(RefreshError::RefreshFailed(_))));
        assert_eq!(f.store.all().unwrap().len(), 1);
        assert_eq!(f.store.get_metadata(LAST_FETCH_TIME).unwrap(), Some(old));
    }

    #[tokio::test]
    async fn test_malformed_entries_are_skipped() {
        let f = fixture();
        let fetcher = StubFetcher::ok(vec![
            RawRecord::new(1.0, 1.0, "good"),
            RawRecord::default(),
            RawRecord::new(1.0, 500.0, "bad longitude"),
        ]);
        let outcome = coordinator(&f, fetcher).force_refresh().await.unwrap();

        match outcome {
            FreshnessOutcome::Refreshed { records, report } => {
                assert_eq!(report, IngestReport { ingested: 1, skipped: 2 });
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].label, "good");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(
            f.store.get_metadata(LAST_FETCH_COUNT).unwrap().as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn test_all_malformed_batch_is_rejected() {
        let f = fixture();
        let fetcher = StubFetcher::ok(vec![RawRecord::default(), RawRecord::default()]);
        let result = coordinator(&f, fetcher).force_refresh().await;

        assert!(matches!(
            result,
            Err(RefreshError::RefreshFailed(FetchError::InvalidResponse(_)))
        ));
        assert_eq!(f.store.get_metadata(LAST_FETCH_TIME).unwrap(), None);
    }

    #[tokio::test]
    async fn test_last_fetch_time_never_decreases() {
        let f = fixture();
        let fetcher = StubFetcher::ok(vec![]);
        let coordinator = coordinator(&f, fetcher);

        coordinator.force_refresh().await.unwrap();
        f.clock.set_wall(NOW - 60_000);
        coordinator.force_refresh().await.unwrap();

        assert_eq!(coordinator.last_fetch_time().unwrap(), Some(NOW));
    }

    #[tokio::test]
    async fn test_replace_mode_swaps_cache() {
        let f = fixture();
        f.store
            .put(vec![RawRecord::new(1.0, 1.0, "old").validate().unwrap()])
            .unwrap();
        let fetcher = StubFetcher::ok(vec![RawRecord::new(2.0, 2.0, "new")]);
        let outcome = coordinator(&f, fetcher)
            .with_mode(IngestMode::Replace)
            .force_refresh()
            .await
            .unwrap();

        let labels: Vec<&str> = outcome.records().iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["new"]);
    }

    #[tokio::test]
    async fn test_import_does_not_mark_fresh() {
        let f = fixture();
        let coordinator = coordinator(&f, StubFetcher::failing());
        let importer = StubFetcher::ok(vec![RawRecord::new(3.0, 3.0, "imported")]);

        let report = coordinator.import(importer.as_ref()).await.unwrap();
        assert_eq!(report.ingested, 1);
        assert_eq!(f.store.len().unwrap(), 1);
        assert_eq!(coordinator.last_fetch_time().unwrap(), None);
    }

    #[tokio::test]
    async fn test_observer_notified_after_ingest() {
        struct Counter(AtomicUsize);
        impl IngestObserver for Counter {
            fn records_ingested(&self, report: IngestReport) {
                self.0.fetch_add(report.ingested, Ordering::SeqCst);
            }
        }

        let f = fixture();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let fetcher = StubFetcher::ok(vec![RawRecord::new(1.0, 1.0, "a"), RawRecord::new(2.0, 2.0, "b")]);
        coordinator(&f, fetcher)
            .with_observer(counter.clone())
            .force_refresh()
            .await
            .unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_status_reports_age_and_staleness() {
        let f = fixture();
        let coordinator = coordinator(&f, StubFetcher::ok(vec![RawRecord::new(1.0, 1.0, "a")]));

        let status = coordinator.status(DEFAULT_MAX_AGE_MILLIS).unwrap();
        assert_eq!(status.age_display, "never");
        assert!(status.is_stale);

        coordinator.force_refresh().await.unwrap();
        f.clock.advance(5 * 60_000);
        let status = coordinator.status(DEFAULT_MAX_AGE_MILLIS).unwrap();
        assert_eq!(status.record_count, 1);
        assert_eq!(status.age_display, "5m ago");
        assert!(!status.is_stale);
        assert_eq!(status.last_fetch.map(|t| t.timestamp_millis()), Some(NOW));
    }

    #[test]
    fn test_age_display() {
        assert_eq!(age_display(-5_000), "just now");
        assert_eq!(age_display(30_000), "just now");
        assert_eq!(age_display(5 * 60_000), "5m ago");
        assert_eq!(age_display(90 * 60_000), "2h ago");
        assert_eq!(age_display(80 * 60_000), "1h ago");
        assert_eq!(age_display(36 * 60 * 60_000), "2d ago");
        assert_eq!(age_display(25 * 60 * 60_000), "1d ago");
    }
}
