//! Command implementations for the CLI.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use hazardcache_core::monitor::rank_by_distance;
use hazardcache_core::{
    ChannelSink, Config, Engine, FileImporter, FreshnessCoordinator, OpenDataClient, Position,
    RecordStore, RefreshError, SystemClock,
};

/// Number of records listed by `nearby` when no limit is given
pub const DEFAULT_NEARBY_LIMIT: usize = 10;

fn open_store(config: &Config) -> Result<Arc<RecordStore>> {
    let dir = config.cache_dir()?;
    debug!(?dir, "Cache directory configured");
    let store = RecordStore::open(&dir)
        .with_context(|| format!("Cache unavailable at {}", dir.display()))?;
    Ok(Arc::new(store))
}

fn coordinator(config: &Config, store: Arc<RecordStore>) -> Result<FreshnessCoordinator> {
    let client = OpenDataClient::new(config.source_url.clone(), config.request_timeout())?;
    Ok(
        FreshnessCoordinator::new(store, Arc::new(client), Arc::new(SystemClock::new()))
            .with_mode(config.ingest_mode),
    )
}

pub fn status(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let coordinator = coordinator(config, store)?;
    let status = coordinator.status(config.max_cache_age_millis)?;

    println!("Records:      {}", status.record_count);
    println!("Last fetch:   {}", status.age_display);
    if let Some(at) = status.last_fetch {
        println!("Fetched at:   {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("Source:       {}", status.source.as_deref().unwrap_or("-"));
    println!("Stale:        {}", if status.is_stale { "yes" } else { "no" });
    Ok(())
}

pub async fn refresh(config: &Config, force: bool) -> Result<()> {
    let store = open_store(config)?;
    let coordinator = coordinator(config, store)?;

    let outcome = if force {
        coordinator.force_refresh().await?
    } else {
        coordinator.ensure_fresh(config.max_cache_age_millis).await?
    };

    if outcome.was_refreshed() {
        println!("Refreshed: {} records cached", outcome.records().len());
    } else {
        println!("Cache is fresh: {} records", outcome.records().len());
    }
    Ok(())
}

pub async fn import(config: &Config, path: &Path) -> Result<()> {
    let store = open_store(config)?;
    let coordinator = coordinator(config, store)?;
    let report = coordinator.import(&FileImporter::new(path)).await?;

    println!(
        "Imported {} records from {} ({} skipped)",
        report.ingested,
        path.display(),
        report.skipped
    );
    Ok(())
}

pub async fn nearby(config: &Config, lat: &str, lon: &str, limit: usize) -> Result<()> {
    let position = Position::parse(&format!("{},{}", lat, lon))
        .ok_or_else(|| anyhow!("Invalid position: {}, {}", lat, lon))?;

    let store = open_store(config)?;
    let coordinator = coordinator(config, Arc::clone(&store))?;

    // A failed refresh degrades to the last-known-good cache
    let records = match coordinator.ensure_fresh(config.max_cache_age_millis).await {
        Ok(outcome) => outcome.records().to_vec(),
        Err(RefreshError::RefreshFailed(e)) => {
            warn!(error = %e, "Refresh failed, using cached records");
            eprintln!("Warning: refresh failed ({}), showing cached records", e);
            store.all()?
        }
        Err(e) => return Err(e.into()),
    };

    let ranked = rank_by_distance(records, position);
    if ranked.is_empty() {
        println!("No records cached");
    }
    for entry in ranked.iter().take(limit) {
        println!(
            "{:>8}  {}  ({:.5}, {:.5})",
            entry.display_distance(),
            entry.record.label,
            entry.record.latitude,
            entry.record.longitude
        );
    }
    Ok(())
}

/// Read `lat,lon` lines from stdin and print alerts as they fire.
///
/// A line reading `refresh` forces a refresh. The engine stops at end of input.
pub async fn watch(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let client = OpenDataClient::new(config.source_url.clone(), config.request_timeout())?;
    let (sink, mut alerts) = ChannelSink::channel();

    let (engine, handle) = Engine::new(
        config.engine_settings(),
        store,
        Arc::new(client),
        Arc::new(sink),
        Arc::new(SystemClock::new()),
    );
    let engine_task = tokio::spawn(engine.run());

    let printer = tokio::spawn(async move {
        while let Some(alert) = alerts.recv().await {
            println!("ALERT {}", alert);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("refresh") {
            handle.request_refresh(true);
            continue;
        }
        match Position::parse(line) {
            Some(position) => {
                if !handle.update_position(position) {
                    break;
                }
            }
            None => eprintln!("Ignoring invalid position: {}", line),
        }
    }

    handle.shutdown();
    engine_task.await?;
    printer.await?;
    Ok(())
}
