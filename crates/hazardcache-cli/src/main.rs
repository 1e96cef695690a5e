//! hazardcache - keeps a local cache of road-works sites and alerts when
//! you get close to one.
//!
//! Usage:
//!   hazardcache status
//!   hazardcache refresh [--force]
//!   hazardcache import <file.json>
//!   hazardcache nearby <lat> <lon> [limit]
//!   hazardcache watch [--log-file <dir>]

mod commands;

use std::io;
use std::path::Path;

use anyhow::{bail, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hazardcache_core::Config;

const USAGE: &str = "usage: hazardcache <status | refresh [--force] | import <file> | nearby <lat> <lon> [limit] | watch [--log-file <dir>]>";

/// Log file name prefix inside the `--log-file` directory
const LOG_FILE_PREFIX: &str = "hazardcache.log";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, filtered by `RUST_LOG` (default `warn`). With a log
/// directory, a daily rolling file receives the same events; the returned
/// guard must stay alive for them to be flushed.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let log_dir = args
        .iter()
        .position(|a| a == "--log-file")
        .and_then(|i| args.get(i + 1))
        .map(Path::new);
    let _guard = init_tracing(log_dir);

    let config = Config::load()?;
    info!(cache_dir = ?config.cache_dir().ok(), "hazardcache starting");

    match args.first().map(String::as_str) {
        Some("status") => commands::status(&config),
        Some("refresh") => {
            let force = args.iter().any(|a| a == "--force");
            commands::refresh(&config, force).await
        }
        Some("import") => match args.get(1) {
            Some(path) => commands::import(&config, Path::new(path)).await,
            None => bail!("import needs a file path\n{}", USAGE),
        },
        Some("nearby") => {
            let (Some(lat), Some(lon)) = (args.get(1), args.get(2)) else {
                bail!("nearby needs a latitude and a longitude\n{}", USAGE);
            };
            let limit = match args.get(3) {
                Some(limit) => limit.parse()?,
                None => commands::DEFAULT_NEARBY_LIMIT,
            };
            commands::nearby(&config, lat, lon, limit).await
        }
        Some("watch") => commands::watch(&config).await,
        _ => {
            eprintln!("{}", USAGE);
            Ok(())
        }
    }
}
