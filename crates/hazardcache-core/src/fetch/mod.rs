//! Fetch collaborators.
//!
//! The freshness coordinator only knows the `RecordFetcher` trait. Two
//! implementations are provided:
//!
//! - `OpenDataClient`: the remote open-data endpoint over HTTP
//! - `FileImporter`: a record set supplied as a local JSON file

pub mod client;
pub mod error;
pub mod file;

use async_trait::async_trait;

use crate::models::RawRecord;

pub use client::OpenDataClient;
pub use error::FetchError;
pub use file::FileImporter;

/// Source of raw records. Only invoked when the cache is stale or on demand.
///
/// Implementations bound their own wall time (request timeouts); the caller
/// holds no lock while waiting.
#[async_trait]
pub trait RecordFetcher: Send + Sync {
    async fn fetch_records(&self) -> Result<Vec<RawRecord>, FetchError>;

    /// Human-readable origin, stored as cache metadata.
    fn describe(&self) -> String;
}
