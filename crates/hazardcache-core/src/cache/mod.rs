//! Local record cache.
//!
//! This module provides the `RecordStore` for keeping fetched records on disk
//! so the proximity monitor keeps working offline. Records and metadata are
//! stored as JSON files in the cache directory:
//!
//! - `records.json`: the record table (id, latitude, longitude, label)
//! - `metadata.json`: key/value pairs such as `last_fetch_time`
//!
//! The store has no freshness policy of its own; see `freshness`.

pub mod error;
pub mod store;

pub use error::StorageError;
pub use store::RecordStore;
