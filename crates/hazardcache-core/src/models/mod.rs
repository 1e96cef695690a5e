//! Data models for cached hazard records.
//!
//! - `RawRecord`: an unvalidated entry from a fetch collaborator
//! - `NewRecord`, `Record`: validated records before and after storage
//! - `Position`: a coordinate pair
//! - `ProximityAlert`, `NearbyRecord`: monitor output

pub mod alert;
pub mod record;

pub use alert::{NearbyRecord, ProximityAlert};
pub use record::{MalformedRecord, NewRecord, Position, RawRecord, Record};
