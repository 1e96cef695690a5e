use std::path::PathBuf;

use thiserror::Error;

/// Durable storage could not be read or written.
///
/// Callers treat this as "cache unavailable". It is never folded into an empty
/// result, which would be indistinguishable from "no records".
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt cache file {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize cache data: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Cache lock poisoned by a panicked writer")]
    Poisoned,
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}
