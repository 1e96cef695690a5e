use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::client::parse_open_data;
use super::{FetchError, RecordFetcher};
use crate::models::RawRecord;

/// Imports a record set from a local JSON file.
///
/// Accepts either a plain array of `{latitude, longitude, label}` objects or
/// the open-data envelope served by the remote source.
#[derive(Debug, Clone)]
pub struct FileImporter {
    path: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PlainEntry {
    Record(RawRecord),
    Other(serde_json::Value),
}

impl FileImporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parse(&self, contents: &str) -> Result<Vec<RawRecord>, FetchError> {
        if contents.trim_start().starts_with('[') {
            let entries: Vec<PlainEntry> = serde_json::from_str(contents).map_err(|e| {
                FetchError::InvalidResponse(format!("{}: {}", self.path.display(), e))
            })?;
            return Ok(entries
                .into_iter()
                .map(|entry| match entry {
                    PlainEntry::Record(raw) => raw,
                    PlainEntry::Other(_) => RawRecord::default(),
                })
                .collect());
        }
        parse_open_data(contents)
    }
}

#[async_trait]
impl RecordFetcher for FileImporter {
    async fn fetch_records(&self) -> Result<Vec<RawRecord>, FetchError> {
        let contents = std::fs::read_to_string(&self.path).map_err(|source| FetchError::Io {
            path: self.path.clone(),
            source,
        })?;
        let records = self.parse(&contents)?;
        debug!(path = %self.path.display(), count = records.len(), "Read import file");
        Ok(records)
    }

    fn describe(&self) -> String {
        format!("file://{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_import_plain_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(
            &path,
            r#"[
                {"latitude": 48.85, "longitude": 2.35, "label": "chantier A"},
                {"latitude": 48.86, "label": "no longitude"},
                42
            ]"#,
        )
        .unwrap();

        let records = FileImporter::new(&path).fetch_records().await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], RawRecord::new(48.85, 2.35, "chantier A"));
        assert_eq!(records[1].longitude, None);
        assert_eq!(records[2], RawRecord::default());
    }

    #[tokio::test]
    async fn test_import_open_data_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        std::fs::write(
            &path,
            r#"{"total_count": 1, "results": [{"geo_point_2d": {"lat": 44.8, "lon": -0.6}, "libelle": "B"}]}"#,
        )
        .unwrap();

        let records = FileImporter::new(&path).fetch_records().await.unwrap();
        assert_eq!(records, vec![RawRecord::new(44.8, -0.6, "B")]);
    }

    #[tokio::test]
    async fn test_missing_file_is_fetch_error() {
        let importer = FileImporter::new("/nonexistent/hazardcache/import.json");
        assert!(matches!(
            importer.fetch_records().await,
            Err(FetchError::Io { .. })
        ));
    }
}
