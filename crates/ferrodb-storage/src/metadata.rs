//! Persisted storage-engine metadata.
//!
//! A single document at a fixed name under the data directory records
//! which engine owns the directory and the options it was opened with:
//!
//! ```json
//! {"storage": {"engine": "memory", "options": {"directoryPerDb": false}}}
//! ```
//!
//! Startup refuses to proceed when the recorded engine differs from the
//! configured one or a requested option conflicts with the persisted
//! value. Writes go to a temporary file first, then rename over the
//! final name with both the file and its parent directory fsynced.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::engine::error::StorageError;

/// File name of the metadata document inside the data directory.
pub const METADATA_BASENAME: &str = "storage.json";

#[derive(Debug, Serialize, Deserialize)]
struct MetadataDocument {
    storage: StorageSection,
}

#[derive(Debug, Serialize, Deserialize)]
struct StorageSection {
    engine: String,
    #[serde(default)]
    options: JsonValue,
}

/// The storage-engine metadata document for one data directory.
#[derive(Debug)]
pub struct StorageEngineMetadata {
    dbpath: PathBuf,
    engine: String,
    options: JsonValue,
}

impl StorageEngineMetadata {
    /// Fresh metadata for a directory that has none yet.
    #[must_use]
    pub fn new(dbpath: impl Into<PathBuf>, engine: impl Into<String>) -> Self {
        Self {
            dbpath: dbpath.into(),
            engine: engine.into(),
            options: JsonValue::Object(serde_json::Map::new()),
        }
    }

    /// Load metadata from `dbpath`, or `None` when no file exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corruption`] for empty, malformed, or
    /// wrongly-shaped files. A missing file is not an error.
    pub fn for_path(dbpath: impl Into<PathBuf>) -> Result<Option<Self>, StorageError> {
        let dbpath = dbpath.into();
        if !dbpath.join(METADATA_BASENAME).exists() {
            return Ok(None);
        }
        Self::read(dbpath).map(Some)
    }

    fn read(dbpath: PathBuf) -> Result<Self, StorageError> {
        let path = dbpath.join(METADATA_BASENAME);
        let contents = fs::read_to_string(&path)?;
        if contents.is_empty() {
            return Err(StorageError::Corruption(format!(
                "metadata file {} cannot be empty",
                path.display()
            )));
        }
        let doc: MetadataDocument = serde_json::from_str(&contents).map_err(|e| {
            StorageError::Corruption(format!("failed to parse {}: {e}", path.display()))
        })?;
        if doc.storage.engine.is_empty() {
            return Err(StorageError::Corruption(format!(
                "metadata file {} has an empty engine name",
                path.display()
            )));
        }
        debug!(engine = %doc.storage.engine, path = %path.display(), "read storage metadata");
        Ok(Self { dbpath, engine: doc.storage.engine, options: doc.storage.options })
    }

    /// The recorded engine name.
    #[must_use]
    pub fn engine(&self) -> &str {
        &self.engine
    }

    /// The recorded engine options.
    #[must_use]
    pub fn options(&self) -> &JsonValue {
        &self.options
    }

    /// Record an engine option prior to writing.
    pub fn set_option(&mut self, name: impl Into<String>, value: JsonValue) {
        if let JsonValue::Object(map) = &mut self.options {
            map.insert(name.into(), value);
        }
    }

    /// Refuse startup when the configured engine does not match the one
    /// that owns the data directory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corruption`] on mismatch.
    pub fn validate_engine(&self, expected: &str) -> Result<(), StorageError> {
        if self.engine != expected {
            return Err(StorageError::Corruption(format!(
                "data directory was created by the '{}' storage engine, but '{}' was requested",
                self.engine, expected
            )));
        }
        Ok(())
    }

    /// Refuse startup when a requested boolean option conflicts with the
    /// persisted one. An absent persisted option accepts any request.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corruption`] on conflict or non-boolean
    /// persisted value.
    pub fn validate_option(&self, name: &str, requested: bool) -> Result<(), StorageError> {
        match self.options.get(name) {
            None => Ok(()),
            Some(JsonValue::Bool(stored)) if *stored == requested => Ok(()),
            Some(JsonValue::Bool(stored)) => Err(StorageError::Corruption(format!(
                "requested option conflicts with current storage engine option for {name}: \
                 requested {requested} but currently {stored}"
            ))),
            Some(other) => Err(StorageError::Corruption(format!(
                "option {name} must be a boolean, found {other}"
            ))),
        }
    }

    /// Persist the document: write to `<name>.tmp`, fsync, rename over
    /// the final name, fsync the parent directory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] on any filesystem failure.
    pub fn write(&self) -> Result<(), StorageError> {
        let final_path = self.dbpath.join(METADATA_BASENAME);
        let temp_path = self.dbpath.join(format!("{METADATA_BASENAME}.tmp"));

        let doc = MetadataDocument {
            storage: StorageSection { engine: self.engine.clone(), options: self.options.clone() },
        };
        let contents = serde_json::to_string_pretty(&doc)
            .map_err(|e| StorageError::Corruption(e.to_string()))?;

        fs::write(&temp_path, contents)?;
        File::open(&temp_path)?.sync_all()?;
        fs::rename(&temp_path, &final_path)?;
        sync_dir(&self.dbpath)?;
        debug!(engine = %self.engine, path = %final_path.display(), "wrote storage metadata");
        Ok(())
    }
}

fn sync_dir(dir: &Path) -> std::io::Result<()> {
    // Directory fsync is not supported everywhere; ignore the errors the
    // platform reports for directories.
    match File::open(dir) {
        Ok(handle) => match handle.sync_all() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::Unsupported => Ok(()),
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempdir().expect("tempdir");
        assert!(StorageEngineMetadata::for_path(dir.path()).expect("read").is_none());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().expect("tempdir");
        let mut metadata = StorageEngineMetadata::new(dir.path(), "memory");
        metadata.set_option("directoryPerDb", json!(true));
        metadata.write().expect("write");

        let loaded =
            StorageEngineMetadata::for_path(dir.path()).expect("read").expect("file exists");
        assert_eq!(loaded.engine(), "memory");
        assert_eq!(loaded.options().get("directoryPerDb"), Some(&json!(true)));
    }

    #[test]
    fn engine_mismatch_is_refused() {
        let dir = tempdir().expect("tempdir");
        StorageEngineMetadata::new(dir.path(), "memory").write().expect("write");

        let loaded =
            StorageEngineMetadata::for_path(dir.path()).expect("read").expect("file exists");
        assert!(loaded.validate_engine("memory").is_ok());
        assert!(loaded.validate_engine("wiredTiger").is_err());
    }

    #[test]
    fn option_conflict_is_refused() {
        let dir = tempdir().expect("tempdir");
        let mut metadata = StorageEngineMetadata::new(dir.path(), "memory");
        metadata.set_option("directoryPerDb", json!(false));
        metadata.write().expect("write");

        let loaded =
            StorageEngineMetadata::for_path(dir.path()).expect("read").expect("file exists");
        assert!(loaded.validate_option("directoryPerDb", false).is_ok());
        assert!(loaded.validate_option("directoryPerDb", true).is_err());
        assert!(loaded.validate_option("unrecorded", true).is_ok());
    }

    #[test]
    fn empty_file_is_corrupt() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join(METADATA_BASENAME), "").expect("touch");
        assert!(StorageEngineMetadata::for_path(dir.path()).is_err());
    }

    #[test]
    fn garbage_file_is_corrupt() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join(METADATA_BASENAME), "not json").expect("write");
        assert!(StorageEngineMetadata::for_path(dir.path()).is_err());
    }
}
