//! Archived exchanges on disk.
//!
//! One file per exchange, JSON-encoded. The live proxy writes them when a
//! record directory is configured; offline replay reads them back.
//!
//! A record is written to a temporary file in the same directory and
//! renamed into place, so readers never see a partial `.json` file.

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use uuid::Uuid;

use crate::http::message::HttpMessage;

/// A request and the response the origin gave to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedRecord {
    pub request: HttpMessage,
    pub response: HttpMessage,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot access {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("cannot decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("cannot encode {}: {source}", .path.display())]
    Encode {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A directory of archived exchanges.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `record` to a fresh file and return its path.
    pub fn save(&self, record: &ArchivedRecord) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        let path = self.dir.join(format!("{}.json", Uuid::new_v4()));

        let staging = NamedTempFile::new_in(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        let mut writer = BufWriter::new(staging);
        serde_json::to_writer(&mut writer, record).map_err(|source| StoreError::Encode {
            path: path.clone(),
            source,
        })?;
        let staging = writer
            .into_inner()
            .map_err(|e| StoreError::io(&path, e.into_error()))?;
        staging
            .persist(&path)
            .map_err(|e| StoreError::io(&path, e.error))?;
        Ok(path)
    }

    /// `.json` files in the directory, sorted by name.
    pub fn list(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| StoreError::io(&self.dir, e))? {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            let path = entry.path();
            if path.is_file() && path.extension() == Some(OsStr::new("json")) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn load(path: &Path) -> Result<ArchivedRecord, StoreError> {
        let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| StoreError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::message::Header;

    fn record(target: &str) -> ArchivedRecord {
        ArchivedRecord {
            request: HttpMessage::new(format!("GET {target} HTTP/1.1"), vec![Header::new("Host", "x")], vec![]),
            response: HttpMessage::new(
                "HTTP/1.1 200 OK",
                vec![Header::new("Content-Length", "2")],
                b"ok".to_vec(),
            ),
        }
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("records"));

        let first = store.save(&record("/a")).unwrap();
        store.save(&record("/b")).unwrap();

        let files = store.list().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(RecordStore::load(&first).unwrap(), record("/a"));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("absent"));
        assert!(matches!(store.list(), Err(StoreError::Io { .. })));
    }

    #[test]
    fn only_finished_records_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        let saved = store.save(&record("/a")).unwrap();
        fs::write(dir.path().join(".tmpXYZ"), b"{\"request\":").unwrap();
        fs::write(dir.path().join("notes.txt"), b"stray").unwrap();

        assert_eq!(store.list().unwrap(), vec![saved]);
    }

    #[test]
    fn garbage_file_fails_to_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk");
        fs::write(&path, b"not json").unwrap();
        assert!(matches!(RecordStore::load(&path), Err(StoreError::Decode { .. })));
    }
}
