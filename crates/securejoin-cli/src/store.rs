//! File-backed account store
//!
//! All records live in one JSON object mapping storage keys to hex-encoded
//! values. The whole file is rewritten on every change through a temporary
//! file and a rename, so a crash leaves either the old or the new state.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use securejoin_core::{Result, SecureJoinError, Storage, StorageError};

/// [`Storage`] persisted to a single JSON file
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    data: BTreeMap<String, Vec<u8>>,
}

impl FileStorage {
    /// Open the store at `path`, starting empty if the file does not exist
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = match fs::read_to_string(&path) {
            Ok(content) => Self::decode(&path, &content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(SecureJoinError::storage_error(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        debug!("Opened store {} with {} records", path.display(), data.len());
        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn decode(path: &Path, content: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        let encoded: BTreeMap<String, String> = serde_json::from_str(content)
            .map_err(|e| SecureJoinError::corrupt_record(path.display().to_string(), e.to_string()))?;

        encoded
            .into_iter()
            .map(|(key, value)| {
                let bytes = hex::decode(&value)
                    .map_err(|e| SecureJoinError::corrupt_record(key.clone(), e.to_string()))?;
                Ok((key, bytes))
            })
            .collect()
    }

    fn flush(&self) -> Result<()> {
        let encoded: BTreeMap<&str, String> = self
            .data
            .iter()
            .map(|(key, value)| (key.as_str(), hex::encode(value)))
            .collect();
        let content = serde_json::to_string_pretty(&encoded)
            .map_err(|e| SecureJoinError::storage_error(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        Ok(())
    }

    fn io_error(&self, e: std::io::Error) -> SecureJoinError {
        SecureJoinError::Storage(StorageError::Generic {
            message: format!("cannot write {}: {}", self.path.display(), e),
        })
    }
}

impl Storage for FileStorage {
    fn store(&mut self, key: &str, data: Vec<u8>) -> Result<()> {
        self.data.insert(key.to_string(), data);
        self.flush()
    }

    fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.get(key).cloned())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        if self.data.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.data.keys().cloned().collect())
    }

    fn is_available(&self) -> bool {
        true
    }
}
