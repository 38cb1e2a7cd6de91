//! Snapshot persistence for the process-wide stores.
//!
//! The taxonomy growth store, knowledge base and TTL caches are all persisted
//! as whole JSON snapshots behind the [`SnapshotPort`] trait, so a different
//! backend (an embedded key-value store, for example) can replace the files.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Atomically write JSON data to a file.
///
/// Serializes `data` to pretty-printed JSON, writes to a `.tmp` sibling file,
/// then renames over the target path. Creates parent directories if needed.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Atomically write raw bytes to a file.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load and deserialize JSON from a file.
///
/// Returns `Ok(None)` if the file doesn't exist.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    let value =
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

/// Read/write port for one persisted snapshot.
pub trait SnapshotPort<T>: Send + Sync {
    fn load(&self) -> io::Result<Option<T>>;
    fn save(&self, value: &T) -> io::Result<()>;
}

/// Snapshot stored as a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFilePort<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFilePort<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T: Serialize + DeserializeOwned> SnapshotPort<T> for JsonFilePort<T> {
    fn load(&self) -> io::Result<Option<T>> {
        load_json(&self.path)
    }

    fn save(&self, value: &T) -> io::Result<()> {
        atomic_write_json(&self.path, value)
    }
}

/// In-memory snapshot, used when nothing should touch the disk.
#[derive(Debug, Default)]
pub struct MemoryPort<T> {
    value: Mutex<Option<T>>,
}

impl<T> MemoryPort<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }
}

impl<T: Clone + Send> SnapshotPort<T> for MemoryPort<T> {
    fn load(&self) -> io::Result<Option<T>> {
        let guard = self
            .value
            .lock()
            .map_err(|_| io::Error::other("snapshot lock poisoned"))?;
        Ok(guard.clone())
    }

    fn save(&self, value: &T) -> io::Result<()> {
        let mut guard = self
            .value
            .lock()
            .map_err(|_| io::Error::other("snapshot lock poisoned"))?;
        *guard = Some(value.clone());
        Ok(())
    }
}
