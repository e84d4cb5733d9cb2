use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use super::KeyValueStore;
use crate::error::AppResult;

/// Process-local map; forgets everything on restart.
#[derive(Debug, Default)]
pub struct MemoryKv {
    map: RwLock<BTreeMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self { Self::default() }
}

impl KeyValueStore for MemoryKv {
    fn get(&self, key: &str) -> AppResult<Option<String>> { Ok(self.map.read().get(key).cloned()) }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.map.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        self.map.write().remove(key);
        Ok(())
    }
}

/// JSON object in a single file. Every write replaces the file atomically
/// (temp file + rename) so a crash never leaves a half-written map behind.
#[derive(Debug)]
pub struct FileKv {
    path: PathBuf,
    map: Mutex<BTreeMap<String, String>>,
}

impl FileKv {
    /// Open (or lazily create) the store at `path`. An unreadable or corrupt
    /// file is treated as empty and will be overwritten on the next write.
    pub fn open<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() { std::fs::create_dir_all(parent)?; }
        }
        let map = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, String>>(&bytes) {
                Ok(m) => m,
                Err(e) => {
                    warn!(target: "portal_session::storage", "ignoring corrupt state file '{}': {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(target: "portal_session::storage", "opened state file '{}' keys={}", path.display(), map.len());
        Ok(Self { path, map: Mutex::new(map) })
    }

    pub fn path(&self) -> &Path { &self.path }

    fn flush(&self, map: &BTreeMap<String, String>) -> AppResult<()> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(map)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileKv {
    fn get(&self, key: &str) -> AppResult<Option<String>> { Ok(self.map.lock().get(key).cloned()) }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let mut map = self.map.lock();
        map.insert(key.to_string(), value.to_string());
        self.flush(&map)
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        let mut map = self.map.lock();
        if map.remove(key).is_none() { return Ok(()); }
        self.flush(&map)
    }
}
