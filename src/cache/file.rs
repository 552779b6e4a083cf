//! Persistent cache backend: one JSON file per origin.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{CacheBackend, CacheValue};
use crate::error::AuthError;

const CACHE_FILE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CacheFile {
    version: u32,
    entries: BTreeMap<String, CacheValue>,
}

/// File-backed cache that survives restarts.
///
/// Every write rewrites the file atomically (temp file, `0600`, rename).
pub struct FileCache {
    path: PathBuf,
    io: Mutex<()>,
}

impl FileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io: Mutex::new(()),
        }
    }

    /// Cache file for `origin` inside `dir`.
    pub fn for_origin(dir: impl AsRef<Path>, origin: &str) -> Self {
        let name: String = origin
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        Self::new(dir.as_ref().join(format!("cache-{name}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<CacheFile, AuthError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CacheFile {
                    version: CACHE_FILE_VERSION,
                    entries: BTreeMap::new(),
                })
            }
            Err(err) => return Err(err.into()),
        };
        let file: CacheFile = serde_json::from_slice(&raw)?;
        if file.version != CACHE_FILE_VERSION {
            return Err(AuthError::Serialization(format!(
                "unsupported cache file version {}",
                file.version
            )));
        }
        Ok(file)
    }

    fn store(&self, file: &CacheFile) -> Result<(), AuthError> {
        let serialized = serde_json::to_vec_pretty(file)?;
        atomic_write(&self.path, &serialized)
    }
}

#[async_trait]
impl CacheBackend for FileCache {
    async fn get(&self, key: &str) -> Result<Option<CacheValue>, AuthError> {
        let _guard = self.io.lock().await;
        Ok(self.load()?.entries.remove(key))
    }

    async fn set(&self, key: &str, value: CacheValue) -> Result<(), AuthError> {
        let _guard = self.io.lock().await;
        let mut file = self.load()?;
        file.entries.insert(key.to_string(), value);
        self.store(&file)
    }

    async fn remove(&self, key: &str) -> Result<(), AuthError> {
        let _guard = self.io.lock().await;
        let mut file = self.load()?;
        if file.entries.remove(key).is_some() {
            self.store(&file)?;
        }
        Ok(())
    }

    async fn all_keys(&self) -> Result<Option<Vec<String>>, AuthError> {
        let _guard = self.io.lock().await;
        Ok(Some(self.load()?.entries.into_keys().collect()))
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), AuthError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file_name = path.file_name().ok_or_else(|| {
        AuthError::Configuration(format!("Cache path {} has no file name", path.display()))
    })?;

    let temp_name = format!(
        ".{}.tmp-{}-{}",
        file_name.to_string_lossy(),
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    );
    let temp_path = path.with_file_name(temp_name);

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let write_result = (|| -> std::io::Result<()> {
        let mut temp_file = options.open(&temp_path)?;
        temp_file.write_all(data)?;
        temp_file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }

    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }

    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}
