use std::fs;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::LocusError;
use crate::fs_util;
use crate::source::Matrix;

pub trait ResultCache {
    fn contains(&self, key: &str) -> Result<bool, LocusError>;

    fn get(&self, key: &str) -> Result<Option<Matrix>, LocusError>;

    fn set(&self, key: &str, value: &Matrix) -> Result<(), LocusError>;

    /// Stores `value` only if `key` is absent, as one atomic step. Returns
    /// whether this call wrote the entry.
    fn set_if_absent(&self, key: &str, value: &Matrix) -> Result<bool, LocusError>;
}

pub trait CacheOpener {
    type Cache: ResultCache;

    fn open(&self, config: &Map<String, Value>) -> Result<Self::Cache, LocusError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiskCacheOpener;

impl CacheOpener for DiskCacheOpener {
    type Cache = DiskCache;

    fn open(&self, config: &Map<String, Value>) -> Result<DiskCache, LocusError> {
        let directory = config
            .get("directory")
            .and_then(Value::as_str)
            .filter(|dir| !dir.is_empty())
            .ok_or_else(|| {
                LocusError::CacheOpen("'directory' must be a non-empty string".to_string())
            })?;
        let compress = match config.get("compress") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(flag)) => *flag,
            Some(_) => {
                return Err(LocusError::CacheOpen("'compress' must be a boolean".to_string()));
            }
        };
        DiskCache::open(Utf8PathBuf::from(directory), compress)
    }
}

#[derive(Debug, Clone)]
pub struct DiskCache {
    root: Utf8PathBuf,
    compress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub stored_at: DateTime<Utc>,
    pub shape: (usize, usize),
    data: Vec<Option<f64>>,
}

impl CacheEntry {
    pub fn new(key: &str, value: &Matrix) -> Self {
        Self {
            key: key.to_string(),
            stored_at: Utc::now(),
            shape: value.dim(),
            data: value
                .iter()
                .map(|v| if v.is_nan() { None } else { Some(*v) })
                .collect(),
        }
    }

    pub fn matrix(&self) -> Result<Matrix, LocusError> {
        let data: Vec<f64> = self.data.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        Array2::from_shape_vec(self.shape, data).map_err(|err| {
            LocusError::CacheAccess(format!("corrupt entry for {}: {err}", self.key))
        })
    }
}

impl DiskCache {
    pub fn open(root: Utf8PathBuf, compress: bool) -> Result<Self, LocusError> {
        fs::create_dir_all(root.join("entries").as_std_path()).map_err(|err| {
            LocusError::CacheOpen(format!("cannot create cache directory {root}: {err}"))
        })?;
        debug!(directory = %root, compress, "opened disk cache");
        Ok(Self { root, compress })
    }

    pub fn entry_path(&self, key: &str) -> Utf8PathBuf {
        let mut hasher = Md5::new();
        hasher.update(key.as_bytes());
        self.root
            .join("entries")
            .join(format!("{:x}.json", hasher.finalize()))
    }

    pub fn entry(&self, key: &str) -> Result<Option<CacheEntry>, LocusError> {
        let path = self.entry_path(key);
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let entry = read_entry(path.as_std_path())?;
        Ok((entry.key == key).then_some(entry))
    }

    pub fn entries(&self) -> Result<Vec<CacheEntry>, LocusError> {
        let mut entries = Vec::new();
        for path in self.entry_files()? {
            entries.push(read_entry(&path)?);
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    pub fn remove(&self, key: &str) -> Result<bool, LocusError> {
        if self.entry(key)?.is_none() {
            return Ok(false);
        }
        fs::remove_file(self.entry_path(key).as_std_path())
            .map_err(|err| LocusError::CacheAccess(err.to_string()))?;
        Ok(true)
    }

    pub fn clear(&self) -> Result<usize, LocusError> {
        let files = self.entry_files()?;
        for path in &files {
            fs::remove_file(path).map_err(|err| LocusError::CacheAccess(err.to_string()))?;
        }
        Ok(files.len())
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>, LocusError> {
        let entries = fs::read_dir(self.root.join("entries").as_std_path())
            .map_err(|err| LocusError::CacheAccess(err.to_string()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|err| LocusError::CacheAccess(err.to_string()))?
                .path();
            if path.extension().map(|ext| ext == "json").unwrap_or(false) {
                files.push(path);
            }
        }
        Ok(files)
    }

    fn encode(&self, key: &str, value: &Matrix) -> Result<Vec<u8>, LocusError> {
        let content = serde_json::to_vec(&CacheEntry::new(key, value))
            .map_err(|err| LocusError::CacheAccess(err.to_string()))?;
        if !self.compress {
            return Ok(content);
        }
        fs_util::gzip(&content).map_err(|err| LocusError::CacheAccess(err.to_string()))
    }
}

impl ResultCache for DiskCache {
    fn contains(&self, key: &str) -> Result<bool, LocusError> {
        Ok(self.entry(key)?.is_some())
    }

    fn get(&self, key: &str) -> Result<Option<Matrix>, LocusError> {
        self.entry(key)?.map(|entry| entry.matrix()).transpose()
    }

    fn set(&self, key: &str, value: &Matrix) -> Result<(), LocusError> {
        let content = self.encode(key, value)?;
        fs_util::write_atomic(self.entry_path(key).as_std_path(), &content)
            .map_err(|err| LocusError::CacheAccess(err.to_string()))?;
        debug!(key, "stored cache entry");
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &Matrix) -> Result<bool, LocusError> {
        let content = self.encode(key, value)?;
        let written = fs_util::write_new_atomic(self.entry_path(key).as_std_path(), &content)
            .map_err(|err| LocusError::CacheAccess(err.to_string()))?;
        debug!(key, written, "stored cache entry if absent");
        Ok(written)
    }
}

fn read_entry(path: &Path) -> Result<CacheEntry, LocusError> {
    let content =
        fs_util::read_maybe_gzip(path).map_err(|err| LocusError::CacheAccess(err.to_string()))?;
    serde_json::from_slice(&content).map_err(|err| {
        LocusError::CacheAccess(format!("unreadable entry {}: {err}", path.display()))
    })
}
