//! Storage backends: [`FsStorage`] for real mirrors, [`MemoryStorage`] for dry runs and tests.

use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use crate::change::fingerprint;
use crate::contract::{Storage, StorageError, StoredResource};
use crate::reconcile::{stale_paths, StoredEntry};

/// Suffix of the metadata file written next to every stored file.
pub const META_SUFFIX: &str = ".meta.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Meta {
    fingerprint: String,
    created: DateTime<Utc>,
    written_at: DateTime<Utc>,
}

/// Files below a root directory, each with a `<path>.meta.json` sidecar holding its
/// fingerprint and `created` timestamp.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Storage paths are relative and never climb out of the root.
    fn file(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        if path.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(format!("invalid storage path {path:?}").into());
        }
        Ok(self.root.join(relative))
    }

    fn meta_file(file: &Path) -> PathBuf {
        let mut name = file.as_os_str().to_owned();
        name.push(META_SUFFIX);
        PathBuf::from(name)
    }

    async fn read_meta(file: &Path) -> Result<Option<Meta>, StorageError> {
        match fs::read(Self::meta_file(file)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// `created` of a stored file; files without sidecar fall back to their mtime.
    async fn created_of(file: &Path) -> Result<DateTime<Utc>, StorageError> {
        if let Some(meta) = Self::read_meta(file).await? {
            return Ok(meta.created);
        }
        let modified = fs::metadata(file).await?.modified()?;
        Ok(DateTime::<Utc>::from(modified))
    }

    /// Every stored file below `dir`, as paths relative to the root with `/` separators.
    async fn walk(&self, dir: PathBuf) -> Result<Vec<StoredEntry>, StorageError> {
        let mut entries = Vec::new();
        let mut pending = vec![dir];
        while let Some(dir) = pending.pop() {
            let mut listing = match fs::read_dir(&dir).await {
                Ok(listing) => listing,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(item) = listing.next_entry().await? {
                let file = item.path();
                if item.file_type().await?.is_dir() {
                    pending.push(file);
                    continue;
                }
                if file.to_string_lossy().ends_with(META_SUFFIX) {
                    continue;
                }
                let Ok(relative) = file.strip_prefix(&self.root) else {
                    continue;
                };
                let path = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                entries.push(StoredEntry {
                    path,
                    created: Self::created_of(&file).await?,
                });
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(fs::try_exists(self.file(path)?).await?)
    }

    async fn read(&self, path: &str) -> Result<Option<StoredResource>, StorageError> {
        let file = self.file(path)?;
        let content = match fs::read(&file).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (fingerprint, created) = match Self::read_meta(&file).await? {
            Some(meta) => (meta.fingerprint, meta.created),
            None => (fingerprint(&content), Self::created_of(&file).await?),
        };
        Ok(Some(StoredResource {
            path: path.to_string(),
            content,
            fingerprint,
            created,
        }))
    }

    async fn write_if_newer(
        &self,
        path: &str,
        content: &[u8],
        fingerprint: &str,
        created: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let file = self.file(path)?;
        if let Some(meta) = Self::read_meta(&file).await? {
            if meta.created > created {
                debug!(path, "Stored copy is newer, not overwriting");
                return Ok(());
            }
        }
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&file, content).await?;
        let meta = Meta {
            fingerprint: fingerprint.to_string(),
            created,
            written_at: Utc::now(),
        };
        fs::write(Self::meta_file(&file), serde_json::to_vec_pretty(&meta)?).await?;
        Ok(())
    }

    async fn delete_tree_except(
        &self,
        prefix: &str,
        keep: &HashSet<String>,
        excluded: &[String],
        not_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>, StorageError> {
        let dir = match prefix.rfind('/') {
            Some(end) => self.file(&prefix[..end])?,
            None => self.root.clone(),
        };
        let entries = self.walk(dir).await?;
        let stale = stale_paths(&entries, prefix, keep, excluded, not_before);

        for path in &stale {
            let file = self.file(path)?;
            fs::remove_file(&file).await?;
            match fs::remove_file(Self::meta_file(&file)).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            info!(path = %path, "Deleted stale resource");
        }
        Ok(stale)
    }
}

/// In-process storage keyed by path.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    resources: Mutex<BTreeMap<String, StoredResource>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn resources(&self) -> Result<MutexGuard<'_, BTreeMap<String, StoredResource>>, StorageError> {
        self.resources
            .lock()
            .map_err(|e| format!("memory storage poisoned: {e}").into())
    }

    /// Seeds a stored copy, bypassing the write guard.
    pub fn insert(&self, resource: StoredResource) -> Result<(), StorageError> {
        self.resources()?.insert(resource.path.clone(), resource);
        Ok(())
    }

    pub fn paths(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.resources()?.keys().cloned().collect())
    }

    pub fn get(&self, path: &str) -> Result<Option<StoredResource>, StorageError> {
        Ok(self.resources()?.get(path).cloned())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.resources()?.contains_key(path))
    }

    async fn read(&self, path: &str) -> Result<Option<StoredResource>, StorageError> {
        self.get(path)
    }

    async fn write_if_newer(
        &self,
        path: &str,
        content: &[u8],
        fingerprint: &str,
        created: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut resources = self.resources()?;
        if resources.get(path).is_some_and(|stored| stored.created > created) {
            return Ok(());
        }
        resources.insert(
            path.to_string(),
            StoredResource {
                path: path.to_string(),
                content: content.to_vec(),
                fingerprint: fingerprint.to_string(),
                created,
            },
        );
        Ok(())
    }

    async fn delete_tree_except(
        &self,
        prefix: &str,
        keep: &HashSet<String>,
        excluded: &[String],
        not_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>, StorageError> {
        let mut resources = self.resources()?;
        let entries: Vec<StoredEntry> = resources
            .values()
            .map(|stored| StoredEntry {
                path: stored.path.clone(),
                created: stored.created,
            })
            .collect();
        let stale = stale_paths(&entries, prefix, keep, excluded, not_before);
        for path in &stale {
            resources.remove(path);
        }
        Ok(stale)
    }
}
