//! Slug map: the service's only persisted state.
//!
//! The map lives in one local JSON file (`<data_dir>/urls.json`) that is read whole and rewritten
//! whole. When mirroring is enabled every save is also committed to a fixed path in the remote
//! content store, and a missing local file is restored from there at startup, so ephemeral local
//! disks do not lose the map.
//!
//! Inserts run `load -> insert -> save` under one async mutex. Reads skip the lock; saves replace
//! the file with a rename so readers never see a half-written map. Nothing coordinates separate
//! processes sharing the same file or mirror.

use bytes::Bytes;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::errors::{Error, Result};
use crate::store::ContentStore;

const MIRROR_COMMIT_MESSAGE: &str = "update slug map";

/// One stored upload. The slug is the key it is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub raw_url: String,
    #[serde(default)]
    pub html_url: String,
    pub mime: String,
    pub name: String,
    pub size: u64,
    pub created_at: DateTime<FixedOffset>,
}

/// Slug -> record. Sorted keys keep the encoded form deterministic.
pub type SlugMap = BTreeMap<String, UploadRecord>;

struct Mirror {
    store: Arc<dyn ContentStore>,
    remote_path: String,
}

pub struct SlugStore {
    path: PathBuf,
    mirror: Option<Mirror>,
    write_lock: Mutex<()>,
}

impl SlugStore {
    /// Store backed by the local file at `path` only.
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mirror: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Store whose saves are also committed to `remote_path` in `store`.
    pub fn mirrored(path: impl Into<PathBuf>, store: Arc<dyn ContentStore>, remote_path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mirror: Some(Mirror {
                store,
                remote_path: remote_path.into(),
            }),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Startup initialisation: make sure a local map file exists.
    ///
    /// An existing local file is left alone. Otherwise, with a mirror, the remote copy is
    /// restored; an absent, unreachable or unparseable remote copy yields an empty map.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn hydrate(&self) -> Result<()> {
        if fs::try_exists(&self.path).await.unwrap_or(false) {
            debug!("Local slug map present");
            return Ok(());
        }

        let map = match &self.mirror {
            Some(mirror) => match mirror.store.get(&mirror.remote_path).await {
                Ok(Some(bytes)) => match serde_json::from_slice::<SlugMap>(&bytes) {
                    Ok(map) => {
                        info!(entries = map.len(), remote_path = %mirror.remote_path, "Restored slug map from remote store");
                        map
                    }
                    Err(e) => {
                        warn!(remote_path = %mirror.remote_path, error = %e, "Remote slug map unparseable, starting empty");
                        SlugMap::new()
                    }
                },
                Ok(None) => {
                    info!(remote_path = %mirror.remote_path, "No remote slug map, starting empty");
                    SlugMap::new()
                }
                Err(e) => {
                    warn!(remote_path = %mirror.remote_path, error = %e, "Could not fetch remote slug map, starting empty");
                    SlugMap::new()
                }
            },
            None => SlugMap::new(),
        };

        self.write_local(&encode(&map)?).await
    }

    /// Read the local map. Absence or corruption reads as an empty map.
    pub async fn load(&self) -> SlugMap {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "Could not read slug map, treating as empty");
                }
                return SlugMap::new();
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return SlugMap::new();
        }

        serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Slug map is corrupt, treating as empty");
            SlugMap::new()
        })
    }

    /// Overwrite the local map, then push the same bytes to the mirror if there is one.
    pub async fn save(&self, map: &SlugMap) -> Result<()> {
        let encoded = encode(map)?;
        self.write_local(&encoded).await?;

        if let Some(mirror) = &self.mirror {
            mirror
                .store
                .upsert(&mirror.remote_path, Bytes::from(encoded), MIRROR_COMMIT_MESSAGE)
                .await?;
            debug!(remote_path = %mirror.remote_path, entries = map.len(), "Mirrored slug map");
        }
        Ok(())
    }

    /// Add one record and persist the whole map.
    #[instrument(skip(self, record))]
    pub async fn insert(&self, slug: &str, record: UploadRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut map = self.load().await;
        if map.contains_key(slug) {
            warn!("Slug already present, replacing record");
        }
        map.insert(slug.to_string(), record);
        self.save(&map).await
    }

    pub async fn get(&self, slug: &str) -> Option<UploadRecord> {
        self.load().await.remove(slug)
    }

    /// Write to a sibling temp file and rename over the map.
    async fn write_local(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| Error::Internal {
                operation: format!("create slug map directory {}: {e}", parent.display()),
            })?;
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, bytes).await.map_err(|e| Error::Internal {
            operation: format!("write {}: {e}", tmp.display()),
        })?;
        fs::rename(&tmp, &self.path).await.map_err(|e| Error::Internal {
            operation: format!("replace {}: {e}", self.path.display()),
        })?;
        Ok(())
    }
}

fn encode(map: &SlugMap) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(map).map_err(|e| Error::Internal {
        operation: format!("encode slug map: {e}"),
    })
}
