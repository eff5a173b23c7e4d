//! In-process content store with the same compare-and-swap rules as the GitHub backend.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::errors::{Result, StoreError};
use super::{ContentStore, RepoLocation, StoredObject, build_raw_url};

#[derive(Debug, Clone)]
struct Entry {
    content: Bytes,
    sha: String,
}

/// Map-backed store that counts every call, so tests can assert "no remote traffic".
pub struct InMemoryContents {
    location: RepoLocation,
    raw_base: String,
    entries: Mutex<HashMap<String, Entry>>,
    calls: AtomicUsize,
    versions: AtomicUsize,
}

impl InMemoryContents {
    pub fn new(location: RepoLocation) -> Self {
        Self {
            location,
            raw_base: "https://raw.githubusercontent.com".to_string(),
            entries: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            versions: AtomicUsize::new(0),
        }
    }

    /// Seed content without counting it as a call.
    pub fn insert(&self, path: &str, content: impl Into<Bytes>) -> String {
        let sha = self.next_sha();
        self.entries.lock().expect("store lock poisoned").insert(
            path.to_string(),
            Entry {
                content: content.into(),
                sha: sha.clone(),
            },
        );
        sha
    }

    /// Content at `path` without counting it as a call.
    pub fn peek(&self, path: &str) -> Option<Bytes> {
        self.entries
            .lock()
            .expect("store lock poisoned")
            .get(path)
            .map(|entry| entry.content.clone())
    }

    /// Paths currently stored, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.entries.lock().expect("store lock poisoned").keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of trait calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Resolve a raw URL produced by [`ContentStore::raw_url`] back to stored bytes.
    pub fn fetch_raw(&self, raw_url: &str) -> Option<Bytes> {
        let prefix = format!(
            "{}/{}/{}/{}/",
            self.raw_base, self.location.owner, self.location.repo, self.location.branch
        );
        let encoded = raw_url.strip_prefix(&prefix)?;
        let path = encoded
            .split('/')
            .map(|segment| urlencoding::decode(segment).map(|s| s.into_owned()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .ok()?
            .join("/");
        self.peek(&path)
    }

    fn next_sha(&self) -> String {
        format!("sha-{}", self.versions.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn count(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentStore for InMemoryContents {
    async fn get(&self, path: &str) -> Result<Option<Bytes>> {
        self.count();
        Ok(self.peek(path))
    }

    async fn current_sha(&self, path: &str) -> Result<Option<String>> {
        self.count();
        Ok(self
            .entries
            .lock()
            .expect("store lock poisoned")
            .get(path)
            .map(|entry| entry.sha.clone()))
    }

    async fn put(&self, path: &str, content: Bytes, _message: &str, expected_sha: Option<&str>) -> Result<StoredObject> {
        self.count();
        let sha = self.next_sha();
        let mut entries = self.entries.lock().expect("store lock poisoned");

        let current = entries.get(path).map(|entry| entry.sha.as_str());
        if current != expected_sha {
            return Err(StoreError::Conflict {
                path: path.to_string(),
                message: format!("expected {expected_sha:?}, found {current:?}"),
            });
        }

        entries.insert(
            path.to_string(),
            Entry {
                content,
                sha: sha.clone(),
            },
        );

        Ok(StoredObject {
            path: path.to_string(),
            html_url: format!(
                "https://github.com/{}/{}/blob/{}/{}",
                self.location.owner, self.location.repo, self.location.branch, path
            ),
            sha,
        })
    }

    fn location(&self) -> &RepoLocation {
        &self.location
    }

    fn raw_url(&self, path: &str) -> String {
        build_raw_url(&self.raw_base, &self.location, path)
    }
}
