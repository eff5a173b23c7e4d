//! Remote content store: a path-addressed blob store with hash-based optimistic concurrency.
//!
//! Production traffic goes to a GitHub repository through [`GithubContents`]. Tests use
//! [`InMemoryContents`], which follows the same compare-and-swap rules.
//!
//! Writes are two steps: [`ContentStore::current_sha`] probes for the hash of whatever is at the
//! path now, then [`ContentStore::put`] submits the new bytes together with that hash. Nothing
//! spans the two calls, so a writer sneaking in between wins unless the remote notices the stale
//! hash, in which case the put fails with [`StoreError::Conflict`]. Conflicts are reported, never
//! retried.

pub mod errors;
pub mod github;
#[cfg(any(test, feature = "test-utils"))]
pub mod in_memory;

use async_trait::async_trait;
use bytes::Bytes;

pub use errors::{Result, StoreError};
pub use github::GithubContents;
#[cfg(any(test, feature = "test-utils"))]
pub use in_memory::InMemoryContents;

/// Where a successful write landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Path as resolved by the store
    pub path: String,
    /// Human-viewable page for the object
    pub html_url: String,
    /// Content hash of the new version
    pub sha: String,
}

/// Coordinates of the repository that files are committed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLocation {
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Fetch the bytes at `path`, or `None` when nothing is stored there.
    async fn get(&self, path: &str) -> Result<Option<Bytes>>;

    /// Content hash of the current version at `path`, `None` when absent.
    async fn current_sha(&self, path: &str) -> Result<Option<String>>;

    /// Write `content` at `path`.
    ///
    /// `expected_sha` must be the hash of the version being replaced, or `None` to create a new
    /// path. A mismatch fails with [`StoreError::Conflict`].
    async fn put(&self, path: &str, content: Bytes, message: &str, expected_sha: Option<&str>) -> Result<StoredObject>;

    /// Repository this store commits into.
    fn location(&self) -> &RepoLocation;

    /// Public raw-content URL for `path` in this store.
    fn raw_url(&self, path: &str) -> String;

    /// Create or replace `path`: probe its hash, then write carrying it.
    async fn upsert(&self, path: &str, content: Bytes, message: &str) -> Result<StoredObject> {
        let sha = self.current_sha(path).await?;
        match &sha {
            Some(sha) => tracing::debug!(path, sha = %sha, "Updating existing remote path"),
            None => tracing::debug!(path, "Creating new remote path"),
        }
        self.put(path, content, message, sha.as_deref()).await
    }
}

/// Build `{raw_base}/{owner}/{repo}/{branch}/{path}` with the owner, repo, branch and every path
/// segment percent-encoded the way browsers' `encodeURIComponent` does it.
pub fn build_raw_url(raw_base: &str, location: &RepoLocation, path: &str) -> String {
    let segments = path
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!(
        "{}/{}/{}/{}/{}",
        raw_base.trim_end_matches('/'),
        urlencoding::encode(&location.owner),
        urlencoding::encode(&location.repo),
        urlencoding::encode(&location.branch),
        segments
    )
}
