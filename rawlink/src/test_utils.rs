//! Test utilities (available with the `test-utils` feature).

use std::path::Path;
use std::sync::Arc;

use crate::config::{Config, GithubConfig, MapConfig};
use crate::store::{InMemoryContents, RepoLocation};

pub const TEST_BASE_URL: &str = "https://s.example/";

pub fn test_location() -> RepoLocation {
    RepoLocation {
        owner: "acme".to_string(),
        repo: "uploads".to_string(),
        branch: "main".to_string(),
    }
}

/// Slug-mode config for the `acme/uploads` test repository, keeping the map under `data_dir`.
pub fn create_test_config(data_dir: &Path) -> Config {
    let location = test_location();
    Config {
        base_url: TEST_BASE_URL.to_string(),
        github: GithubConfig {
            owner: location.owner,
            repo: location.repo,
            branch: location.branch,
            ..Default::default()
        },
        map: MapConfig {
            data_dir: data_dir.to_path_buf(),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn create_test_store() -> Arc<InMemoryContents> {
    Arc::new(InMemoryContents::new(test_location()))
}

/// `value` as minijinja's HTML auto-escaping writes it into `.html` templates.
pub fn html_escaped(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
        .replace('/', "&#x2f;")
}
