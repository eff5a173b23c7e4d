//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The file path
//! defaults to `config.yaml` but can be set with `-f` or the `RAWLINK_CONFIG` environment variable.
//! A missing file is not an error: every option has a default except the target repository.
//!
//! ## Loading Priority
//!
//! Later sources override earlier ones:
//!
//! 1. **YAML config file**
//! 2. **`RAWLINK_` environment variables** - nested keys use double underscores, e.g.
//!    `RAWLINK_GITHUB__BRANCH=uploads` sets `github.branch`
//! 3. **Deployment shorthands** - `GH_TOKEN`, `GH_OWNER`, `GH_REPO`, `GH_BRANCH`, `BASE_URL` and
//!    `PORT`, so existing deployments keep working
//!
//! ## Example
//!
//! ```yaml
//! port: 3010
//! base_url: https://s.example.com
//! utc_offset: "+07:00"
//! mode: slug
//! github:
//!   owner: acme
//!   repo: uploads
//!   branch: main
//! map:
//!   mirror: true
//!   remote_path: db/urls.json
//! ```
//!
//! ```bash
//! GH_TOKEN=ghp_xxx rawlink -f config.yaml
//! ```

use chrono::FixedOffset;
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::errors::Error;
use crate::store::RepoLocation;

/// Upload size limit used when none is configured: 100 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "RAWLINK_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Which flavour of the service to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    /// Random slugs mapped to uploads through the slug map
    #[default]
    Slug,
    /// No slug map: the short URL is the remote filename itself
    Direct,
}

/// Main application configuration.
#[serde_as]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Public base URL; short links are `base_url + slug`
    pub base_url: String,
    /// Fixed UTC offset for synthesized filenames, commit messages and `createdAt`
    #[serde_as(as = "DisplayFromStr")]
    pub utc_offset: FixedOffset,
    pub mode: ServiceMode,
    /// Store slug-mode uploads under a per-type directory (`image/`, `docs/`, ...)
    pub bucket_by_extension: bool,
    /// Length of generated slugs
    pub slug_length: usize,
    /// Largest accepted upload in bytes
    pub max_file_size: u64,
    /// Answer cross-origin requests from any origin
    pub enable_cors: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
    /// Remote repository the uploads and the mirrored map are committed to
    pub github: GithubConfig,
    /// Slug map persistence
    pub map: MapConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GithubConfig {
    /// REST API base
    pub api_url: Url,
    /// Base of raw-content URLs handed to clients
    pub raw_url: Url,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    /// Access token; authorizes every remote call
    #[serde(skip_serializing)]
    pub token: Option<String>,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct MapConfig {
    /// Directory holding `urls.json`
    pub data_dir: PathBuf,
    /// Push the map to the remote store after every insert and restore it from there when the
    /// local copy is missing
    pub mirror: bool,
    /// Path of the mirrored map inside the repository
    pub remote_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3010,
            base_url: "http://localhost:3010/".to_string(),
            utc_offset: FixedOffset::east_opt(7 * 3600).expect("offset in range"),
            mode: ServiceMode::default(),
            bucket_by_extension: true,
            slug_length: 10,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            enable_cors: true,
            enable_otel_export: false,
            github: GithubConfig::default(),
            map: MapConfig::default(),
        }
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: Url::parse("https://api.github.com").expect("valid default url"),
            raw_url: Url::parse("https://raw.githubusercontent.com").expect("valid default url"),
            owner: String::new(),
            repo: String::new(),
            branch: "main".to_string(),
            token: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            mirror: false,
            remote_path: "db/urls.json".to_string(),
        }
    }
}

impl GithubConfig {
    pub fn location(&self) -> RepoLocation {
        RepoLocation {
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            branch: self.branch.clone(),
        }
    }
}

impl MapConfig {
    /// Local map file: `<data_dir>/urls.json`
    pub fn local_path(&self) -> PathBuf {
        self.data_dir.join("urls.json")
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;
        config.base_url = normalize_base_url(&config.base_url);
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.github.owner.trim().is_empty() || self.github.repo.trim().is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: github.owner and github.repo must be set (GH_OWNER / GH_REPO)".to_string(),
            });
        }

        if self.github.branch.trim().is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: github.branch cannot be empty".to_string(),
            });
        }

        match Url::parse(&self.base_url) {
            Ok(url) if !url.cannot_be_a_base() => {}
            _ => {
                return Err(Error::Internal {
                    operation: format!("Config validation: base_url '{}' is not an absolute URL", self.base_url),
                });
            }
        }

        if !(1..=64).contains(&self.slug_length) {
            return Err(Error::Internal {
                operation: format!("Config validation: slug_length must be between 1 and 64, got {}", self.slug_length),
            });
        }

        if self.max_file_size == 0 {
            return Err(Error::Internal {
                operation: "Config validation: max_file_size must be greater than zero".to_string(),
            });
        }

        if self.map.mirror && self.map.remote_path.trim_matches('/').is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: map.remote_path cannot be empty when map.mirror is enabled".to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            // RAWLINK_CONFIG names the file itself and is not a config key
            .merge(Env::prefixed("RAWLINK_").ignore(&["config"]).split("__"))
            .merge(Env::raw().only(&["BASE_URL", "PORT"]))
            .merge(
                Env::raw()
                    .only(&["GH_TOKEN", "GH_OWNER", "GH_REPO", "GH_BRANCH"])
                    .map(|key| format!("github.{}", key.as_str().to_lowercase().trim_start_matches("gh_")).into()),
            )
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Strip trailing slashes and add exactly one back.
fn normalize_base_url(base_url: &str) -> String {
    format!("{}/", base_url.trim_end_matches('/'))
}
