//! GitHub repository contents API client.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, StatusCode, header};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use super::{ContentStore, RepoLocation, StoredObject, build_raw_url};
use super::errors::{Result, StoreError};
use crate::config::GithubConfig;

const API_VERSION: &str = "2022-11-28";
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw";

/// Contents API client bound to one repository and branch.
pub struct GithubContents {
    client: Client,
    api_url: Url,
    raw_url: String,
    location: RepoLocation,
    token: Option<String>,
}

#[derive(Serialize)]
struct PutContentsRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Deserialize)]
struct PutContentsResponse {
    content: ContentEntry,
}

#[derive(Deserialize)]
struct ContentEntry {
    path: String,
    sha: String,
    #[serde(default)]
    html_url: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

impl GithubContents {
    pub fn new(config: &GithubConfig) -> anyhow::Result<Self> {
        crate::install_crypto_provider();

        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("rawlink/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            raw_url: config.raw_url.to_string(),
            location: config.location(),
            token: config.token.clone(),
        })
    }

    /// `{api}/repos/{owner}/{repo}/contents/{path}?ref={branch}`
    fn contents_url(&self, path: &str) -> Result<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Other(anyhow::anyhow!("API url {} cannot be a base", self.api_url)))?
            .pop_if_empty()
            .extend(["repos", self.location.owner.as_str(), self.location.repo.as_str(), "contents"])
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("X-GitHub-Api-Version", API_VERSION);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// GET the contents endpoint with the given media type. `None` on 404.
    async fn fetch(&self, path: &str, accept: &str) -> Result<Option<Response>> {
        let mut url = self.contents_url(path)?;
        url.query_pairs_mut().append_pair("ref", &self.location.branch);

        let response = self
            .authorize(self.client.get(url))
            .header(header::ACCEPT, accept)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        check_status(path, response).await.map(Some)
    }
}

/// Turn non-success statuses into the matching [`StoreError`].
async fn check_status(path: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|parsed| parsed.message)
        .unwrap_or(body);
    tracing::warn!(path, status = status.as_u16(), message = %message, "Content store request failed");

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Unauthorized {
            status: status.as_u16(),
            message,
        },
        StatusCode::CONFLICT => StoreError::Conflict {
            path: path.to_string(),
            message,
        },
        // GitHub answers a missing or stale `sha` with 422 rather than 409
        StatusCode::UNPROCESSABLE_ENTITY if message.contains("sha") => StoreError::Conflict {
            path: path.to_string(),
            message,
        },
        _ => StoreError::Api {
            status: status.as_u16(),
            message,
        },
    })
}

#[async_trait]
impl ContentStore for GithubContents {
    #[instrument(skip(self))]
    async fn get(&self, path: &str) -> Result<Option<Bytes>> {
        match self.fetch(path, RAW_MEDIA_TYPE).await? {
            Some(response) => {
                let bytes = response.bytes().await?;
                debug!(len = bytes.len(), "Fetched remote content");
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn current_sha(&self, path: &str) -> Result<Option<String>> {
        let Some(response) = self.fetch(path, JSON_MEDIA_TYPE).await? else {
            return Ok(None);
        };

        // Directories come back as arrays and have no sha of their own
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(format!("contents metadata for {path}: {e}")))?;
        Ok(body.get("sha").and_then(|sha| sha.as_str()).map(str::to_string))
    }

    #[instrument(skip(self, content), fields(len = content.len()))]
    async fn put(&self, path: &str, content: Bytes, message: &str, expected_sha: Option<&str>) -> Result<StoredObject> {
        let url = self.contents_url(path)?;
        let body = PutContentsRequest {
            message,
            content: BASE64_STANDARD.encode(&content),
            branch: &self.location.branch,
            sha: expected_sha,
        };

        let response = self
            .authorize(self.client.put(url))
            .header(header::ACCEPT, JSON_MEDIA_TYPE)
            .json(&body)
            .send()
            .await?;
        let response = check_status(path, response).await?;

        let parsed: PutContentsResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(format!("write response for {path}: {e}")))?;

        debug!(path = %parsed.content.path, sha = %parsed.content.sha, "Committed remote content");
        Ok(StoredObject {
            path: parsed.content.path,
            html_url: parsed.content.html_url.unwrap_or_default(),
            sha: parsed.content.sha,
        })
    }

    fn location(&self) -> &RepoLocation {
        &self.location
    }

    fn raw_url(&self, path: &str) -> String {
        build_raw_url(&self.raw_url, &self.location, path)
    }
}
