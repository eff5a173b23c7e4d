//! `POST /upload`: stream the multipart `file` field, commit it to the remote store, and hand
//! back links to it.

use axum::{
    Json,
    extract::{Multipart, State},
};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, FixedOffset, Utc};
use nanoid::nanoid;
use serde::Serialize;
use std::path::Path;
use tracing::{error, info, instrument};

use crate::{
    AppState,
    buckets::{Bucket, extension_of},
    errors::{Error, Result},
    slugs::UploadRecord,
};

/// Alphabet for direct-mode filenames.
const LOWER_ALNUM: [char; 36] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x',
    'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

const DIRECT_NAME_LENGTH: usize = 6;

/// The `file` part of an upload, fully buffered.
#[derive(Debug)]
pub struct UploadedFile {
    /// Client filename, `"file"` when none was sent
    pub name: String,
    /// Declared content type, if any
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl UploadedFile {
    /// Declared type, else a guess from the extension, else octet-stream.
    pub fn mime(&self) -> String {
        match &self.content_type {
            Some(declared) if !declared.is_empty() => declared.clone(),
            _ => mime_guess::from_path(&self.name).first_or_octet_stream().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub slug: String,
    pub link: String,
    pub raw: String,
    pub repo_url: String,
}

#[derive(Debug, Serialize)]
pub struct DirectUploadResponse {
    pub success: bool,
    pub message: String,
    pub url_raw: String,
    pub url_short: String,
    pub url_short_full: String,
}

/// Read the `file` field, enforcing `max_file_size` chunk by chunk. Other fields are skipped.
///
/// A part with neither a filename nor any bytes counts as no file at all, which is what browsers
/// send for an empty file input.
pub async fn read_file_field(multipart: &mut Multipart, max_file_size: u64) -> Result<UploadedFile> {
    while let Some(mut field) = multipart.next_field().await.map_err(|e| Error::BadRequest {
        message: format!("Failed to parse multipart data: {}", e),
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().map(str::to_string).filter(|name| !name.is_empty());
        let content_type = field.content_type().map(str::to_string);

        let mut buffer = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| Error::BadRequest {
            message: format!("Failed to read file chunk: {}", e),
        })? {
            if (buffer.len() + chunk.len()) as u64 > max_file_size {
                tracing::warn!(
                    filename = ?file_name,
                    received = buffer.len() + chunk.len(),
                    max_file_size,
                    "File size limit exceeded, aborting upload"
                );
                return Err(Error::BadRequest {
                    message: format!("file exceeds the {} byte limit", max_file_size),
                });
            }
            buffer.extend_from_slice(&chunk);
        }

        if file_name.is_none() && buffer.is_empty() {
            break;
        }

        return Ok(UploadedFile {
            name: file_name.unwrap_or_else(|| "file".to_string()),
            content_type,
            bytes: buffer.freeze(),
        });
    }

    Err(Error::BadRequest {
        message: "empty file".to_string(),
    })
}

/// Remote filename for a slug-mode upload: the local timestamp, lowercased, plus `ext`.
///
/// `12-march-2025~09-05-07-042.png`. No colons, so the name is safe in any path.
pub fn timestamped_filename(now: &DateTime<FixedOffset>, ext: &str) -> String {
    format!("{}{}", now.format("%d-%B-%Y~%H-%M-%S-%3f").to_string().to_lowercase(), ext)
}

/// Original extension with its case kept, including the dot.
fn original_extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

#[instrument(skip_all)]
pub async fn upload_file(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<UploadResponse>> {
    let slugs = state.slugs.as_ref().ok_or_else(|| Error::Internal {
        operation: "upload: slug map is not configured".to_string(),
    })?;

    let file = read_file_field(&mut multipart, state.config.max_file_size).await?;
    let mime = file.mime();
    let size = file.bytes.len() as u64;

    let now = Utc::now().with_timezone(&state.config.utc_offset);
    let ext = extension_of(&file.name);
    let filename = timestamped_filename(&now, &ext);
    let path = if state.config.bucket_by_extension {
        format!("{}/{}", Bucket::from_extension(&ext), filename)
    } else {
        filename.clone()
    };
    let message = format!("upload {} @ {}", filename, now.format("%Y-%m-%d %H:%M:%S"));

    info!(name = %file.name, path = %path, size, mime = %mime, "Uploading file");
    let stored = state.contents.upsert(&path, file.bytes, &message).await?;
    let raw = state.contents.raw_url(&stored.path);

    let slug_length = state.config.slug_length;
    let slug = nanoid!(slug_length);
    let record = UploadRecord {
        raw_url: raw.clone(),
        html_url: stored.html_url.clone(),
        mime,
        name: file.name,
        size,
        created_at: now,
    };

    if let Err(e) = slugs.insert(&slug, record).await {
        // A failed mirror push happens after the local write, so the slug may already resolve
        if slugs.get(&slug).await.is_some() {
            error!(path = %stored.path, slug = %slug, "Slug map mirror push failed; slug resolves locally");
        } else {
            error!(path = %stored.path, slug = %slug, "Remote file orphaned: slug map update failed");
        }
        return Err(e);
    }

    info!(slug = %slug, path = %stored.path, "Upload stored");
    Ok(Json(UploadResponse {
        link: format!("{}{}", state.config.base_url, slug),
        slug,
        raw,
        repo_url: stored.html_url,
    }))
}

/// Direct mode: store at the repository root under a short random name; the name is the link.
#[instrument(skip_all)]
pub async fn upload_direct(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<DirectUploadResponse>> {
    let file = read_file_field(&mut multipart, state.config.max_file_size).await?;

    let filename = format!("{}{}", nanoid!(DIRECT_NAME_LENGTH, &LOWER_ALNUM), original_extension(&file.name));
    let message = format!("Upload {}", file.name);

    info!(name = %file.name, path = %filename, size = file.bytes.len(), "Uploading file");
    let stored = state.contents.upsert(&filename, file.bytes, &message).await?;

    let encoded = urlencoding::encode(&filename);
    let location = state.contents.location();
    Ok(Json(DirectUploadResponse {
        success: true,
        message: "File uploaded successfully".to_string(),
        url_raw: state.contents.raw_url(&stored.path),
        url_short: format!("{}{}", state.config.base_url, encoded),
        url_short_full: format!(
            "{}{}/{}/{}/{}",
            state.config.base_url, location.owner, location.repo, location.branch, encoded
        ),
    }))
}
