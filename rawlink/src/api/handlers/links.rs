//! Link resolution. Slug routes read the local map only; direct-mode routes compute the raw URL
//! from the path. Neither calls the remote store.

use axum::{
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use minijinja::context;
use tracing::{debug, instrument};

use crate::{
    AppState,
    errors::{Error, Result},
    slugs::UploadRecord,
    store::{RepoLocation, build_raw_url},
};

/// 302 to `target`.
fn found(target: &str) -> Result<Response> {
    let location = HeaderValue::from_str(target).map_err(|e| Error::Internal {
        operation: format!("build redirect to {target}: {e}"),
    })?;
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

async fn lookup(state: &AppState, slug: &str) -> Result<UploadRecord> {
    let not_found = || Error::NotFound {
        resource: "slug".to_string(),
        id: slug.to_string(),
    };
    let slugs = state.slugs.as_ref().ok_or_else(not_found)?;
    slugs.get(slug).await.ok_or_else(not_found)
}

#[instrument(skip(state))]
pub async fn view_slug(State(state): State<AppState>, Path(slug): Path<String>) -> Result<Response> {
    let rec = lookup(&state, &slug).await?;
    let Html(body) = state.templates.render(
        "view.html",
        context! {
            link => format!("{}{}", state.config.base_url, slug),
            is_image => rec.mime.starts_with("image/"),
            rec => rec,
            slug => slug,
        },
    )?;

    Ok(([(header::CACHE_CONTROL, "public, max-age=60")], Html(body)).into_response())
}

#[instrument(skip(state))]
pub async fn download_slug(State(state): State<AppState>, Path(slug): Path<String>) -> Result<Response> {
    let rec = lookup(&state, &slug).await?;
    let disposition = format!("attachment; filename=\"{}\"", urlencoding::encode(&rec.name));
    let disposition = HeaderValue::from_str(&disposition).map_err(|e| Error::Internal {
        operation: format!("build content disposition for {slug}: {e}"),
    })?;

    let mut response = found(&rec.raw_url)?;
    response.headers_mut().insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

/// Direct mode: `/{file}` in the configured repository.
#[instrument(skip(state))]
pub async fn redirect_file(State(state): State<AppState>, Path(file): Path<String>) -> Result<Response> {
    let target = state.contents.raw_url(&file);
    debug!(file = %file, target = %target, "Redirecting to raw file");
    found(&target)
}

/// Direct mode: `/{owner}/{repo}/{branch}/{file}` in any repository.
#[instrument(skip(state))]
pub async fn redirect_full(
    State(state): State<AppState>,
    Path((owner, repo, branch, file)): Path<(String, String, String, String)>,
) -> Result<Response> {
    if file == "favicon.ico" {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    let location = RepoLocation { owner, repo, branch };
    let target = build_raw_url(state.config.github.raw_url.as_str(), &location, &file);
    debug!(target = %target, "Redirecting to raw file");
    found(&target)
}

/// Registered explicitly so `/favicon.ico` never reaches the slug or file routes.
pub async fn favicon() -> StatusCode {
    StatusCode::NOT_FOUND
}
