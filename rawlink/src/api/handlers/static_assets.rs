//! `GET /static/{*path}`: assets embedded from `static/`.

use axum::{
    extract::Path,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::instrument;

use crate::static_assets::Assets;

#[instrument]
pub async fn serve_asset(Path(path): Path<String>) -> Response {
    let Some(content) = Assets::get(&path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let mime = mime_guess::from_path(&path).first_or_octet_stream();

    (
        [
            (header::CONTENT_TYPE, mime.as_ref().to_string()),
            (header::CACHE_CONTROL, "public, max-age=604800".to_string()),
        ],
        content.data.into_owned(),
    )
        .into_response()
}
