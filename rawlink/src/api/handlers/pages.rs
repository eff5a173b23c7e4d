//! HTML pages and the health check.

use axum::{extract::State, response::Html};
use minijinja::context;
use serde::Serialize;

use crate::{AppState, buckets::EXTENSION_TABLE, errors::Result};

#[derive(Serialize)]
struct BucketRow {
    name: &'static str,
    extensions: &'static [&'static str],
}

pub async fn index(State(state): State<AppState>) -> Result<Html<String>> {
    state.templates.render(
        "index.html",
        context! {
            base_url => state.config.base_url,
            max_file_size => state.config.max_file_size,
        },
    )
}

pub async fn docs(State(state): State<AppState>) -> Result<Html<String>> {
    let buckets: Vec<BucketRow> = EXTENSION_TABLE
        .iter()
        .map(|(bucket, extensions)| BucketRow {
            name: bucket.as_str(),
            extensions,
        })
        .collect();

    let config = &state.config;
    state.templates.render(
        "docs.html",
        context! {
            mode => config.mode,
            base_url => config.base_url,
            bucket_by_extension => config.bucket_by_extension,
            buckets => buckets,
            utc_offset => config.utc_offset.to_string(),
            port => config.port,
            max_file_size => config.max_file_size,
        },
    )
}

pub async fn healthz() -> &'static str {
    "OK"
}
