//! HTTP surface.
//!
//! Routes depend on the configured [`ServiceMode`](crate::config::ServiceMode):
//!
//! - **Both**: `GET /`, `GET /docs`, `GET /static/{*path}`, `GET /healthz`, `POST /upload`
//! - **Slug**: `GET /{slug}`, `GET /{slug}/download`
//! - **Direct**: `GET /{file}`, `GET /{owner}/{repo}/{branch}/{file}`

pub mod handlers;
