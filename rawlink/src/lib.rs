//! # rawlink: upload files into a GitHub repository, hand out short links to them
//!
//! A client posts a file to `/upload`. The bytes are committed to a configured repository through
//! the GitHub contents API, and the service answers with a short link. How that link resolves
//! depends on the [`ServiceMode`](config::ServiceMode):
//!
//! - **slug** (default): a random slug is minted and recorded in the slug map, a JSON file on
//!   local disk that can be mirrored into the repository itself. `GET /{slug}` renders a details
//!   page and `GET /{slug}/download` redirects to the raw file.
//! - **direct**: no state at all. The remote filename is the link, and `GET /{file}` redirects
//!   straight to its raw URL.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum). The remote side sits behind the
//! [`ContentStore`](store::ContentStore) trait: [`GithubContents`](store::GithubContents) in
//! production, an in-memory double in tests. The slug map is owned by
//! [`SlugStore`](slugs::SlugStore), which serialises writers with a mutex and replaces the file
//! atomically.
//!
//! Resolving a slug never touches the remote store; only uploads and map mirroring do.
//!
//! ## Configuration
//!
//! See [`config`]. The target repository (`github.owner`, `github.repo`) is the only thing that
//! has to be set; `GH_TOKEN` authorizes the commits.

pub mod api;
pub mod buckets;
pub mod config;
pub mod errors;
pub mod slugs;
mod static_assets;
pub mod store;
pub mod telemetry;
pub mod templates;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use api::handlers::{links, pages, static_assets as assets, uploads};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use bon::Builder;
pub use config::Config;
use config::ServiceMode;
use slugs::SlugStore;
use std::sync::Arc;
use store::{ContentStore, GithubContents};
use templates::Templates;
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, info};

/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Install the process-wide rustls provider. Safe to call more than once.
pub fn install_crypto_provider() {
    // Err only means a provider is already installed
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Shared state handed to every handler.
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub contents: Arc<dyn ContentStore>,
    /// Present in slug mode only
    pub slugs: Option<Arc<SlugStore>>,
    pub templates: Arc<Templates>,
}

/// Build the router for the configured mode.
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let body_limit = usize::try_from(state.config.max_file_size)?.saturating_add(MULTIPART_OVERHEAD);

    let upload = match state.config.mode {
        ServiceMode::Slug => post(uploads::upload_file),
        ServiceMode::Direct => post(uploads::upload_direct),
    };

    let router = Router::new()
        .route("/", get(pages::index))
        .route("/docs", get(pages::docs))
        .route("/healthz", get(pages::healthz))
        .route("/favicon.ico", get(links::favicon))
        .route("/static/{*path}", get(assets::serve_asset))
        .route("/upload", upload.layer(DefaultBodyLimit::max(body_limit)));

    let router = match state.config.mode {
        ServiceMode::Slug => router
            .route("/{slug}", get(links::view_slug))
            .route("/{slug}/download", get(links::download_slug)),
        ServiceMode::Direct => router
            .route("/{file}", get(links::redirect_file))
            .route("/{owner}/{repo}/{branch}/{file}", get(links::redirect_full)),
    };

    let mut router = router.with_state(state.clone());

    if state.config.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }

    Ok(router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    ))
}

pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Application committing to the GitHub repository named in `config`.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let contents: Arc<dyn ContentStore> = Arc::new(GithubContents::new(&config.github)?);
        Self::with_store(config, contents).await
    }

    /// Application on top of any content store. In slug mode the map is hydrated before
    /// returning.
    pub async fn with_store(config: Config, contents: Arc<dyn ContentStore>) -> anyhow::Result<Self> {
        let slugs = match config.mode {
            ServiceMode::Slug => {
                let path = config.map.local_path();
                let store = if config.map.mirror {
                    SlugStore::mirrored(path, contents.clone(), config.map.remote_path.clone())
                } else {
                    SlugStore::local(path)
                };
                store.hydrate().await?;
                Some(Arc::new(store))
            }
            ServiceMode::Direct => None,
        };

        let location = contents.location();
        info!(
            mode = ?config.mode,
            repository = %format!("{}/{}@{}", location.owner, location.repo, location.branch),
            mirror = config.map.mirror,
            "Application configured"
        );

        let state = AppState::builder()
            .config(config.clone())
            .contents(contents)
            .maybe_slugs(slugs)
            .templates(Arc::new(Templates::new()?))
            .build();
        let router = build_router(&state)?;

        Ok(Self { router, config })
    }

    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("rawlink listening on http://{}, links under {}", bind_addr, self.config.base_url);

        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::slugs::SlugMap;
    use crate::store::{InMemoryContents, RepoLocation, StoreError, StoredObject};
    use crate::test_utils::{TEST_BASE_URL, create_test_config, create_test_store, html_escaped, test_location};
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use axum_test::multipart::{MultipartForm, Part};
    use bytes::Bytes;
    use serde_json::Value;
    use tempfile::TempDir;

    async fn app_with(config: Config, store: Arc<InMemoryContents>) -> TestServer {
        Application::with_store(config, store).await.unwrap().into_test_server()
    }

    async fn slug_app() -> (TestServer, Arc<InMemoryContents>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = create_test_store();
        let server = app_with(create_test_config(dir.path()), store.clone()).await;
        (server, store, dir)
    }

    fn file_form(name: &str, mime: &str, bytes: &'static [u8]) -> MultipartForm {
        MultipartForm::new().add_part("file", Part::bytes(bytes).file_name(name).mime_type(mime))
    }

    async fn local_map(dir: &TempDir) -> SlugMap {
        SlugStore::local(dir.path().join("urls.json")).load().await
    }

    #[test_log::test(tokio::test)]
    async fn upload_png_lands_in_image_bucket_and_resolves() {
        let (server, store, dir) = slug_app().await;

        let response = server.post("/upload").multipart(file_form("a.PNG", "image/png", b"\x89PNG data")).await;
        response.assert_status_ok();
        let body: Value = response.json();

        let slug = body["slug"].as_str().unwrap();
        assert_eq!(slug.len(), 10);
        assert_eq!(body["link"], format!("{TEST_BASE_URL}{slug}"));

        let paths = store.paths();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].starts_with("image/"), "{}", paths[0]);
        assert!(paths[0].ends_with(".png"), "{}", paths[0]);
        assert!(!paths[0].contains(':'));

        let raw = body["raw"].as_str().unwrap();
        assert!(raw.starts_with("https://raw.githubusercontent.com/acme/uploads/main/image/"));
        assert!(raw.ends_with(&paths[0]));
        assert_eq!(store.fetch_raw(raw).unwrap(), Bytes::from_static(b"\x89PNG data"));
        assert_eq!(body["repo_url"], format!("https://github.com/acme/uploads/blob/main/{}", paths[0]));

        let record = local_map(&dir).await.remove(slug).unwrap();
        assert_eq!(record.name, "a.PNG");
        assert_eq!(record.mime, "image/png");
        assert_eq!(record.size, 9);
        assert_eq!(record.raw_url, raw);
        assert_eq!(record.created_at.offset().local_minus_utc(), 7 * 3600);
    }

    #[tokio::test]
    async fn view_and_download_read_only_the_local_map() {
        let (server, store, _dir) = slug_app().await;

        let body: Value = server
            .post("/upload")
            .multipart(file_form("notes.txt", "text/plain", b"hello"))
            .await
            .json();
        let slug = body["slug"].as_str().unwrap();
        let raw = body["raw"].as_str().unwrap();
        let calls = store.calls();

        let view = server.get(&format!("/{slug}")).await;
        view.assert_status_ok();
        assert_eq!(view.header("cache-control"), "public, max-age=60");
        let html = view.text();
        assert!(html.contains("notes.txt"));
        assert!(html.contains(&html_escaped(raw)));

        let download = server.get(&format!("/{slug}/download")).await;
        download.assert_status(StatusCode::FOUND);
        assert_eq!(download.header("location"), raw);
        assert_eq!(download.header("content-disposition"), "attachment; filename=\"notes.txt\"");

        assert_eq!(store.calls(), calls);
        assert_eq!(store.fetch_raw(raw).unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn download_encodes_filename() {
        let (server, _store, _dir) = slug_app().await;
        let body: Value = server
            .post("/upload")
            .multipart(file_form("my report.pdf", "application/pdf", b"%PDF"))
            .await
            .json();
        let slug = body["slug"].as_str().unwrap();

        let download = server.get(&format!("/{slug}/download")).await;
        assert_eq!(download.header("content-disposition"), "attachment; filename=\"my%20report.pdf\"");
    }

    #[tokio::test]
    async fn unknown_slug_is_404_without_remote_calls() {
        let (server, store, _dir) = slug_app().await;

        let view = server.get("/does-not-exist").await;
        view.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(view.text(), "not found");
        server.get("/does-not-exist/download").await.assert_status(StatusCode::NOT_FOUND);

        assert_eq!(store.calls(), 0);
    }

    /// Levels of every event emitted from this crate while the guard is held.
    #[derive(Clone, Default)]
    struct CrateEvents(Arc<std::sync::Mutex<Vec<tracing::Level>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for CrateEvents {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            if event.metadata().target().starts_with("rawlink") {
                self.0.lock().unwrap().push(*event.metadata().level());
            }
        }
    }

    #[tokio::test]
    async fn client_errors_are_not_logged_as_errors() {
        use tracing_subscriber::layer::SubscriberExt;

        let events = CrateEvents::default();
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(events.clone()));
        let (server, _store, _dir) = slug_app().await;

        server.get("/does-not-exist").await.assert_status(StatusCode::NOT_FOUND);
        server.get("/does-not-exist/download").await.assert_status(StatusCode::NOT_FOUND);
        server
            .post("/upload")
            .multipart(MultipartForm::new().add_text("note", "no file here"))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        let levels = events.0.lock().unwrap();
        assert!(levels.contains(&tracing::Level::DEBUG));
        assert!(!levels.contains(&tracing::Level::ERROR), "{levels:?}");
    }

    #[tokio::test]
    async fn missing_file_field_is_rejected() {
        let (server, store, dir) = slug_app().await;

        let response = server
            .post("/upload")
            .multipart(MultipartForm::new().add_text("note", "no file here"))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.text(), "empty file");

        assert_eq!(store.calls(), 0);
        assert!(local_map(&dir).await.is_empty());
    }

    #[tokio::test]
    async fn oversized_file_is_rejected_before_remote_write() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store();
        let mut config = create_test_config(dir.path());
        config.max_file_size = 8;
        let server = app_with(config, store.clone()).await;

        let response = server
            .post("/upload")
            .multipart(file_form("big.bin", "application/octet-stream", b"0123456789abcdef"))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn sequential_uploads_get_distinct_slugs() {
        let (server, store, dir) = slug_app().await;

        let first: Value = server
            .post("/upload")
            .multipart(file_form("one.txt", "text/plain", b"one"))
            .await
            .json();
        let second: Value = server
            .post("/upload")
            .multipart(file_form("two.csv", "text/csv", b"two"))
            .await
            .json();
        assert_ne!(first["slug"], second["slug"]);

        let map = local_map(&dir).await;
        assert_eq!(map.len(), 2);
        for (body, bytes) in [(&first, b"one"), (&second, b"two")] {
            let slug = body["slug"].as_str().unwrap();
            let record = &map[slug];
            assert_eq!(store.fetch_raw(&record.raw_url).unwrap(), Bytes::from_static(bytes));
            server.get(&format!("/{slug}")).await.assert_status_ok();
        }
    }

    #[tokio::test]
    async fn flat_layout_without_buckets() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store();
        let mut config = create_test_config(dir.path());
        config.bucket_by_extension = false;
        let server = app_with(config, store.clone()).await;

        server
            .post("/upload")
            .multipart(file_form("a.png", "image/png", b"png"))
            .await
            .assert_status_ok();
        let paths = store.paths();
        assert!(!paths[0].contains('/'), "{}", paths[0]);
    }

    /// Rejects every call the way GitHub does for a revoked token.
    struct Revoked(RepoLocation);

    #[async_trait]
    impl ContentStore for Revoked {
        async fn get(&self, _path: &str) -> store::Result<Option<Bytes>> {
            Err(self.rejection())
        }

        async fn current_sha(&self, _path: &str) -> store::Result<Option<String>> {
            Err(self.rejection())
        }

        async fn put(
            &self,
            _path: &str,
            _content: Bytes,
            _message: &str,
            _expected_sha: Option<&str>,
        ) -> store::Result<StoredObject> {
            Err(self.rejection())
        }

        fn location(&self) -> &RepoLocation {
            &self.0
        }

        fn raw_url(&self, path: &str) -> String {
            store::build_raw_url("https://raw.githubusercontent.com", &self.0, path)
        }
    }

    impl Revoked {
        fn rejection(&self) -> StoreError {
            StoreError::Unauthorized {
                status: 401,
                message: "Bad credentials".to_string(),
            }
        }
    }

    #[tokio::test]
    async fn remote_failure_is_500_and_leaves_map_untouched() {
        let dir = TempDir::new().unwrap();
        let server = Application::with_store(create_test_config(dir.path()), Arc::new(Revoked(test_location())))
            .await
            .unwrap()
            .into_test_server();

        let response = server.post("/upload").multipart(file_form("a.png", "image/png", b"png")).await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json();
        assert_eq!(body["error"], "upload_failed");
        assert!(body["detail"].as_str().unwrap().contains("Bad credentials"));

        assert!(local_map(&dir).await.is_empty());
    }

    #[tokio::test]
    async fn mirrored_map_is_restored_and_pushed() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store();
        store.insert(
            "db/urls.json",
            r#"{"seeded":{"rawUrl":"https://raw.githubusercontent.com/acme/uploads/main/files/x","mime":"text/plain","name":"x","size":1,"createdAt":"2025-01-01T00:00:00+07:00"}}"#,
        );
        let mut config = create_test_config(dir.path());
        config.map.mirror = true;
        let server = app_with(config, store.clone()).await;

        server.get("/seeded").await.assert_status_ok();

        let body: Value = server
            .post("/upload")
            .multipart(file_form("b.txt", "text/plain", b"b"))
            .await
            .json();
        let slug = body["slug"].as_str().unwrap();

        let remote: SlugMap = serde_json::from_slice(&store.peek("db/urls.json").unwrap()).unwrap();
        assert!(remote.contains_key("seeded"));
        assert!(remote.contains_key(slug));
    }

    #[tokio::test]
    async fn direct_mode_upload_and_redirects() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store();
        let mut config = create_test_config(dir.path());
        config.mode = ServiceMode::Direct;
        let server = app_with(config, store.clone()).await;

        let response = server.post("/upload").multipart(file_form("Photo.JPG", "image/jpeg", b"jpeg")).await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "File uploaded successfully");

        let paths = store.paths();
        assert_eq!(paths.len(), 1);
        let name = &paths[0];
        assert_eq!(name.len(), 10);
        assert!(name.ends_with(".JPG"));
        assert_eq!(store.peek(name).unwrap(), Bytes::from_static(b"jpeg"));

        assert_eq!(body["url_raw"], format!("https://raw.githubusercontent.com/acme/uploads/main/{name}"));
        assert_eq!(body["url_short"], format!("{TEST_BASE_URL}{name}"));
        assert_eq!(body["url_short_full"], format!("{TEST_BASE_URL}acme/uploads/main/{name}"));

        let short = server.get(&format!("/{name}")).await;
        short.assert_status(StatusCode::FOUND);
        assert_eq!(
            short.header("location"),
            format!("https://raw.githubusercontent.com/acme/uploads/main/{name}").as_str()
        );

        let full = server.get("/someone/else/dev/x%20y.txt").await;
        full.assert_status(StatusCode::FOUND);
        assert_eq!(full.header("location"), "https://raw.githubusercontent.com/someone/else/dev/x%20y.txt");

        assert!(!dir.path().join("urls.json").exists());
    }

    async fn direct_app() -> (TestServer, Arc<InMemoryContents>) {
        let dir = TempDir::new().unwrap();
        let mut config = create_test_config(dir.path());
        config.mode = ServiceMode::Direct;
        let store = create_test_store();
        (app_with(config, store.clone()).await, store)
    }

    #[tokio::test]
    async fn favicon_in_full_path_is_404_with_empty_body() {
        let (server, _store) = direct_app().await;

        let response = server.get("/acme/uploads/main/favicon.ico").await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert!(response.maybe_header("location").is_none());
        assert_eq!(response.text(), "");
    }

    #[tokio::test]
    async fn full_path_redirect_encodes_repository_segments() {
        let (server, _store) = direct_app().await;

        let response = server.get("/a%0Ab/uploads/main/x.txt").await;
        response.assert_status(StatusCode::FOUND);
        assert_eq!(response.header("location"), "https://raw.githubusercontent.com/a%0Ab/uploads/main/x.txt");
    }

    /// Accepts uploads but refuses every write to the mirrored map.
    struct MirrorRefused {
        inner: Arc<InMemoryContents>,
        remote_path: String,
    }

    #[async_trait]
    impl ContentStore for MirrorRefused {
        async fn get(&self, path: &str) -> store::Result<Option<Bytes>> {
            self.inner.get(path).await
        }

        async fn current_sha(&self, path: &str) -> store::Result<Option<String>> {
            self.inner.current_sha(path).await
        }

        async fn put(
            &self,
            path: &str,
            content: Bytes,
            message: &str,
            expected_sha: Option<&str>,
        ) -> store::Result<StoredObject> {
            if path == self.remote_path {
                return Err(StoreError::Api {
                    status: 502,
                    message: "Server Error".to_string(),
                });
            }
            self.inner.put(path, content, message, expected_sha).await
        }

        fn location(&self) -> &RepoLocation {
            self.inner.location()
        }

        fn raw_url(&self, path: &str) -> String {
            self.inner.raw_url(path)
        }
    }

    #[tokio::test]
    async fn mirror_failure_keeps_slug_resolvable_locally() {
        let dir = TempDir::new().unwrap();
        let mut config = create_test_config(dir.path());
        config.map.mirror = true;
        let inner = create_test_store();
        let contents = MirrorRefused {
            inner: inner.clone(),
            remote_path: config.map.remote_path.clone(),
        };
        let server = Application::with_store(config, Arc::new(contents))
            .await
            .unwrap()
            .into_test_server();

        let response = server.post("/upload").multipart(file_form("c.txt", "text/plain", b"c")).await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json();
        assert_eq!(body["error"], "upload_failed");

        let map = local_map(&dir).await;
        assert_eq!(map.len(), 1);
        let (slug, record) = map.iter().next().unwrap();
        assert_eq!(inner.fetch_raw(&record.raw_url).unwrap(), Bytes::from_static(b"c"));
        server.get(&format!("/{slug}")).await.assert_status_ok();
        assert!(inner.peek("db/urls.json").is_none());
    }

    #[tokio::test]
    async fn favicon_is_404_in_both_modes() {
        let (server, _store, _dir) = slug_app().await;
        server.get("/favicon.ico").await.assert_status(StatusCode::NOT_FOUND);

        let dir = TempDir::new().unwrap();
        let mut config = create_test_config(dir.path());
        config.mode = ServiceMode::Direct;
        let store = create_test_store();
        let server = app_with(config, store.clone()).await;
        server.get("/favicon.ico").await.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn pages_render() {
        let (server, _store, _dir) = slug_app().await;

        let index = server.get("/").await;
        index.assert_status_ok();
        assert!(index.text().contains("action=\"/upload\""));

        let docs = server.get("/docs").await;
        docs.assert_status_ok();
        let docs = docs.text();
        assert!(docs.contains(&html_escaped(TEST_BASE_URL)));
        assert!(docs.contains("image/"));
        assert!(docs.contains(".webp"));
        assert!(docs.contains("UTC+07:00"));

        let health = server.get("/healthz").await;
        health.assert_status_ok();
        assert_eq!(health.text(), "OK");

        server.get("/static/upload.js").await.assert_status_ok();
    }
}
