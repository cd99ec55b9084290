//! Development strategy: template and module requests go to the front-end
//! dev server, which transforms them from current sources.
//!
//! The connection to the dev server is created lazily on first use and then
//! shared for the life of the process.

use crate::assets::{Asset, AssetError, AssetSource};
use crate::dispatch::Route;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{header, HeaderName, Method, StatusCode};
use axum::response::Response;
use std::path::Path;
use tokio::sync::OnceCell;
use url::Url;

/// Response headers that describe the upstream connection, not the payload.
const HOP_BY_HOP: [HeaderName; 3] = [
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Requests the dev server answers before the dispatcher sees them: its own
/// endpoints, source modules, and anything that looks like a file other
/// than an HTML page. Paths the dispatcher routes itself (redirects,
/// robots.txt, news pages) never go to the dev server.
pub fn is_dev_asset_path(path: &str) -> bool {
    if Route::classify(path) != Route::Shell {
        return false;
    }
    if path.starts_with("/@") || path.starts_with("/src/") || path.starts_with("/node_modules/") {
        return true;
    }
    matches!(
        Path::new(path).extension().and_then(|ext| ext.to_str()),
        Some(ext) if ext != "html"
    )
}

/// Ready handle to the dev server.
#[derive(Debug)]
struct DevServer {
    origin: Url,
    client: reqwest::Client,
}

impl DevServer {
    async fn connect(origin: &Url) -> Result<Self, AssetError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AssetError::DevServer(format!("failed to create HTTP client: {e}")))?;

        // Fail here rather than on every request if nothing is listening.
        client
            .get(origin.clone())
            .send()
            .await
            .map_err(|e| AssetError::DevServer(format!("{origin} is not reachable: {e}")))?;

        tracing::info!(%origin, "connected to dev server");
        Ok(Self {
            origin: origin.clone(),
            client,
        })
    }

    fn url_for(&self, path_and_query: &str) -> Result<Url, AssetError> {
        self.origin
            .join(path_and_query)
            .map_err(|e| AssetError::DevServer(format!("invalid path {path_and_query}: {e}")))
    }

    async fn transformed_template(&self) -> Result<String, AssetError> {
        let url = self.url_for("/index.html")?;
        let response = self
            .client
            .get(url.clone())
            .header(header::ACCEPT, "text/html")
            .send()
            .await
            .map_err(|e| AssetError::DevServer(format!("GET {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AssetError::DevServer(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }
        response
            .text()
            .await
            .map_err(|e| AssetError::DevServer(format!("failed to read {url}: {e}")))
    }

    /// Forward a GET/HEAD to the dev server, streaming its answer back.
    /// `None` when the dev server has nothing for this path.
    async fn proxy(&self, parts: &Parts) -> Result<Option<Response>, AssetError> {
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| parts.uri.path());
        let url = self.url_for(path_and_query)?;

        let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
            .map_err(|e| AssetError::DevServer(format!("unsupported method: {e}")))?;
        let mut builder = self.client.request(method, url.clone());
        for (key, value) in &parts.headers {
            if *key != header::HOST {
                builder = builder.header(key.as_str(), value.as_bytes());
            }
        }

        let upstream = builder
            .send()
            .await
            .map_err(|e| AssetError::DevServer(format!("proxying {url} failed: {e}")))?;
        if upstream.status().as_u16() == StatusCode::NOT_FOUND.as_u16() {
            return Ok(None);
        }

        let status = StatusCode::from_u16(upstream.status().as_u16())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = Response::builder().status(status);
        for (key, value) in upstream.headers() {
            if !HOP_BY_HOP.iter().any(|h| h.as_str() == key.as_str()) {
                response = response.header(key.as_str(), value.as_bytes());
            }
        }

        let body = Body::from_stream(upstream.bytes_stream());
        response
            .body(body)
            .map(Some)
            .map_err(|e| AssetError::DevServer(format!("invalid upstream response: {e}")))
    }
}

/// [`AssetSource`] backed by the front-end dev server.
#[derive(Debug)]
pub struct DevAssets {
    origin: Url,
    server: OnceCell<DevServer>,
}

impl DevAssets {
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            server: OnceCell::new(),
        }
    }

    /// Whether the dev server connection has been established yet.
    pub fn is_ready(&self) -> bool {
        self.server.initialized()
    }

    /// Concurrent first requests wait on the same initialization; a failed
    /// attempt leaves the cell empty so the next request tries again.
    async fn server(&self) -> Result<&DevServer, AssetError> {
        self.server
            .get_or_try_init(|| DevServer::connect(&self.origin))
            .await
    }
}

#[async_trait]
impl AssetSource for DevAssets {
    async fn template(&self, _url: &str) -> Result<String, AssetError> {
        self.server().await?.transformed_template().await
    }

    async fn static_asset(&self, _path: &str) -> Result<Option<Asset>, AssetError> {
        Ok(None)
    }

    async fn intercept(&self, parts: &Parts) -> Result<Option<Response>, AssetError> {
        let navigable = parts.method == Method::GET || parts.method == Method::HEAD;
        if !navigable || !is_dev_asset_path(parts.uri.path()) {
            return Ok(None);
        }
        self.server().await?.proxy(parts).await
    }
}
