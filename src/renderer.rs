//! The contract between the dispatcher and the application's renderer.

use async_trait::async_trait;
use axum::http::{header, HeaderMap, Uri};
use serde::Deserialize;

/// Scheme the client used to reach us, as far as the proxy in front tells us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

/// Per-request view of an inbound request. Dropped once the response is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Path plus query, as received (`/cari?q=pemilu`).
    pub raw_url: String,
    pub host: String,
    pub protocol: Protocol,
}

impl RequestContext {
    pub fn new(raw_url: impl Into<String>, host: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            raw_url: raw_url.into(),
            host: host.into(),
            protocol,
        }
    }

    pub fn from_request(uri: &Uri, headers: &HeaderMap) -> Self {
        let raw_url = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| uri.authority().map(|a| a.to_string()))
            .unwrap_or_else(|| "localhost".to_string());

        let forwarded_https = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"));
        let protocol = if forwarded_https || uri.scheme_str() == Some("https") {
            Protocol::Https
        } else {
            Protocol::Http
        };

        Self {
            raw_url,
            host,
            protocol,
        }
    }

    /// Request path without query or fragment.
    pub fn path(&self) -> &str {
        let end = self
            .raw_url
            .find(|c| c == '?' || c == '#')
            .unwrap_or(self.raw_url.len());
        &self.raw_url[..end]
    }

    /// Absolute URL of the request.
    pub fn href(&self) -> String {
        format!("{}://{}{}", self.protocol.as_str(), self.host, self.raw_url)
    }
}

/// What the renderer decided for a URL.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RenderResult {
    Redirect {
        to: String,
    },
    Rendered {
        #[serde(rename = "appHtml", default)]
        app_html: String,
        #[serde(rename = "headHtml", default)]
        head_html: String,
        #[serde(rename = "initialData", default)]
        initial_data: serde_json::Value,
    },
}

/// Produces page fragments for SEO routes.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, ctx: &RequestContext) -> anyhow::Result<RenderResult>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    #[test]
    fn test_context_from_proxied_request() {
        let uri: Uri = "/cari?q=pemilu".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("chrononews.id"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https, http"));

        let ctx = RequestContext::from_request(&uri, &headers);
        assert_eq!(ctx.raw_url, "/cari?q=pemilu");
        assert_eq!(ctx.path(), "/cari");
        assert_eq!(ctx.protocol, Protocol::Https);
        assert_eq!(ctx.href(), "https://chrononews.id/cari?q=pemilu");
    }

    #[test]
    fn test_context_defaults() {
        let uri: Uri = "/post/5".parse().unwrap();
        let ctx = RequestContext::from_request(&uri, &HeaderMap::new());
        assert_eq!(ctx.host, "localhost");
        assert_eq!(ctx.protocol, Protocol::Http);
        assert_eq!(ctx.path(), "/post/5");
    }

    #[test]
    fn test_render_result_from_sandbox_json() {
        let rendered: RenderResult = serde_json::from_value(json!({
            "kind": "rendered",
            "appHtml": "<main>Berita</main>",
            "headHtml": "<title>Berita</title>",
            "initialData": {"posts": []}
        }))
        .unwrap();
        assert_eq!(
            rendered,
            RenderResult::Rendered {
                app_html: "<main>Berita</main>".into(),
                head_html: "<title>Berita</title>".into(),
                initial_data: json!({"posts": []}),
            }
        );

        let redirect: RenderResult =
            serde_json::from_value(json!({"kind": "redirect", "to": "/berita"})).unwrap();
        assert_eq!(redirect, RenderResult::Redirect { to: "/berita".into() });
    }

    #[test]
    fn test_render_result_missing_fragments() {
        let rendered: RenderResult = serde_json::from_value(json!({"kind": "rendered"})).unwrap();
        assert_eq!(
            rendered,
            RenderResult::Rendered {
                app_html: String::new(),
                head_html: String::new(),
                initial_data: serde_json::Value::Null,
            }
        );
    }
}
