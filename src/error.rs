//! Request-level failures and how they reach the client.

use crate::assets::AssetError;
use crate::config::Mode;
use crate::template::TemplateError;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("render failed: {0:#}")]
    Render(anyhow::Error),
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    #[error("asset error: {0}")]
    Asset(#[from] AssetError),
    #[error("refusing to embed initial data: {0:#}")]
    UnsafePayload(anyhow::Error),
    #[error("renderer redirected to an invalid location {0:?}")]
    InvalidRedirect(String),
}

impl ServerError {
    /// HTTP 500. The body carries the error detail in development and only
    /// the reason phrase in production.
    pub fn into_response_for(self, mode: Mode) -> Response {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        let body = if mode.is_production() {
            status.canonical_reason().unwrap_or("Internal Server Error").to_string()
        } else {
            self.to_string()
        };
        (status, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    async fn body_of(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn detail_only_in_development() {
        let err = || ServerError::Render(anyhow!("fetch failed").context("loading /post/5"));

        let dev = err().into_response_for(Mode::Development);
        assert_eq!(dev.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_of(dev).await, "render failed: loading /post/5: fetch failed");

        let prod = err().into_response_for(Mode::Production);
        assert_eq!(prod.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_of(prod).await, "Internal Server Error");
    }

    #[test]
    fn render_error_keeps_cause_chain() {
        let err = ServerError::Render(anyhow!("connection refused").context("fetch /api/posts/5"));
        assert_eq!(
            err.to_string(),
            "render failed: fetch /api/posts/5: connection refused"
        );
    }
}
