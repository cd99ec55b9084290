//! Request dispatch: redirects, robots.txt, server-rendered news pages and
//! the SPA shell for everything else.

use crate::assets::{Asset, AssetSource};
use crate::error::ServerError;
use crate::renderer::{RenderResult, Renderer, RequestContext};
use crate::sanitize::check_initial_data;
use crate::template::{apply_site_verification, compose, Slots, Template};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use url::{Position, Url};

/// Where `/` and `/beranda` send visitors.
pub const NEWS_INDEX: &str = "/berita";

/// Path prefixes whose content must be in the initial HTML for indexing.
const SEO_PREFIXES: [&str; 3] = ["/post/", "/berita", "/cari"];

/// Site-level settings that shape responses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteConfig {
    /// Public base URI without trailing slash
    pub base_uri: Option<String>,
    pub site_verification: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// `/` and `/beranda`
    Home,
    Robots,
    /// Server-rendered news pages
    Seo,
    /// Static asset or SPA shell
    Shell,
}

impl Route {
    pub fn classify(path: &str) -> Self {
        match path {
            "/" | "/beranda" => Route::Home,
            "/robots.txt" => Route::Robots,
            p if SEO_PREFIXES.iter().any(|prefix| p.starts_with(prefix)) => Route::Seo,
            _ => Route::Shell,
        }
    }
}

/// A dispatch decision, ready to become a response.
#[derive(Debug)]
pub enum Outcome {
    Redirect(HeaderValue),
    Robots(String),
    Page(String),
    Asset(Asset),
}

impl IntoResponse for Outcome {
    fn into_response(self) -> Response {
        match self {
            Outcome::Redirect(location) => {
                (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
            }
            Outcome::Robots(body) => ([(header::CONTENT_TYPE, "text/plain")], body).into_response(),
            Outcome::Page(html) => ([(header::CONTENT_TYPE, "text/html")], html).into_response(),
            Outcome::Asset(asset) => {
                ([(header::CONTENT_TYPE, asset.content_type)], asset.content).into_response()
            }
        }
    }
}

/// Build a `Location` value for a renderer redirect, percent-encoding
/// anything a header cannot carry (`/cari?q=kébab`). Relative targets keep
/// only their path, query and fragment.
fn location_header(to: &str) -> Option<HeaderValue> {
    let encoded = match Url::parse(to) {
        Ok(absolute) => absolute.to_string(),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let resolved = Url::parse("http://localhost").ok()?.join(to).ok()?;
            resolved[Position::BeforePath..].to_string()
        }
        Err(_) => return None,
    };
    HeaderValue::try_from(encoded).ok()
}

pub struct Dispatcher {
    renderer: Arc<dyn Renderer>,
    assets: Arc<dyn AssetSource>,
    site: SiteConfig,
}

impl Dispatcher {
    pub fn new(renderer: Arc<dyn Renderer>, assets: Arc<dyn AssetSource>, site: SiteConfig) -> Self {
        Self {
            renderer,
            assets,
            site,
        }
    }

    pub async fn dispatch(&self, ctx: &RequestContext) -> Result<Outcome, ServerError> {
        let route = Route::classify(ctx.path());
        tracing::debug!(url = %ctx.raw_url, ?route, "dispatching");

        match route {
            Route::Home => Ok(Outcome::Redirect(HeaderValue::from_static(NEWS_INDEX))),
            Route::Robots => Ok(Outcome::Robots(self.robots_txt())),
            Route::Seo => self.render_page(ctx).await,
            Route::Shell => self.serve_shell(ctx).await,
        }
    }

    pub fn robots_txt(&self) -> String {
        match &self.site.base_uri {
            Some(base) => format!("User-agent: *\nAllow: /\n\nSitemap: {base}/sitemap.xml"),
            None => {
                tracing::warn!("serving disallow-all robots.txt: no public base URI configured");
                "User-agent: *\nDisallow: /".to_string()
            }
        }
    }

    async fn render_page(&self, ctx: &RequestContext) -> Result<Outcome, ServerError> {
        let rendered = self.renderer.render(ctx).await.map_err(ServerError::Render)?;

        match rendered {
            RenderResult::Redirect { to } => {
                tracing::debug!(url = %ctx.raw_url, %to, "renderer redirected");
                let location = location_header(&to).ok_or(ServerError::InvalidRedirect(to))?;
                Ok(Outcome::Redirect(location))
            }
            RenderResult::Rendered {
                app_html,
                head_html,
                initial_data,
            } => {
                check_initial_data(&initial_data).map_err(ServerError::UnsafePayload)?;
                let template = self.template(ctx).await?;
                let html = compose(&template, &head_html, &app_html, &initial_data)?;
                Ok(Outcome::Page(html))
            }
        }
    }

    async fn serve_shell(&self, ctx: &RequestContext) -> Result<Outcome, ServerError> {
        if let Some(asset) = self.assets.static_asset(ctx.path()).await? {
            return Ok(Outcome::Asset(asset));
        }
        let template = self.template(ctx).await?;
        Ok(Outcome::Page(template.render(&Slots::default())?))
    }

    async fn template(&self, ctx: &RequestContext) -> Result<Template, ServerError> {
        let raw = self.assets.template(&ctx.raw_url).await?;
        let raw = apply_site_verification(&raw, self.site.site_verification.as_deref());
        Ok(Template::parse(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_routes() {
        assert_eq!(Route::classify("/"), Route::Home);
        assert_eq!(Route::classify("/beranda"), Route::Home);
        assert_eq!(Route::classify("/robots.txt"), Route::Robots);
        assert_eq!(Route::classify("/post/5"), Route::Seo);
        assert_eq!(Route::classify("/berita"), Route::Seo);
        assert_eq!(Route::classify("/berita/politik"), Route::Seo);
        assert_eq!(Route::classify("/cari"), Route::Seo);
        assert_eq!(Route::classify("/beranda/lama"), Route::Shell);
        assert_eq!(Route::classify("/post"), Route::Shell);
        assert_eq!(Route::classify("/admin/post/5"), Route::Shell);
        assert_eq!(Route::classify("/assets/app.js"), Route::Shell);
    }

    #[test]
    fn redirect_targets_are_encoded() {
        assert_eq!(location_header("/berita").unwrap(), "/berita");
        assert_eq!(location_header("/cari?q=kébab").unwrap(), "/cari?q=k%C3%A9bab");
        assert_eq!(location_header("/post/5#komentar").unwrap(), "/post/5#komentar");
        assert_eq!(
            location_header("https://chrononews.id/kategori/ékonomi").unwrap(),
            "https://chrononews.id/kategori/%C3%A9konomi"
        );
        assert!(location_header("http://[::1").is_none());
    }

    #[test]
    fn redirect_outcome_has_empty_body() {
        let response = Outcome::Redirect(HeaderValue::from_static(NEWS_INDEX)).into_response();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/berita");
        assert!(response.headers().get(header::CONTENT_TYPE).is_none());
    }
}
