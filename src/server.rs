//! HTTP front: every request goes through one fallback handler that hands it
//! to the [`Dispatcher`].

use crate::assets::{AssetSource, StaticAssets};
use crate::config::{Config, Mode};
use crate::dev::DevAssets;
use crate::dispatch::Dispatcher;
use crate::error::ServerError;
use crate::pool::SandboxRenderer;
use crate::renderer::{Renderer, RequestContext};
use anyhow::{Context, Result};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub struct AppState {
    dispatcher: Dispatcher,
    assets: Arc<dyn AssetSource>,
    mode: Mode,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, assets: Arc<dyn AssetSource>, mode: Mode) -> Self {
        Self {
            dispatcher,
            assets,
            mode,
        }
    }

    /// Dispatch and turn the outcome, or the failure, into a response.
    pub async fn respond(&self, ctx: &RequestContext) -> Response {
        match self.dispatcher.dispatch(ctx).await {
            Ok(outcome) => outcome.into_response(),
            Err(err) => {
                tracing::error!(url = %ctx.raw_url, error = %err, "request failed");
                err.into_response_for(self.mode)
            }
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(handle_request)
        .layer(middleware::from_fn_with_state(state.clone(), intercept_assets))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_request(State(state): State<Arc<AppState>>, uri: Uri, headers: HeaderMap) -> Response {
    let ctx = RequestContext::from_request(&uri, &headers);
    state.respond(&ctx).await
}

/// Lets the asset source answer requests it owns (dev server modules)
/// before dispatch.
async fn intercept_assets(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    match state.assets.intercept(&parts).await {
        Ok(Some(response)) => response,
        Ok(None) => next.run(Request::from_parts(parts, body)).await,
        Err(err) => {
            tracing::error!(uri = %parts.uri, error = %err, "asset interception failed");
            ServerError::from(err).into_response_for(state.mode)
        }
    }
}

/// Pick the asset strategy for the mode and start the render pool.
pub async fn build_state(config: &Config) -> Result<Arc<AppState>> {
    let assets: Arc<dyn AssetSource> = match config.mode {
        Mode::Production => Arc::new(
            StaticAssets::load(&config.client_dir, &config.template)
                .await
                .context("loading client build")?,
        ),
        Mode::Development => Arc::new(DevAssets::new(config.dev_server.clone())),
    };

    let renderer: Arc<dyn Renderer> =
        Arc::new(SandboxRenderer::start(config.sandbox()).context("starting render pool")?);
    let dispatcher = Dispatcher::new(renderer, assets.clone(), config.site());

    Ok(Arc::new(AppState::new(dispatcher, assets, config.mode)))
}

pub async fn serve(config: &Config) -> Result<()> {
    let state = build_state(config).await?;
    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(%addr, mode = ?config.mode, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
