//! Command-line and environment configuration.

use crate::dispatch::SiteConfig;
use crate::runtime::SandboxConfig;
use clap::{Args, Parser, Subcommand};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use url::Url;

/// Environment mode, fixed for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Development,
    Production,
}

impl Mode {
    pub fn is_production(self) -> bool {
        self == Mode::Production
    }

    /// `production` (or `prod`) selects production; any other value,
    /// including `test` or `staging`, runs in development.
    fn parse(value: &str) -> Result<Self, Infallible> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Mode::Production),
            _ => Ok(Mode::Development),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "chrononews-ssr", version, about = "Server-side rendering shell for ChronoNews")]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Serve HTTP (the default)
    Serve,
    /// Dispatch a single URL and print the response to stdout
    Render {
        /// Path and query to render, e.g. /post/5
        url: String,
    },
}

#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 5173)]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// development: templates from the dev server; production: client build on disk
    #[arg(long, env = "NODE_ENV", value_parser = Mode::parse, default_value = "development")]
    pub mode: Mode,

    /// Public base URI used for the sitemap line in robots.txt
    #[arg(long, env = "VITE_BASE_URI")]
    pub base_uri: Option<String>,

    /// Google site-verification token injected into the page head
    #[arg(long, env = "VITE_GOOGLE_SITE_VERIFICATION")]
    pub site_verification: Option<String>,

    /// Client build output (static assets and index.html)
    #[arg(long, env = "SSR_CLIENT_DIR", default_value = "dist/client")]
    pub client_dir: PathBuf,

    /// Server bundle directory
    #[arg(long, env = "SSR_SERVER_DIR", default_value = "dist/server")]
    pub server_dir: PathBuf,

    /// Render entry module inside the server bundle
    #[arg(long, env = "SSR_ENTRY", default_value = "entry-server.js")]
    pub entry: String,

    /// Page template inside the client build (production)
    #[arg(long, env = "SSR_TEMPLATE", default_value = "index.html")]
    pub template: String,

    /// Front-end dev server origin (development)
    #[arg(long, env = "VITE_DEV_SERVER", default_value = "http://localhost:5174")]
    pub dev_server: Url,

    /// Origin the renderer may fetch from (repeatable)
    #[arg(long = "allow-origin", env = "SSR_ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// Render worker threads
    #[arg(long, env = "SSR_RENDER_WORKERS", default_value_t = 2)]
    pub render_workers: usize,

    /// Per-render timeout in milliseconds (0 disables)
    #[arg(long, env = "SSR_RENDER_TIMEOUT_MS", default_value_t = 10_000)]
    pub render_timeout_ms: u64,

    /// Render sandbox heap limit in MiB (0 disables)
    #[arg(long, env = "SSR_MAX_HEAP_MB", default_value_t = 128)]
    pub max_heap_mb: usize,
}

/// Treat empty values the same as unset ones.
fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl Config {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn site(&self) -> SiteConfig {
        SiteConfig {
            base_uri: non_empty(&self.base_uri).map(|uri| uri.trim_end_matches('/').to_string()),
            site_verification: non_empty(&self.site_verification),
        }
    }

    pub fn sandbox(&self) -> SandboxConfig {
        SandboxConfig {
            bundle_dir: self.server_dir.clone(),
            entry: self.entry.clone(),
            max_heap_size: (self.max_heap_mb > 0).then(|| self.max_heap_mb * 1024 * 1024),
            timeout_ms: (self.render_timeout_ms > 0).then_some(self.render_timeout_ms),
            allowed_origins: self.allowed_origins.clone(),
            workers: self.render_workers.max(1),
            fresh_runtime_per_render: !self.mode.is_production(),
        }
    }
}
