//! # ChronoNews SSR
//!
//! Request dispatch and server-side rendering for the ChronoNews front end.
//!
//! News pages (`/post/*`, `/berita*`, `/cari*`) are rendered by the
//! application's server bundle inside a deno_core sandbox and composed into
//! the page template together with their initial data. Everything else is a
//! static file or the client-rendered SPA shell.
//!
//! ## Sandbox guarantees
//!
//! - **Filesystem**: only modules inside the server bundle directory load
//! - **Network**: module imports over HTTP are blocked; `fetch` only reaches
//!   allow-listed origins
//! - **Environment**: no `process.env`, no subprocesses
//! - **Resources**: per-render timeout and heap limit
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chrononews_ssr::{server, Cli};
//! use clap::Parser;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cli = Cli::parse();
//!     server::serve(&cli.config).await
//! }
//! ```

pub mod assets;
pub mod config;
pub mod dev;
pub mod dispatch;
pub mod error;
mod fetch;
pub mod hydrate;
mod loader;
mod ops;
pub mod pool;
pub mod renderer;
pub mod runtime;
mod sanitize;
pub mod server;
pub mod template;

pub use assets::{AssetSource, StaticAssets};
pub use config::{Cli, Command, Config, Mode};
pub use dev::DevAssets;
pub use dispatch::{Dispatcher, Outcome, SiteConfig};
pub use error::ServerError;
pub use hydrate::{Bootstrapper, Mount, MountStrategy};
pub use pool::SandboxRenderer;
pub use renderer::{Protocol, RenderResult, Renderer, RequestContext};
pub use runtime::SandboxConfig;
pub use template::Template;
