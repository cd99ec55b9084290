//! Render runtime - executes the server bundle in a sandboxed V8 isolate.
//!
//! Provides only the minimal APIs a server bundle needs to render a page:
//! - console.log/warn/error (captured, re-emitted through tracing)
//! - atob, btoa, TextEncoder, TextDecoder
//! - crypto.randomUUID, crypto.getRandomValues, crypto.subtle.digest
//! - fetch() restricted to allowlisted API origins
//! - Module loading from the server bundle directory only
//! - No fs, env, or other system access

use crate::fetch::FetchPolicy;
use crate::loader::BundleLoader;
use crate::ops::{ssr_runtime, ConsoleOutput};
use crate::renderer::{RenderResult, RequestContext};
use anyhow::{anyhow, Error};
use deno_core::{JsRuntime, ModuleSpecifier, PollEventLoopOptions, RuntimeOptions};
use serde::Serialize;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Per-request fetch timeout when renders are not time-limited.
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the render sandbox
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Directory holding the server bundle (only this dir is readable)
    pub bundle_dir: PathBuf,
    /// Render entry module, relative to `bundle_dir`
    pub entry: String,
    /// Maximum heap size in bytes (None = unlimited)
    pub max_heap_size: Option<usize>,
    /// Maximum time for a single render in milliseconds (None = unlimited)
    pub timeout_ms: Option<u64>,
    /// Allowed origins for fetch() (empty = fetch disabled)
    pub allowed_origins: Vec<String>,
    /// Number of render worker threads
    pub workers: usize,
    /// Build a new isolate for every render so a rebuilt bundle is picked up
    pub fresh_runtime_per_render: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            bundle_dir: PathBuf::from("dist/server"),
            entry: String::from("entry-server.js"),
            max_heap_size: Some(128 * 1024 * 1024),
            timeout_ms: Some(10_000),
            allowed_origins: vec![],
            workers: 2,
            fresh_runtime_per_render: false,
        }
    }
}

/// Props handed to the bundle's `render(url, props)`.
#[derive(Debug, Serialize)]
pub struct RenderProps<'a> {
    pub url: &'a str,
    pub href: String,
    pub host: &'a str,
    pub protocol: &'static str,
}

impl<'a> From<&'a RequestContext> for RenderProps<'a> {
    fn from(ctx: &'a RequestContext) -> Self {
        Self {
            url: &ctx.raw_url,
            href: ctx.href(),
            host: &ctx.host,
            protocol: ctx.protocol.as_str(),
        }
    }
}

/// Create a sandboxed JS runtime for rendering
pub fn create_runtime(config: &SandboxConfig) -> Result<JsRuntime, Error> {
    let loader = BundleLoader::new(&config.bundle_dir)?;

    let create_params = config
        .max_heap_size
        .map(|max_bytes| deno_core::v8::Isolate::create_params().heap_limits(0, max_bytes));

    let mut runtime = JsRuntime::new(RuntimeOptions {
        module_loader: Some(Rc::new(loader)),
        extensions: vec![ssr_runtime::init_ops_and_esm()],
        create_params,
        ..Default::default()
    });

    if config.max_heap_size.is_some() {
        // Terminate the render instead of letting V8 abort the process; the
        // worker discards a failed runtime and builds a new one.
        let isolate = runtime.v8_isolate().thread_safe_handle();
        runtime.add_near_heap_limit_callback(move |current, initial| {
            tracing::warn!(
                current_mb = current / (1024 * 1024),
                initial_mb = initial / (1024 * 1024),
                "render sandbox near heap limit, terminating render"
            );
            isolate.terminate_execution();
            current * 2
        });
    }

    runtime.op_state().borrow_mut().put(ConsoleOutput::default());
    runtime
        .op_state()
        .borrow_mut()
        .put(FetchPolicy::new(
            config.allowed_origins.clone(),
            config.timeout_ms.map_or(DEFAULT_FETCH_TIMEOUT, Duration::from_millis),
        )?);

    Ok(runtime)
}

/// Render one URL with the bundle's entry module.
///
/// # Expected JS module format
/// The entry module exports `render` (or a default function):
/// ```js
/// export async function render(url, props) {
///   return { appHtml, headHtml, initialData };
///   // or
///   return { redirect: "/berita" };
/// }
/// ```
///
/// When `timeout` is set, a watchdog on `watchdog` terminates the isolate if
/// the render overruns, and the render is abandoned even if it is waiting on
/// an op. A runtime that failed or timed out must not be reused.
pub async fn execute_render(
    runtime: &mut JsRuntime,
    entry: &ModuleSpecifier,
    props: &RenderProps<'_>,
    timeout: Option<Duration>,
    watchdog: &Handle,
) -> Result<RenderResult, Error> {
    let result = match timeout {
        Some(limit) => {
            let fired = Arc::new(AtomicBool::new(false));
            let isolate_handle = runtime.v8_isolate().thread_safe_handle();
            let timer = watchdog.spawn({
                let fired = fired.clone();
                async move {
                    tokio::time::sleep(limit).await;
                    fired.store(true, Ordering::SeqCst);
                    isolate_handle.terminate_execution();
                }
            });

            // The watchdog covers JS that never yields; the timeout covers a
            // render parked on a pending op such as a fetch.
            let result = tokio::time::timeout(limit, execute_render_inner(runtime, entry, props)).await;
            timer.abort();

            match result {
                Ok(result) if !fired.load(Ordering::SeqCst) => result,
                _ => Err(anyhow!("Render of {} timed out after {}ms", props.url, limit.as_millis())),
            }
        }
        None => execute_render_inner(runtime, entry, props).await,
    };

    let console = std::mem::take(
        runtime
            .op_state()
            .borrow_mut()
            .borrow_mut::<ConsoleOutput>(),
    );
    if !console.is_empty() {
        console.emit(props.url);
    }

    result
}

async fn execute_render_inner(
    runtime: &mut JsRuntime,
    entry: &ModuleSpecifier,
    props: &RenderProps<'_>,
) -> Result<RenderResult, Error> {
    // Call the internal render function (defined in bootstrap.js with closure-protected cache)
    let render_code = format!(
        "globalThis.__ssr_internal_render__({}, {})",
        serde_json::to_string(entry.as_str())?,
        serde_json::to_string(props)?
    );

    let pending = runtime.execute_script("<ssr>", render_code)?;

    // Run event loop to settle dynamic imports, fetches and the render promise
    runtime
        .run_event_loop(PollEventLoopOptions::default())
        .await?;

    let json = {
        let scope = &mut runtime.handle_scope();
        let local = deno_core::v8::Local::new(scope, &pending);

        if let Ok(promise) = deno_core::v8::Local::<deno_core::v8::Promise>::try_from(local) {
            match promise.state() {
                deno_core::v8::PromiseState::Fulfilled => {
                    let result = promise.result(scope);
                    if result.is_string() {
                        result.to_rust_string_lossy(scope)
                    } else {
                        return Err(anyhow!("Render bootstrap must resolve to a string"));
                    }
                }
                deno_core::v8::PromiseState::Rejected => {
                    let exception = promise.result(scope);
                    let exception_str = exception.to_rust_string_lossy(scope);
                    return Err(anyhow!("Render function threw: {}", exception_str));
                }
                deno_core::v8::PromiseState::Pending => {
                    return Err(anyhow!("Render function returned unresolved promise"));
                }
            }
        } else {
            return Err(anyhow!("Render bootstrap must return a promise"));
        }
    };

    serde_json::from_str(&json).map_err(|e| anyhow!("Malformed render result: {}", e))
}
