//! Render worker pool.
//!
//! A `JsRuntime` is bound to the thread that created it, so each worker owns
//! an isolate on a dedicated OS thread running a current-thread tokio
//! runtime. Requests reach the workers through a shared queue and answers go
//! back over a oneshot channel.

use crate::loader::BundleLoader;
use crate::renderer::{RenderResult, Renderer, RequestContext};
use crate::runtime::{create_runtime, execute_render, RenderProps, SandboxConfig};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use deno_core::{JsRuntime, ModuleSpecifier};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Mutex};

struct RenderJob {
    ctx: RequestContext,
    reply: oneshot::Sender<Result<RenderResult>>,
}

/// [`Renderer`] backed by the application's server bundle.
pub struct SandboxRenderer {
    jobs: mpsc::Sender<RenderJob>,
}

impl SandboxRenderer {
    /// Validate the bundle and spawn `config.workers` render threads.
    ///
    /// Must be called from within a tokio runtime; render timeouts are
    /// enforced from it.
    pub fn start(config: SandboxConfig) -> Result<Self> {
        let watchdog = Handle::try_current()
            .map_err(|e| anyhow!("render pool must start inside a tokio runtime: {}", e))?;
        let entry = BundleLoader::new(&config.bundle_dir)?.entry_specifier(&config.entry)?;

        let workers = config.workers.max(1);
        let (tx, rx) = mpsc::channel(workers * 16);
        let queue = Arc::new(Mutex::new(rx));
        let config = Arc::new(config);

        for id in 0..workers {
            let worker = Worker {
                id,
                config: config.clone(),
                entry: entry.clone(),
                queue: queue.clone(),
                watchdog: watchdog.clone(),
            };
            std::thread::Builder::new()
                .name(format!("ssr-render-{id}"))
                .spawn(move || worker.run())
                .map_err(|e| anyhow!("failed to spawn render worker {}: {}", id, e))?;
        }

        tracing::info!(
            workers,
            entry = %entry,
            fresh_runtime_per_render = config.fresh_runtime_per_render,
            "render pool started"
        );
        Ok(Self { jobs: tx })
    }
}

#[async_trait]
impl Renderer for SandboxRenderer {
    async fn render(&self, ctx: &RequestContext) -> Result<RenderResult> {
        let (reply, answer) = oneshot::channel();
        self.jobs
            .send(RenderJob {
                ctx: ctx.clone(),
                reply,
            })
            .await
            .map_err(|_| anyhow!("render workers have shut down"))?;
        answer
            .await
            .map_err(|_| anyhow!("render worker dropped the request for {}", ctx.raw_url))?
    }
}

struct Worker {
    id: usize,
    config: Arc<SandboxConfig>,
    entry: ModuleSpecifier,
    queue: Arc<Mutex<mpsc::Receiver<RenderJob>>>,
    watchdog: Handle,
}

impl Worker {
    fn run(self) {
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!(worker = self.id, error = %e, "failed to build render worker runtime");
                return;
            }
        };
        rt.block_on(self.serve());
    }

    async fn serve(self) {
        let timeout = self.config.timeout_ms.map(Duration::from_millis);
        let mut cached: Option<JsRuntime> = None;

        loop {
            let job = {
                let mut queue = self.queue.lock().await;
                queue.recv().await
            };
            let Some(job) = job else { break };

            let mut runtime = match cached.take() {
                Some(runtime) => runtime,
                None => match create_runtime(&self.config) {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = job.reply.send(Err(e));
                        continue;
                    }
                },
            };

            let props = RenderProps::from(&job.ctx);
            let result = execute_render(&mut runtime, &self.entry, &props, timeout, &self.watchdog).await;

            // A failed runtime may be terminated or half-initialized; start over.
            if result.is_ok() && !self.config.fresh_runtime_per_render {
                cached = Some(runtime);
            }
            if job.reply.send(result).is_err() {
                tracing::debug!(worker = self.id, url = %job.ctx.raw_url, "render caller went away");
            }
        }

        tracing::debug!(worker = self.id, "render worker stopped");
    }
}
