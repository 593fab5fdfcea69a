//! Service wiring: cache, upstream client, pipeline, listeners and shutdown.

use anyhow::{Context, Result};
use reposcout_core::{
    Config, Dispatcher, GithubClient, Pipeline, RepoSearch, RunSummary, Termination, TopicCache,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::listener;

/// A started service: listeners bound, pipeline running.
pub struct App {
    termination: Termination,
    local_addrs: Vec<SocketAddr>,
    servers: JoinSet<(SocketAddr, std::io::Result<()>)>,
    pipeline: Pipeline,
    dispatcher: Arc<Dispatcher>,
    reporter: Option<JoinHandle<()>>,
}

impl App {
    /// Start against the real GitHub client described by `config.upstream`.
    pub async fn start(config: &Config) -> Result<Self> {
        let search = GithubClient::new(&config.upstream).context("failed to build upstream client")?;
        Self::start_with(config, Arc::new(search)).await
    }

    /// Start with any [`RepoSearch`] implementation.
    ///
    /// Every listen address is bound before anything is spawned, so a bind
    /// failure leaves nothing running.
    pub async fn start_with(config: &Config, search: Arc<dyn RepoSearch>) -> Result<Self> {
        config.validate()?;

        let mut bound = Vec::new();
        for addr in config.listen_addrs()? {
            let socket = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            bound.push(socket);
        }

        let cache = Arc::new(TopicCache::new(config.cache.capacity)?);
        let dispatcher = Arc::new(Dispatcher::new(cache, search));
        let termination = Termination::new();
        let pipeline = Pipeline::spawn(
            Arc::clone(&dispatcher),
            termination.clone(),
            config.server.workers,
            config.server.queue_depth,
        );

        let mut servers = JoinSet::new();
        let mut local_addrs = Vec::with_capacity(bound.len());
        for socket in bound {
            let addr = socket.local_addr()?;
            let app = listener::router(pipeline.intake());
            let shutdown = termination.raised();
            servers.spawn(async move {
                let served = axum::serve(socket, app).with_graceful_shutdown(shutdown).await;
                (addr, served)
            });
            info!(%addr, "listening");
            local_addrs.push(addr);
        }

        let reporter = (config.server.stats_interval_secs > 0).then(|| {
            spawn_reporter(
                Arc::clone(&dispatcher),
                Duration::from_secs(config.server.stats_interval_secs),
                termination.clone(),
            )
        });

        info!(
            capacity = config.cache.capacity,
            workers = config.server.workers,
            queue_depth = config.server.queue_depth,
            authenticated = config.upstream.token.is_some(),
            "reposcout started"
        );

        Ok(Self {
            termination,
            local_addrs,
            servers,
            pipeline,
            dispatcher,
            reporter,
        })
    }

    /// Addresses actually bound (resolves port `0`).
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Handle for raising shutdown.
    pub fn termination(&self) -> Termination {
        self.termination.clone()
    }

    /// Wait for shutdown to be raised and everything to drain.
    ///
    /// A listener that stops on its own raises termination for the rest.
    pub async fn wait(mut self) -> Result<RunSummary> {
        let mut failure = None;
        while let Some(joined) = self.servers.join_next().await {
            match joined {
                Ok((addr, Ok(()))) => debug!(%addr, "listener stopped"),
                Ok((addr, Err(e))) => {
                    error!(%addr, error = %e, "listener failed");
                    self.termination.raise();
                    failure.get_or_insert_with(|| anyhow::Error::new(e).context(format!("listener {addr} failed")));
                },
                Err(e) => {
                    error!(error = %e, "listener task did not complete");
                    self.termination.raise();
                    failure.get_or_insert_with(|| anyhow::Error::new(e));
                },
            }
        }

        let summary = self.pipeline.finished().await;
        if let Some(reporter) = self.reporter.take() {
            if let Err(e) = reporter.await {
                warn!(error = %e, "stats reporter did not complete");
            }
        }
        report_stats(&self.dispatcher).await;

        match failure {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }
}

/// Run until Ctrl-C (or SIGTERM on Unix), then drain and exit.
pub async fn run(config: Config) -> Result<()> {
    let app = App::start(&config).await?;
    let termination = app.termination();
    tokio::spawn(async move {
        shutdown_signal().await;
        termination.raise();
    });

    let summary = app.wait().await?;
    info!(resolved = summary.resolved(), refused = summary.refused, "reposcout stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C"),
        () = terminate => info!("received SIGTERM"),
    }
}

fn spawn_reporter(
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    termination: Termination,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let shutdown = termination.raised();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => report_stats(&dispatcher).await,
            }
        }
    })
}

async fn report_stats(dispatcher: &Dispatcher) {
    let stats = dispatcher.cache().stats().await;
    info!(
        entries = stats.entries,
        capacity = stats.capacity,
        hits = stats.hits,
        misses = stats.misses,
        evictions = stats.evictions,
        hit_rate = stats.hit_rate,
        rate_limit_remaining = ?dispatcher.rate_limit_remaining(),
        "cache stats"
    );
}
