//! The composition root (C18): builds every singleton in dependency
//! order, then runs the startup validator, the background daemons, and
//! the HTTP listener until shutdown.

use crate::config::ConfigSnapshot;
use crate::cookies::CookieStore;
use crate::extractor::{ExtractorLivenessProbe, Invoker, ProcessInvoker, ProviderDispatcher};
use crate::jobs::JobStore;
use crate::ratelimit::TokenBucketLimiter;
use crate::readiness::ReadinessProbe;
use crate::routes::build_router;
use crate::scheduler::Scheduler;
use crate::startup::StartupValidator;
use crate::state::AppState;
use crate::storage::spawn_reaper;
use crate::worker::spawn_worker_pool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{error, info};

pub struct GatewayKernel {
    config: Arc<ConfigSnapshot>,
    state: AppState,
}

impl GatewayKernel {
    /// Builds every singleton, in dependency order, and runs the one-time
    /// startup validation. Does not bind the listener or spawn daemons yet.
    pub async fn ignite(config: ConfigSnapshot) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let job_store = Arc::new(JobStore::new());
        let scheduler = Arc::new(Scheduler::new(
            config.downloads.queue_capacity,
            config.downloads.worker_concurrency,
        ));
        let cookie_store = Arc::new(CookieStore::new());
        let dispatcher = Arc::new(Mutex::new(ProviderDispatcher::new()));
        let rate_limiter = Arc::new(TokenBucketLimiter::new(
            config.rate_limiting.burst_capacity,
            config.rate_limiting.metadata_rpm,
            config.rate_limiting.download_rpm,
        ));
        let invoker: Arc<dyn Invoker> = Arc::new(ProcessInvoker {
            extractor_binary: config.extractor_binary.clone(),
            scripting_runtime_binary: config.scripting_runtime_binary.clone(),
        });
        let readiness = Arc::new(ReadinessProbe::new(config.clone(), cookie_store.clone()));

        let liveness_probe = ExtractorLivenessProbe {
            invoker: invoker.clone(),
            providers: config.providers.clone(),
            timeout: Duration::from_secs(config.timeouts.metadata_attempt_secs),
        };
        StartupValidator::run(&config, &cookie_store, &dispatcher, &liveness_probe).await?;

        let state = AppState::new(
            config.clone(),
            job_store,
            scheduler,
            cookie_store,
            dispatcher,
            rate_limiter,
            invoker,
            readiness,
        );

        Ok(Self { config, state })
    }

    /// Spawns the background daemons and the worker pool, binds the HTTP
    /// listener, and serves until a shutdown signal arrives. Daemons are
    /// cancelled and in-flight subprocess work is given a grace period
    /// before the process returns.
    pub async fn launch(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let sweep_store = self.state.job_store.clone();
        let job_ttl_hours = self.config.downloads.job_ttl_hours;
        let mut sweep_shutdown = shutdown_rx.clone();
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sweep_store
                            .sweep_expired(chrono::Duration::hours(job_ttl_hours as i64))
                            .await;
                    }
                    _ = sweep_shutdown.changed() => return,
                }
            }
        });

        spawn_reaper(
            self.config.storage.output_dir.clone(),
            self.state.job_store.clone(),
            self.config.storage.reaper_interval_secs,
            self.config.storage.cleanup_threshold_pct as f64,
            Duration::from_secs(self.config.storage.cleanup_age_hours * 3600),
        );

        let worker_handles = spawn_worker_pool(
            self.state.clone(),
            self.config.downloads.worker_concurrency,
            shutdown_rx.clone(),
        );

        let router = build_router(self.state.clone());
        let bind_addr = self.config.bind_addr()?;
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;
        info!(%bind_addr, "gateway listening");

        let serve_result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        let _ = shutdown_tx.send(true);
        sweeper.abort();

        let grace = Duration::from_secs(self.config.timeouts.subprocess_kill_grace_secs);
        match tokio::time::timeout(grace, futures_join_all(worker_handles)).await {
            Ok(_) => info!("workers drained cleanly"),
            Err(_) => error!("workers did not drain within the grace period"),
        }

        serve_result.map_err(|e| anyhow::anyhow!("server error: {e}"))
    }
}

async fn futures_join_all(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        signal.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
