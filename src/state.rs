//! Shared application state: the single bag of `Arc<T>` handles every
//! handler, middleware layer, and background daemon draws on.

use crate::config::ConfigSnapshot;
use crate::cookies::CookieStore;
use crate::extractor::{Invoker, ProviderDispatcher};
use crate::jobs::JobStore;
use crate::ratelimit::TokenBucketLimiter;
use crate::readiness::ReadinessProbe;
use crate::scheduler::Scheduler;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Server-wide operating mode. The health guard consults this before
/// admitting any request through to a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemMode {
    Operational,
    Maintenance(String),
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigSnapshot>,
    pub job_store: Arc<JobStore>,
    pub scheduler: Arc<Scheduler>,
    pub cookie_store: Arc<CookieStore>,
    pub dispatcher: Arc<Mutex<ProviderDispatcher>>,
    pub rate_limiter: Arc<TokenBucketLimiter>,
    pub invoker: Arc<dyn Invoker>,
    pub readiness: Arc<ReadinessProbe>,
    pub mode: Arc<RwLock<SystemMode>>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<ConfigSnapshot>,
        job_store: Arc<JobStore>,
        scheduler: Arc<Scheduler>,
        cookie_store: Arc<CookieStore>,
        dispatcher: Arc<Mutex<ProviderDispatcher>>,
        rate_limiter: Arc<TokenBucketLimiter>,
        invoker: Arc<dyn Invoker>,
        readiness: Arc<ReadinessProbe>,
    ) -> Self {
        Self {
            config,
            job_store,
            scheduler,
            cookie_store,
            dispatcher,
            rate_limiter,
            invoker,
            readiness,
            mode: Arc::new(RwLock::new(SystemMode::Operational)),
        }
    }

    pub async fn is_operational(&self) -> Result<(), String> {
        match &*self.mode.read().await {
            SystemMode::Operational => Ok(()),
            SystemMode::Maintenance(reason) => Err(reason.clone()),
        }
    }

    pub async fn set_mode(&self, mode: SystemMode) {
        match &mode {
            SystemMode::Operational => info!("system mode set to operational"),
            SystemMode::Maintenance(reason) => warn!(reason, "system mode set to maintenance"),
        }
        *self.mode.write().await = mode;
    }
}
