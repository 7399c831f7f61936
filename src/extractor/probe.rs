//! Adapts the extractor invoker into the `cookies::LivenessProbe` contract
//! (C4/C9): a credential is considered live if fetching metadata for the
//! provider's known-good `probe_url` succeeds with that credential attached.

use super::invoker::Invoker;
use crate::config::ProviderConfig;
use crate::cookies::LivenessProbe;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct ExtractorLivenessProbe {
    pub invoker: Arc<dyn Invoker>,
    pub providers: Vec<ProviderConfig>,
    pub timeout: Duration,
}

#[async_trait]
impl LivenessProbe for ExtractorLivenessProbe {
    async fn probe(&self, provider: &str, cookie_path: &Path) -> bool {
        let Some(base) = self.providers.iter().find(|p| p.name == provider) else {
            debug!(provider, "liveness probe requested for unconfigured provider");
            return false;
        };

        let patched = ProviderConfig {
            cookie_path: Some(PathBuf::from(cookie_path)),
            ..base.clone()
        };

        match self
            .invoker
            .fetch_metadata(&patched.probe_url, &patched, self.timeout)
            .await
        {
            Ok(_) => true,
            Err(err) => {
                debug!(provider, error = %err, "liveness probe failed");
                false
            }
        }
    }
}
