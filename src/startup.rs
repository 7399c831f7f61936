//! One-time boot-time validation (C14), stricter than the live readiness
//! probe: binary and filesystem failures are always fatal; credential
//! failures are fatal unless `degraded_mode` allows disabling the
//! offending provider instead.

use crate::config::ConfigSnapshot;
use crate::cookies::CookieStore;
use crate::extractor::ProviderDispatcher;
use crate::readiness::{capture_major_version, MIN_SCRIPTING_RUNTIME_MAJOR};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct StartupValidator;

impl StartupValidator {
    /// Validates the process's external dependencies before the HTTP
    /// listener opens. Returns an error only for failures that
    /// `degraded_mode` does not excuse.
    pub async fn run(
        config: &ConfigSnapshot,
        cookie_store: &CookieStore,
        dispatcher: &Arc<Mutex<ProviderDispatcher>>,
        liveness_probe: &dyn crate::cookies::LivenessProbe,
    ) -> anyhow::Result<()> {
        Self::require_binary(&config.extractor_binary).await?;
        Self::require_binary(&config.media_binary).await?;
        Self::require_scripting_runtime(&config.scripting_runtime_binary).await?;
        Self::require_writable_output_dir(config).await?;

        for provider in &config.providers {
            let Some(cookie_path) = &provider.cookie_path else {
                continue;
            };
            let loaded = cookie_store.load(&provider.name, cookie_path).await;
            let outcome = match loaded {
                Ok(()) => cookie_store
                    .validate(&provider.name, liveness_probe)
                    .await
                    .map(|result| result == crate::cookies::ValidationResult::Valid),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(true) => info!(provider = %provider.name, "credential validated at startup"),
                Ok(false) | Err(_) => {
                    if config.security.degraded_mode {
                        warn!(
                            provider = %provider.name,
                            "credential failed startup validation, disabling provider in degraded mode"
                        );
                        dispatcher.lock().await.disable(&provider.name);
                    } else {
                        anyhow::bail!(
                            "provider {} failed credential validation at startup and degraded_mode is off",
                            provider.name
                        );
                    }
                }
            }
        }

        Ok(())
    }

    async fn require_binary(binary: &str) -> anyhow::Result<()> {
        let status = Command::new(binary)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(s) if s.success() => Ok(()),
            Ok(s) => anyhow::bail!("required binary {binary} exited with {s} on --version probe"),
            Err(e) => anyhow::bail!("required binary {binary} could not be executed: {e}"),
        }
    }

    /// Presence alone is not enough: the scripting runtime backs the
    /// extractor's challenge-resolution flag, and an old runtime fails
    /// obscurely mid-download rather than at startup, so the major version
    /// is checked here too.
    async fn require_scripting_runtime(binary: &str) -> anyhow::Result<()> {
        match capture_major_version(binary).await {
            Ok(Some(major)) if major >= MIN_SCRIPTING_RUNTIME_MAJOR => Ok(()),
            Ok(Some(major)) => anyhow::bail!(
                "scripting runtime {binary} major version {major} is below the required {MIN_SCRIPTING_RUNTIME_MAJOR}"
            ),
            Ok(None) => anyhow::bail!("could not parse version output from scripting runtime {binary}"),
            Err(e) => anyhow::bail!("scripting runtime {binary} could not be executed: {e}"),
        }
    }

    async fn require_writable_output_dir(config: &ConfigSnapshot) -> anyhow::Result<()> {
        let dir = &config.storage.output_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| anyhow::anyhow!("output directory {:?} could not be created: {}", dir, e))?;
        let probe_path = dir.join(".startup-probe");
        tokio::fs::write(&probe_path, b"ok")
            .await
            .map_err(|e| anyhow::anyhow!("output directory {:?} is not writable: {}", dir, e))?;
        let _ = tokio::fs::remove_file(&probe_path).await;
        Ok(())
    }
}
