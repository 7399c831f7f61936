//! The live readiness probe (C13), consulted on every `/readiness` request
//! and once, more strictly, by `StartupValidator` at boot.

use crate::config::ConfigSnapshot;
use crate::cookies::{CookieStore, ValidationResult};
use crate::storage::measure_usage;
use serde::Serialize;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

pub const MIN_SCRIPTING_RUNTIME_MAJOR: u32 = 20;

/// Runs `binary --version` and extracts a leading major version number from
/// its stdout (accepts a `v` prefix, e.g. `v20.11.0`, as well as a bare
/// `20.11.0`).
pub async fn capture_major_version(binary: &str) -> Result<Option<u32>, String> {
    let output = Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| e.to_string())?;
    if !output.status.success() {
        return Err(format!("exited with {}", output.status));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_major_version(&stdout))
}

fn parse_major_version(text: &str) -> Option<u32> {
    let trimmed = text.trim().trim_start_matches('v');
    let major_str = trimmed.split(|c: char| c == '.' || c.is_whitespace()).next()?;
    major_str.parse().ok()
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentCheck {
    pub name: String,
    pub healthy: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub healthy: bool,
    pub checks: Vec<ComponentCheck>,
}

pub struct ReadinessProbe {
    pub config: Arc<ConfigSnapshot>,
    pub cookie_store: Arc<CookieStore>,
}

impl ReadinessProbe {
    pub fn new(config: Arc<ConfigSnapshot>, cookie_store: Arc<CookieStore>) -> Self {
        Self { config, cookie_store }
    }

    /// Runs every component check concurrently, bounded by
    /// `timeouts.readiness_budget_secs` as a whole. A check that does not
    /// finish inside the budget is reported unhealthy rather than hanging
    /// the response.
    pub async fn check(&self) -> ReadinessReport {
        let budget = Duration::from_secs(self.config.timeouts.readiness_budget_secs);

        let (extractor, media, scripting, output_dir, disk, credentials) = tokio::join!(
            self.timed(budget, "extractor_binary", self.binary_check(&self.config.extractor_binary)),
            self.timed(budget, "media_binary", self.binary_check(&self.config.media_binary)),
            self.timed(budget, "scripting_runtime", self.scripting_runtime_check()),
            self.timed(budget, "output_dir_writable", self.output_dir_check()),
            self.timed(budget, "disk_space", self.disk_check()),
            self.timed(budget, "credentials", self.credentials_check()),
        );
        let checks = vec![extractor, media, scripting, output_dir, disk, credentials];

        let healthy = checks.iter().all(|c| c.healthy);
        ReadinessReport { healthy, checks }
    }

    async fn timed(
        &self,
        budget: Duration,
        name: &str,
        fut: impl std::future::Future<Output = ComponentCheck>,
    ) -> ComponentCheck {
        match tokio::time::timeout(budget, fut).await {
            Ok(check) => check,
            Err(_) => ComponentCheck {
                name: name.to_string(),
                healthy: false,
                detail: Some("check did not complete within the readiness budget".to_string()),
            },
        }
    }

    async fn binary_check(&self, binary: &str) -> ComponentCheck {
        let name = format!("binary:{binary}");
        let outcome = Command::new(binary)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match outcome {
            Ok(status) if status.success() => ComponentCheck {
                name,
                healthy: true,
                detail: None,
            },
            Ok(status) => ComponentCheck {
                name,
                healthy: false,
                detail: Some(format!("exited with {status}")),
            },
            Err(e) => ComponentCheck {
                name,
                healthy: false,
                detail: Some(e.to_string()),
            },
        }
    }

    /// The extractor shells out through a scripting runtime for challenge
    /// resolution (see C7); the runtime must be present and at least major
    /// version 20, per §4.13.
    async fn scripting_runtime_check(&self) -> ComponentCheck {
        let name = "scripting_runtime".to_string();
        match capture_major_version(&self.config.scripting_runtime_binary).await {
            Ok(Some(major)) if major >= MIN_SCRIPTING_RUNTIME_MAJOR => ComponentCheck {
                name,
                healthy: true,
                detail: Some(format!("major version {major}")),
            },
            Ok(Some(major)) => ComponentCheck {
                name,
                healthy: false,
                detail: Some(format!(
                    "major version {major} is below the required {MIN_SCRIPTING_RUNTIME_MAJOR}"
                )),
            },
            Ok(None) => ComponentCheck {
                name,
                healthy: false,
                detail: Some("could not parse scripting runtime version output".to_string()),
            },
            Err(e) => ComponentCheck {
                name,
                healthy: false,
                detail: Some(e),
            },
        }
    }

    async fn output_dir_check(&self) -> ComponentCheck {
        let dir = &self.config.storage.output_dir;
        let probe_path = dir.join(".readiness-probe");
        let result = tokio::fs::create_dir_all(dir)
            .await
            .and_then(|_| std::fs::write(&probe_path, b"ok").map_err(Into::into));
        let _ = tokio::fs::remove_file(&probe_path).await;
        match result {
            Ok(()) => ComponentCheck {
                name: "output_dir_writable".to_string(),
                healthy: true,
                detail: None,
            },
            Err(e) => ComponentCheck {
                name: "output_dir_writable".to_string(),
                healthy: false,
                detail: Some(e.to_string()),
            },
        }
    }

    async fn disk_check(&self) -> ComponentCheck {
        match measure_usage(&self.config.storage.output_dir) {
            Some((used_pct, _total)) => ComponentCheck {
                name: "disk_space".to_string(),
                healthy: used_pct < 100.0,
                detail: Some(format!("{used_pct:.1}% used")),
            },
            None => ComponentCheck {
                name: "disk_space".to_string(),
                healthy: false,
                detail: Some("could not measure disk usage for output directory".to_string()),
            },
        }
    }

    /// A provider's credential is considered healthy unless it has been
    /// actively probed and found `Invalid` — `Unchecked` and `Valid` both
    /// pass. This avoids forcing an extractor subprocess probe on every
    /// readiness poll; the expensive probe only runs from
    /// `CookieStore::validate`, driven by the hot-reload poller.
    async fn credentials_check(&self) -> ComponentCheck {
        let mut unhealthy_providers = Vec::new();
        for provider in &self.config.providers {
            if provider.cookie_path.is_none() {
                continue;
            }
            match self.cookie_store.snapshot(&provider.name).await {
                Some(record) if record.validation_result == ValidationResult::Invalid => {
                    unhealthy_providers.push(provider.name.clone());
                }
                Some(_) => {}
                None => {
                    debug!(provider = %provider.name, "credential configured but not yet loaded");
                    unhealthy_providers.push(provider.name.clone());
                }
            }
        }
        ComponentCheck {
            name: "credentials".to_string(),
            healthy: unhealthy_providers.is_empty(),
            detail: if unhealthy_providers.is_empty() {
                None
            } else {
                Some(format!("unhealthy providers: {}", unhealthy_providers.join(", ")))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_v_prefixed_semver() {
        assert_eq!(parse_major_version("v20.11.0\n"), Some(20));
    }

    #[test]
    fn parses_bare_semver() {
        assert_eq!(parse_major_version("20.11.0"), Some(20));
    }

    #[test]
    fn rejects_unparseable_output() {
        assert_eq!(parse_major_version("not a version"), None);
    }
}
