//! Configuration loading: a TOML file of structured sections, overlaid by
//! environment variables named `EXTRACTOR_GATEWAY_<SECTION>_<KEY>`. Produces
//! an immutable [`ConfigSnapshot`] shared for the lifetime of the process.

use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

const ENV_PREFIX: &str = "EXTRACTOR_GATEWAY";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutsSection {
    pub metadata_attempt_secs: u64,
    pub download_total_secs: u64,
    pub audio_conversion_secs: u64,
    pub readiness_budget_secs: u64,
    pub subprocess_kill_grace_secs: u64,
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            metadata_attempt_secs: 10,
            download_total_secs: 300,
            audio_conversion_secs: 60,
            readiness_budget_secs: 2,
            subprocess_kill_grace_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub output_dir: PathBuf,
    pub cleanup_threshold_pct: u8,
    pub cleanup_age_hours: u64,
    pub reaper_interval_secs: u64,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./downloads"),
            cleanup_threshold_pct: 80,
            cleanup_age_hours: 24,
            reaper_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadsSection {
    pub queue_capacity: usize,
    pub worker_concurrency: usize,
    pub job_ttl_hours: u64,
    pub max_attempts: u32,
    pub backoff_schedule_secs: Vec<u64>,
}

impl Default for DownloadsSection {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            worker_concurrency: 5,
            job_ttl_hours: 24,
            max_attempts: 3,
            backoff_schedule_secs: vec![2, 4, 8],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitingSection {
    pub metadata_rpm: u64,
    pub download_rpm: u64,
    pub burst_capacity: u32,
}

impl Default for RateLimitingSection {
    fn default() -> Self {
        Self {
            metadata_rpm: 100,
            download_rpm: 20,
            burst_capacity: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TemplatesSection {
    pub default_template: String,
}

impl Default for TemplatesSection {
    fn default() -> Self {
        Self {
            default_template: "%(title)s-%(id)s.%(ext)s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub url_patterns: Vec<String>,
    pub cookie_path: Option<PathBuf>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// A stable, known-good video URL used for the liveness probe behind
    /// `CookieStore::validate` and for the readiness connectivity check.
    #[serde(default = "default_probe_url")]
    pub probe_url: String,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_probe_url() -> String {
    "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    pub api_header: String,
    pub api_keys: Vec<String>,
    pub degraded_mode: bool,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            api_header: "X-API-Key".to_string(),
            api_keys: Vec::new(),
            degraded_mode: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringSection {
    pub metrics_enabled: bool,
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawConfig {
    server: ServerSection,
    timeouts: TimeoutsSection,
    storage: StorageSection,
    downloads: DownloadsSection,
    rate_limiting: RateLimitingSection,
    templates: TemplatesSection,
    providers: Vec<ProviderConfig>,
    logging: LoggingSection,
    security: SecuritySection,
    monitoring: MonitoringSection,
}

/// The immutable, validated configuration for this process. Constructed
/// once in [`ConfigSnapshot::load`] and shared behind an `Arc` thereafter.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub server: ServerSection,
    pub timeouts: TimeoutsSection,
    pub storage: StorageSection,
    pub downloads: DownloadsSection,
    pub rate_limiting: RateLimitingSection,
    pub templates: TemplatesSection,
    pub providers: Vec<ProviderConfig>,
    pub logging: LoggingSection,
    pub security: SecuritySection,
    pub monitoring: MonitoringSection,
    pub extractor_binary: String,
    pub media_binary: String,
    pub scripting_runtime_binary: String,
}

impl ConfigSnapshot {
    /// Loads the TOML file at `path` (if present), overlays environment
    /// variables, and validates the result. A missing file is not fatal:
    /// every section falls back to documented defaults.
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let raw_text = match path {
            Some(p) if p.exists() => std::fs::read_to_string(p)
                .map_err(|e| anyhow::anyhow!("failed to read config file {:?}: {}", p, e))?,
            _ => String::new(),
        };

        let mut raw: RawConfig = if raw_text.trim().is_empty() {
            RawConfig::default()
        } else {
            toml::from_str(&raw_text)
                .map_err(|e| anyhow::anyhow!("failed to parse config TOML: {}", e))?
        };

        apply_env_overlay(&mut raw);

        let snapshot = Self {
            server: raw.server,
            timeouts: raw.timeouts,
            storage: raw.storage,
            downloads: raw.downloads,
            rate_limiting: raw.rate_limiting,
            templates: raw.templates,
            providers: raw.providers,
            logging: raw.logging,
            security: raw.security,
            monitoring: raw.monitoring,
            extractor_binary: env::var(format!("{ENV_PREFIX}_EXTRACTOR_BINARY"))
                .unwrap_or_else(|_| "yt-dlp".to_string()),
            media_binary: env::var(format!("{ENV_PREFIX}_MEDIA_BINARY"))
                .unwrap_or_else(|_| "ffmpeg".to_string()),
            scripting_runtime_binary: env::var(format!("{ENV_PREFIX}_SCRIPTING_RUNTIME_BINARY"))
                .unwrap_or_else(|_| "node".to_string()),
        };

        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.server.bind_address, self.server.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid bind address/port: {}", e))
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.bind_addr()?;
        if self.downloads.queue_capacity == 0 {
            anyhow::bail!("downloads.queue_capacity must be > 0");
        }
        if self.downloads.worker_concurrency == 0 {
            anyhow::bail!("downloads.worker_concurrency must be > 0");
        }
        if self.rate_limiting.burst_capacity == 0 {
            anyhow::bail!("rate_limiting.burst_capacity must be > 0");
        }
        if self.security.api_keys.is_empty() && !self.security.degraded_mode {
            anyhow::bail!("security.api_keys is empty and degraded_mode is off");
        }
        if self.providers.is_empty() {
            anyhow::bail!("providers table must not be empty");
        }
        Ok(())
    }
}

/// Overlays `EXTRACTOR_GATEWAY_<SECTION>_<KEY>` environment variables onto
/// the sections that accept scalar overrides. Only the leaves referenced by
/// the external interface (§6) are overridable this way; list/table-valued
/// sections (`providers`) are TOML-only.
fn apply_env_overlay(raw: &mut RawConfig) {
    macro_rules! overlay {
        ($section:expr, $field:ident, $env_key:expr) => {
            if let Ok(value) = env::var(format!("{ENV_PREFIX}_{}", $env_key)) {
                if let Ok(parsed) = value.parse() {
                    $section.$field = parsed;
                }
            }
        };
    }

    overlay!(raw.server, bind_address, "SERVER_BIND_ADDRESS");
    overlay!(raw.server, port, "SERVER_PORT");

    overlay!(
        raw.timeouts,
        metadata_attempt_secs,
        "TIMEOUTS_METADATA_ATTEMPT_SECS"
    );
    overlay!(
        raw.timeouts,
        download_total_secs,
        "TIMEOUTS_DOWNLOAD_TOTAL_SECS"
    );
    overlay!(
        raw.timeouts,
        audio_conversion_secs,
        "TIMEOUTS_AUDIO_CONVERSION_SECS"
    );

    if let Ok(value) = env::var(format!("{ENV_PREFIX}_STORAGE_OUTPUT_DIR")) {
        raw.storage.output_dir = PathBuf::from(value);
    }
    overlay!(
        raw.storage,
        cleanup_threshold_pct,
        "STORAGE_CLEANUP_THRESHOLD_PCT"
    );
    overlay!(raw.storage, cleanup_age_hours, "STORAGE_CLEANUP_AGE_HOURS");

    overlay!(
        raw.downloads,
        queue_capacity,
        "DOWNLOADS_QUEUE_CAPACITY"
    );
    overlay!(
        raw.downloads,
        worker_concurrency,
        "DOWNLOADS_WORKER_CONCURRENCY"
    );
    overlay!(raw.downloads, job_ttl_hours, "DOWNLOADS_JOB_TTL_HOURS");
    overlay!(raw.downloads, max_attempts, "DOWNLOADS_MAX_ATTEMPTS");

    overlay!(
        raw.rate_limiting,
        metadata_rpm,
        "RATE_LIMITING_METADATA_RPM"
    );
    overlay!(
        raw.rate_limiting,
        download_rpm,
        "RATE_LIMITING_DOWNLOAD_RPM"
    );
    overlay!(
        raw.rate_limiting,
        burst_capacity,
        "RATE_LIMITING_BURST_CAPACITY"
    );

    if let Ok(value) = env::var(format!("{ENV_PREFIX}_TEMPLATES_DEFAULT_TEMPLATE")) {
        raw.templates.default_template = value;
    }

    if let Ok(value) = env::var(format!("{ENV_PREFIX}_LOGGING_LEVEL")) {
        raw.logging.level = value;
    }

    if let Ok(value) = env::var(format!("{ENV_PREFIX}_SECURITY_API_HEADER")) {
        raw.security.api_header = value;
    }
    if let Ok(value) = env::var(format!("{ENV_PREFIX}_SECURITY_API_KEYS")) {
        raw.security.api_keys = value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    overlay!(raw.security, degraded_mode, "SECURITY_DEGRADED_MODE");

    overlay!(
        raw.monitoring,
        metrics_enabled,
        "MONITORING_METRICS_ENABLED"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_PROVIDER_TOML: &str = r#"
[[providers]]
name = "youtube"
url_patterns = ["youtube.com", "youtu.be"]
"#;

    fn write_temp_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn defaults_are_internally_consistent() {
        let raw = RawConfig::default();
        assert_eq!(raw.server.port, 8080);
        assert_eq!(raw.downloads.backoff_schedule_secs, vec![2, 4, 8]);
    }

    #[test]
    fn load_without_file_uses_defaults_and_requires_degraded_mode_or_keys() {
        std::env::remove_var("EXTRACTOR_GATEWAY_SECURITY_API_KEYS");
        std::env::set_var("EXTRACTOR_GATEWAY_SECURITY_DEGRADED_MODE", "true");
        let (_dir, path) = write_temp_config(ONE_PROVIDER_TOML);
        let snapshot =
            ConfigSnapshot::load(Some(&path)).expect("load should succeed in degraded mode");
        assert_eq!(snapshot.server.bind_address, "0.0.0.0");
        std::env::remove_var("EXTRACTOR_GATEWAY_SECURITY_DEGRADED_MODE");
    }

    #[test]
    fn env_overlay_overrides_port() {
        std::env::set_var("EXTRACTOR_GATEWAY_SERVER_PORT", "9100");
        std::env::set_var("EXTRACTOR_GATEWAY_SECURITY_DEGRADED_MODE", "true");
        let (_dir, path) = write_temp_config(ONE_PROVIDER_TOML);
        let snapshot = ConfigSnapshot::load(Some(&path)).unwrap();
        assert_eq!(snapshot.server.port, 9100);
        std::env::remove_var("EXTRACTOR_GATEWAY_SERVER_PORT");
        std::env::remove_var("EXTRACTOR_GATEWAY_SECURITY_DEGRADED_MODE");
    }

    #[test]
    fn validate_rejects_empty_provider_table() {
        std::env::remove_var("EXTRACTOR_GATEWAY_SECURITY_API_KEYS");
        std::env::set_var("EXTRACTOR_GATEWAY_SECURITY_DEGRADED_MODE", "true");
        let result = ConfigSnapshot::load(None);
        std::env::remove_var("EXTRACTOR_GATEWAY_SECURITY_DEGRADED_MODE");
        assert!(result.is_err());
    }
}
