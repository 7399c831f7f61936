//! Argument construction, subprocess execution, and output parsing (C7).
//!
//! The extractor's CLI is the system's key dependency and is never
//! reimplemented. Arguments are always built as a vector (never a shell
//! string) to preclude injection.

use crate::config::ProviderConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{DownloadParams, VideoMetadata};
use crate::redact::redact_argv;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

/// The subprocess boundary, expressed as a trait so tests substitute a
/// stub that never spawns a real process.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn fetch_metadata(
        &self,
        url: &str,
        provider: &ProviderConfig,
        timeout: Duration,
    ) -> ServiceResult<VideoMetadata>;

    async fn download(
        &self,
        url: &str,
        params: &DownloadParams,
        provider: &ProviderConfig,
        output_template_arg: &str,
        timeout: Duration,
    ) -> ServiceResult<DownloadOutcome>;
}

#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub file_path: PathBuf,
    pub file_size_bytes: u64,
}

/// Real implementation that shells out to the configured extractor binary.
pub struct ProcessInvoker {
    pub extractor_binary: String,
    pub scripting_runtime_binary: String,
}

impl ProcessInvoker {
    fn base_args(&self, provider: &ProviderConfig) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(cookie_path) = &provider.cookie_path {
            args.push("--cookies".to_string());
            args.push(cookie_path.display().to_string());
        }
        args.push("--exec-runtime".to_string());
        args.push(self.scripting_runtime_binary.clone());
        args
    }

    async fn run(&self, argv: &[String], timeout: Duration) -> ServiceResult<(i32, String, String)> {
        let redacted = redact_argv(argv);
        debug!(argv = ?redacted, "invoking extractor");

        let mut child = Command::new(&self.extractor_binary)
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("failed to spawn extractor: {e}")))?;

        let mut stdout_pipe = child.stdout.take().expect("stdout piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr piped");

        let wait = async {
            let mut stdout = String::new();
            let mut stderr = String::new();
            let _ = stdout_pipe.read_to_string(&mut stdout).await;
            let _ = stderr_pipe.read_to_string(&mut stderr).await;
            let status = child.wait().await;
            (status, stdout, stderr)
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok((status, stdout, stderr)) => {
                let code = status
                    .ok()
                    .and_then(|s| s.code())
                    .unwrap_or(-1);
                let stderr_preview: String = stderr.chars().take(500).collect();
                debug!(
                    exit_code = code,
                    stdout_lines = stdout.lines().count(),
                    stderr_preview = %stderr_preview,
                    "extractor exited"
                );
                Ok((code, stdout, stderr))
            }
            Err(_) => {
                let _ = child.start_kill();
                Err(ServiceError::DownloadFailed(
                    "extractor timed out and was killed".to_string(),
                ))
            }
        }
    }
}

#[async_trait]
impl Invoker for ProcessInvoker {
    async fn fetch_metadata(
        &self,
        url: &str,
        provider: &ProviderConfig,
        timeout: Duration,
    ) -> ServiceResult<VideoMetadata> {
        let mut argv = self.base_args(provider);
        argv.push("--dump-json".to_string());
        argv.push("--no-download".to_string());
        argv.push(url.to_string());

        let (code, stdout, stderr) = self.run(&argv, timeout).await?;
        if code != 0 {
            return Err(ServiceError::DownloadFailed(stderr));
        }
        let first_line = stdout.lines().next().unwrap_or("");
        let mut metadata: VideoMetadata = serde_json::from_str(first_line)
            .map_err(|e| ServiceError::DownloadFailed(format!("failed to parse extractor output: {e}")))?;
        metadata.sort_formats_desc();
        Ok(metadata)
    }

    async fn download(
        &self,
        url: &str,
        params: &DownloadParams,
        provider: &ProviderConfig,
        output_template_arg: &str,
        timeout: Duration,
    ) -> ServiceResult<DownloadOutcome> {
        let mut argv = self.base_args(provider);
        if let Some(format_id) = &params.format_id {
            argv.push("-f".to_string());
            argv.push(format_id.clone());
        }
        argv.push("-o".to_string());
        argv.push(output_template_arg.to_string());
        if params.audio_only {
            argv.push("-x".to_string());
            if let Some(format) = &params.audio_format {
                argv.push("--audio-format".to_string());
                argv.push(format.clone());
            }
            if let Some(quality) = params.audio_quality {
                argv.push("--audio-quality".to_string());
                argv.push(quality.to_string());
            }
        }
        if params.subtitles {
            argv.push("--write-subs".to_string());
            if let Some(lang) = &params.subtitle_lang {
                argv.push("--sub-lang".to_string());
                argv.push(lang.clone());
            }
        }
        argv.push("--print".to_string());
        argv.push("after_move:destination".to_string());
        argv.push(url.to_string());

        let (code, stdout, stderr) = self.run(&argv, timeout).await?;
        if code != 0 {
            return Err(ServiceError::DownloadFailed(stderr));
        }

        let destination = parse_destination(&stdout)
            .ok_or_else(|| ServiceError::DownloadFailed("could not determine output file path".to_string()))?;
        let file_path = PathBuf::from(&destination);
        let file_size_bytes = tokio::fs::metadata(&file_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(DownloadOutcome {
            file_path,
            file_size_bytes,
        })
    }
}

/// Prefers an explicit "destination" line; falls back to parsing
/// `--print after_move:destination` style output.
fn parse_destination(stdout: &str) -> Option<String> {
    for line in stdout.lines().rev() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("destination:") {
            return Some(rest.trim().to_string());
        }
        if !trimmed.is_empty() && !trimmed.starts_with('[') {
            return Some(trimmed.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_explicit_destination_line() {
        let stdout = "[download] some noise\ndestination: /out/video.mp4\n";
        assert_eq!(parse_destination(stdout), Some("/out/video.mp4".to_string()));
    }

    #[test]
    fn falls_back_to_last_bare_line() {
        let stdout = "[download] noise\n/out/video.mp4\n";
        assert_eq!(parse_destination(stdout), Some("/out/video.mp4".to_string()));
    }

    #[test]
    fn returns_none_for_empty_output() {
        assert_eq!(parse_destination(""), None);
    }
}
