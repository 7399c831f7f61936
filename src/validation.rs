//! Pure, side-effect-free request validation (C1). No component here
//! touches the filesystem, the network, or a lock.

use crate::config::ProviderConfig;
use crate::error::{ServiceError, ServiceResult};
use once_cell::sync::Lazy;
use regex::Regex;

static FORMAT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9+\-/]{1,64}$").expect("static regex"));

static SUBTITLE_LANG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z]{2,3}(-[a-zA-Z0-9]{2,8})*$").expect("static regex"));

const AUDIO_FORMATS: &[&str] = &["mp3", "m4a", "wav", "opus"];
const AUDIO_QUALITIES: &[u16] = &[128, 192, 320];

/// Checks `url` against the ordered provider pattern table. Does not
/// perform selection (see `extractor::dispatcher`) — only confirms that
/// *some* provider would match.
pub fn validate_url(url: &str, providers: &[ProviderConfig]) -> ServiceResult<()> {
    if url.trim().is_empty() {
        return Err(ServiceError::InvalidUrl);
    }
    let parsed = url::Url::parse(url).map_err(|_| ServiceError::InvalidUrl)?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ServiceError::InvalidUrl);
    }
    let matches_any = providers.iter().any(|provider| {
        provider
            .url_patterns
            .iter()
            .any(|pattern| url_matches_pattern(url, pattern))
    });
    if matches_any {
        Ok(())
    } else {
        Err(ServiceError::InvalidUrl)
    }
}

/// A provider's `url_patterns` entries are host substrings (e.g.
/// `youtube.com`, `youtu.be`); this keeps provider configuration
/// declarative without requiring a full pattern-language parser.
pub fn url_matches_pattern(url: &str, pattern: &str) -> bool {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .map(|host| host == pattern || host.ends_with(&format!(".{pattern}")))
        .unwrap_or(false)
}

pub fn validate_format_id(format_id: &str) -> ServiceResult<()> {
    if FORMAT_ID_RE.is_match(format_id) {
        Ok(())
    } else {
        Err(ServiceError::InvalidFormat(
            "format_id contains invalid characters or exceeds 64 characters".to_string(),
        ))
    }
}

pub fn validate_audio_format(format: &str) -> ServiceResult<()> {
    if AUDIO_FORMATS.contains(&format) {
        Ok(())
    } else {
        Err(ServiceError::InvalidFormat(format!(
            "audio_format must be one of {:?}",
            AUDIO_FORMATS
        )))
    }
}

pub fn validate_audio_quality(quality: u16) -> ServiceResult<()> {
    if AUDIO_QUALITIES.contains(&quality) {
        Ok(())
    } else {
        Err(ServiceError::InvalidFormat(format!(
            "audio_quality must be one of {:?}",
            AUDIO_QUALITIES
        )))
    }
}

pub fn validate_subtitle_lang(lang: &str) -> ServiceResult<()> {
    if SUBTITLE_LANG_RE.is_match(lang) {
        Ok(())
    } else {
        Err(ServiceError::InvalidFormat(
            "subtitle_lang is not a valid BCP-47-shaped tag".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(name: &str, patterns: &[&str]) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            url_patterns: patterns.iter().map(|s| s.to_string()).collect(),
            cookie_path: None,
            max_attempts: 3,
            probe_url: "https://example.com/probe".to_string(),
        }
    }

    #[test]
    fn accepts_matching_provider_url() {
        let providers = vec![provider("youtube", &["youtube.com", "youtu.be"])];
        assert!(validate_url("https://www.youtube.com/watch?v=abc", &providers).is_ok());
    }

    #[test]
    fn rejects_unmatched_host() {
        let providers = vec![provider("youtube", &["youtube.com"])];
        assert!(matches!(
            validate_url("https://evil.example.com/x", &providers),
            Err(ServiceError::InvalidUrl)
        ));
    }

    #[test]
    fn rejects_non_http_scheme() {
        let providers = vec![provider("youtube", &["youtube.com"])];
        assert!(validate_url("file:///etc/passwd", &providers).is_err());
    }

    #[test]
    fn format_id_allows_combined_streams() {
        assert!(validate_format_id("137+140").is_ok());
    }

    #[test]
    fn format_id_rejects_overlong_or_invalid_chars() {
        assert!(validate_format_id(&"a".repeat(65)).is_err());
        assert!(validate_format_id("137; rm -rf /").is_err());
    }

    #[test]
    fn audio_quality_closed_set() {
        assert!(validate_audio_quality(192).is_ok());
        assert!(validate_audio_quality(256).is_err());
    }

    #[test]
    fn subtitle_lang_accepts_bcp47_shapes() {
        assert!(validate_subtitle_lang("en").is_ok());
        assert!(validate_subtitle_lang("en-US").is_ok());
        assert!(validate_subtitle_lang("../../etc").is_err());
    }
}
