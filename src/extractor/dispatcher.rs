//! URL→provider selection, with enable/disable driven by credential
//! availability at startup (C9).

use crate::config::ProviderConfig;
use crate::error::ServiceError;
use crate::validation::url_matches_pattern;
use std::collections::HashSet;

/// Tracks which configured providers are disabled (credential missing and
/// degraded mode permitted it). Providers not in this set are enabled.
#[derive(Debug, Default)]
pub struct ProviderDispatcher {
    disabled: HashSet<String>,
}

impl ProviderDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disable(&mut self, provider_name: &str) {
        self.disabled.insert(provider_name.to_string());
    }

    pub fn is_enabled(&self, provider_name: &str) -> bool {
        !self.disabled.contains(provider_name)
    }

    /// Iterates `providers` in registration order and returns the first
    /// enabled one whose pattern set matches `url`. A provider matching the
    /// URL but currently disabled yields `COMPONENT_UNAVAILABLE` instead of
    /// falling through to a worse-fit provider.
    pub fn select<'a>(
        &self,
        url: &str,
        providers: &'a [ProviderConfig],
    ) -> Result<&'a ProviderConfig, ServiceError> {
        for provider in providers {
            let matches = provider
                .url_patterns
                .iter()
                .any(|pattern| url_matches_pattern(url, pattern));
            if matches {
                return if self.is_enabled(&provider.name) {
                    Ok(provider)
                } else {
                    Err(ServiceError::ComponentUnavailable(provider.name.clone()))
                };
            }
        }
        Err(ServiceError::InvalidUrl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn providers() -> Vec<ProviderConfig> {
        vec![
            ProviderConfig {
                name: "youtube".to_string(),
                url_patterns: vec!["youtube.com".to_string(), "youtu.be".to_string()],
                cookie_path: None,
                max_attempts: 3,
                probe_url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
            },
            ProviderConfig {
                name: "vimeo".to_string(),
                url_patterns: vec!["vimeo.com".to_string()],
                cookie_path: None,
                max_attempts: 3,
                probe_url: "https://vimeo.com/1084537".to_string(),
            },
        ]
    }

    #[test]
    fn selects_first_matching_enabled_provider() {
        let dispatcher = ProviderDispatcher::new();
        let selected = dispatcher
            .select("https://www.youtube.com/watch?v=abc", &providers())
            .unwrap();
        assert_eq!(selected.name, "youtube");
    }

    #[test]
    fn disabled_matching_provider_yields_component_unavailable() {
        let mut dispatcher = ProviderDispatcher::new();
        dispatcher.disable("youtube");
        let result = dispatcher.select("https://youtu.be/abc", &providers());
        assert!(matches!(result, Err(ServiceError::ComponentUnavailable(_))));
    }

    #[test]
    fn unmatched_url_yields_invalid_url() {
        let dispatcher = ProviderDispatcher::new();
        let result = dispatcher.select("https://example.com/video", &providers());
        assert!(matches!(result, Err(ServiceError::InvalidUrl)));
    }
}
