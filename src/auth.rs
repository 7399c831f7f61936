//! Constant-time key comparison and hashed identity for logs (C12).
//!
//! The key comparison here is deliberately constant-time via `subtle`; a
//! naive `==` over attacker-controlled input leaks timing information about
//! how many leading bytes matched.

use crate::redact::hashed_key_identity;
use subtle::ConstantTimeEq;

/// Paths that never go through the auth guard.
pub const EXEMPT_PATHS: &[&str] = &["/health", "/liveness", "/readiness", "/metrics", "/docs"];

pub fn is_exempt_path(path: &str) -> bool {
    EXEMPT_PATHS.iter().any(|exempt| path == *exempt || path.starts_with(&format!("{exempt}/")))
}

/// The identity attached to a request once authenticated: never the raw
/// key, only its hashed prefix.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub key_hash: String,
}

/// Compares `candidate` against every configured key in constant time per
/// comparison (the number of configured keys itself is not hidden — only
/// the byte-by-byte match of each single comparison is).
pub fn authenticate(candidate: &str, configured_keys: &[String]) -> Option<CallerIdentity> {
    let candidate_bytes = candidate.as_bytes();
    for key in configured_keys {
        let key_bytes = key.as_bytes();
        if key_bytes.len() != candidate_bytes.len() {
            continue;
        }
        if bool::from(key_bytes.ct_eq(candidate_bytes)) {
            return Some(CallerIdentity {
                key_hash: hashed_key_identity(key),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticates_matching_key() {
        let keys = vec!["key-one".to_string(), "key-two".to_string()];
        let identity = authenticate("key-two", &keys).expect("should match");
        assert_eq!(identity.key_hash.len(), 12);
    }

    #[test]
    fn rejects_unknown_key() {
        let keys = vec!["key-one".to_string()];
        assert!(authenticate("not-a-key", &keys).is_none());
    }

    #[test]
    fn exempts_health_and_metrics_paths() {
        assert!(is_exempt_path("/health"));
        assert!(is_exempt_path("/metrics"));
        assert!(!is_exempt_path("/api/v1/info"));
    }
}
