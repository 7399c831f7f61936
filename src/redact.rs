//! Strips credentials from argv echoes and log fields, and reduces API keys
//! to a truncated hash for logging. No raw credential or key content is
//! ever allowed past this module.

use sha2::{Digest, Sha256};

const SENTINEL: &str = "***REDACTED***";

/// Flags whose following argument is credential-bearing and must never be
/// logged in full.
const CREDENTIAL_BEARING_FLAGS: &[&str] = &["--cookies", "--password", "--username", "--video-password"];

/// Returns a copy of `argv` with the value following any credential-bearing
/// flag replaced by a sentinel. The flag itself is kept so the redacted
/// form still documents what was passed.
pub fn redact_argv(argv: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(argv.len());
    let mut redact_next = false;
    for arg in argv {
        if redact_next {
            out.push(SENTINEL.to_string());
            redact_next = false;
            continue;
        }
        if CREDENTIAL_BEARING_FLAGS.contains(&arg.as_str()) {
            redact_next = true;
        }
        out.push(arg.clone());
    }
    out
}

/// Redacts anything resembling an `Authorization: <scheme> <token>` header
/// echoed into a free-text log line.
pub fn redact_auth_header_like(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        if let Some(idx) = line.to_ascii_lowercase().find("authorization:") {
            result.push_str(&line[..idx]);
            result.push_str("authorization: ");
            result.push_str(SENTINEL);
            if let Some(newline_at) = line.find('\n') {
                result.push_str(&line[newline_at..]);
            }
        } else {
            result.push_str(line);
        }
    }
    result
}

/// A stable, non-reversible identity for an API key suitable for logging:
/// the first 12 hex characters of its SHA-256 digest. The raw key is never
/// retained past this call.
pub fn hashed_key_identity(raw_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_key.as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 12)
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in bytes {
        if out.len() >= chars {
            break;
        }
        out.push_str(&format!("{:02x}", byte));
    }
    out.truncate(chars);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_cookie_flag_value() {
        let argv = vec![
            "--cookies".to_string(),
            "/secrets/youtube.txt".to_string(),
            "https://example.com".to_string(),
        ];
        let redacted = redact_argv(&argv);
        assert_eq!(redacted[0], "--cookies");
        assert_eq!(redacted[1], SENTINEL);
        assert_eq!(redacted[2], "https://example.com");
    }

    #[test]
    fn leaves_unrelated_args_untouched() {
        let argv = vec!["--format".to_string(), "best".to_string()];
        assert_eq!(redact_argv(&argv), argv);
    }

    #[test]
    fn hashed_identity_never_contains_raw_key() {
        let key = "sk-super-secret-value";
        let hashed = hashed_key_identity(key);
        assert!(!hashed.contains(key));
        assert_eq!(hashed.len(), 12);
    }

    #[test]
    fn redacts_authorization_header_line() {
        let text = "request headers:\nAuthorization: Bearer abc123\nother: value\n";
        let redacted = redact_auth_header_like(text);
        assert!(!redacted.contains("abc123"));
        assert!(redacted.contains("other: value"));
    }
}
