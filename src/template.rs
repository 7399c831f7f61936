//! Output-template parsing and safe rendering (C2).

use crate::error::{ServiceError, ServiceResult};
use crate::models::TemplateContext;
use std::path::{Path, PathBuf};

const PLACEHOLDER_WHITELIST: &[&str] = &[
    "title",
    "id",
    "ext",
    "upload_date",
    "uploader",
    "resolution",
    "format_id",
];

const UNSAFE_FS_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed, validated template. Immutable once constructed; re-parsing
/// the same raw string always yields an equal `ValidatedTemplate`.
#[derive(Debug, Clone)]
pub struct ValidatedTemplate {
    segments: Vec<Segment>,
}

impl ValidatedTemplate {
    /// Parses `raw` (python `%(name)s`-style placeholders) and rejects
    /// anything that could escape the output directory or reference a
    /// placeholder outside the whitelist.
    pub fn parse(raw: &str) -> ServiceResult<Self> {
        if raw.contains("..") {
            return Err(ServiceError::InvalidFormat(
                "output_template must not contain '..' segments".to_string(),
            ));
        }
        if raw.starts_with('/') || raw.starts_with('\\') || is_windows_absolute(raw) {
            return Err(ServiceError::InvalidFormat(
                "output_template must not be an absolute path".to_string(),
            ));
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let chars: Vec<char> = raw.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            if chars[i] == '%' && chars.get(i + 1) == Some(&'(') {
                if let Some(close) = chars[i..].iter().position(|c| *c == ')') {
                    let name: String = chars[i + 2..i + close].iter().collect();
                    // consume the conversion char after ')', e.g. the 's' in %(title)s
                    let mut end = i + close + 1;
                    if end < chars.len() {
                        end += 1;
                    }
                    if name.contains('/') || name.contains('\\') {
                        return Err(ServiceError::InvalidFormat(
                            "placeholder names may not contain path separators".to_string(),
                        ));
                    }
                    if !PLACEHOLDER_WHITELIST.contains(&name.as_str()) {
                        return Err(ServiceError::InvalidFormat(format!(
                            "unknown template placeholder '{name}'"
                        )));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name));
                    i = end;
                    continue;
                }
            }
            literal.push(chars[i]);
            i += 1;
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    /// Materializes the template against `context` and `output_dir`,
    /// sanitizing every substituted value and resolving collisions by
    /// appending `_1`, `_2`, ... up to 1000 attempts.
    pub fn render(
        &self,
        context: &TemplateContext,
        output_dir: &Path,
        path_exists: impl Fn(&Path) -> bool,
    ) -> ServiceResult<PathBuf> {
        let base = self.render_once(context, None);
        for attempt in 0..=1000 {
            let candidate_name = if attempt == 0 {
                base.clone()
            } else {
                self.render_once(context, Some(attempt))
            };
            let candidate = output_dir.join(&candidate_name);
            if !path_exists(&candidate) {
                return ensure_descendant(output_dir, &candidate);
            }
            if attempt == 1000 {
                return Err(ServiceError::InvalidFormat(
                    "could not resolve a unique output filename after 1000 attempts".to_string(),
                ));
            }
        }
        unreachable!()
    }

    fn render_once(&self, context: &TemplateContext, collision_suffix: Option<u32>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let raw_value = context.get(name).unwrap_or_default();
                    out.push_str(&sanitize_value(raw_value));
                }
            }
        }
        if let Some(n) = collision_suffix {
            if let Some(dot) = out.rfind('.') {
                out.insert_str(dot, &format!("_{n}"));
            } else {
                out.push_str(&format!("_{n}"));
            }
        }
        out
    }
}

/// Truncates to 200 Unicode code points and replaces every unsafe
/// filesystem character (and control chars U+0000..U+001F) with `_`.
fn sanitize_value(value: &str) -> String {
    value
        .chars()
        .take(200)
        .map(|c| {
            if UNSAFE_FS_CHARS.contains(&c) || (c as u32) < 0x20 {
                '_'
            } else {
                c
            }
        })
        .collect()
}

fn is_windows_absolute(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn ensure_descendant(output_dir: &Path, candidate: &Path) -> ServiceResult<PathBuf> {
    // Lexical containment check: avoid requiring the path to exist yet
    // (it doesn't — it's about to be created), while still rejecting any
    // `..` that survived segment construction from a pathological context
    // value (sanitize_value already strips `/` and `\`, this is defense
    // in depth).
    let mut depth: i64 = 0;
    for component in candidate
        .strip_prefix(output_dir)
        .map_err(|_| ServiceError::InvalidFormat("rendered path escaped output directory".to_string()))?
        .components()
    {
        use std::path::Component;
        match component {
            Component::ParentDir => depth -= 1,
            Component::Normal(_) => depth += 1,
            _ => {}
        }
        if depth < 0 {
            return Err(ServiceError::InvalidFormat(
                "rendered path escaped output directory".to_string(),
            ));
        }
    }
    Ok(candidate.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TemplateContext {
        TemplateContext {
            title: "My Video".to_string(),
            id: "abc123".to_string(),
            ext: "mp4".to_string(),
            upload_date: "20240115".to_string(),
            uploader: "Uploader".to_string(),
            resolution: "1080p".to_string(),
            format_id: "137".to_string(),
        }
    }

    #[test]
    fn rejects_parent_dir_segments() {
        assert!(ValidatedTemplate::parse("../etc/%(id)s.%(ext)s").is_err());
    }

    #[test]
    fn rejects_absolute_paths() {
        assert!(ValidatedTemplate::parse("/etc/%(id)s.%(ext)s").is_err());
    }

    #[test]
    fn rejects_unknown_placeholder() {
        assert!(ValidatedTemplate::parse("%(secret)s.%(ext)s").is_err());
    }

    #[test]
    fn renders_default_style_template() {
        let tpl = ValidatedTemplate::parse("%(title)s-%(id)s.%(ext)s").unwrap();
        let out = tpl
            .render(&ctx(), Path::new("/tmp/out"), |_| false)
            .unwrap();
        assert_eq!(out, Path::new("/tmp/out/My Video-abc123.mp4"));
    }

    #[test]
    fn sanitizes_unsafe_characters_in_title() {
        let mut context = ctx();
        context.title = "weird:name/with|chars".to_string();
        let tpl = ValidatedTemplate::parse("%(title)s.%(ext)s").unwrap();
        let out = tpl
            .render(&context, Path::new("/tmp/out"), |_| false)
            .unwrap();
        assert_eq!(out, Path::new("/tmp/out/weird_name_with_chars.mp4"));
    }

    #[test]
    fn resolves_collision_with_counter_suffix() {
        let tpl = ValidatedTemplate::parse("%(id)s.%(ext)s").unwrap();
        let out = tpl
            .render(&ctx(), Path::new("/tmp/out"), |p| {
                p.to_string_lossy() == "/tmp/out/abc123.mp4"
            })
            .unwrap();
        assert_eq!(out, Path::new("/tmp/out/abc123_1.mp4"));
    }

    #[test]
    fn re_rendering_identical_metadata_is_idempotent() {
        let tpl = ValidatedTemplate::parse("%(title)s-%(id)s.%(ext)s").unwrap();
        let a = tpl.render(&ctx(), Path::new("/tmp/out"), |_| false).unwrap();
        let b = tpl.render(&ctx(), Path::new("/tmp/out"), |_| false).unwrap();
        assert_eq!(a, b);
    }
}
