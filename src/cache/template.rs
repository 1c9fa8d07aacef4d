//! Cache key templates
//!
//! Supports the CircleCI placeholders `{{ .Branch }}`, `{{ .Revision }}`,
//! `{{ .Environment.NAME }}`, `{{ checksum "file" }}`, `{{ epoch }}` and
//! `{{ arch }}`. Same template + same context = same key.

use crate::cache::context::CacheContext;
use crate::error::{CircletError, CircletResult};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Rendered in place of an unset environment variable
pub const NO_VALUE: &str = "<no value>";

/// A parsed key template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate {
    source: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Placeholder {
    Branch,
    Revision,
    Environment(String),
    Checksum(String),
    Epoch,
    Arch,
}

impl KeyTemplate {
    /// Parse a template string
    pub fn parse(template: &str) -> CircletResult<Self> {
        let mut segments = Vec::new();
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| invalid(template, "unterminated '{{'"))?;
            let placeholder = parse_placeholder(after[..end].trim())
                .map_err(|reason| invalid(template, reason))?;
            segments.push(Segment::Placeholder(placeholder));
            rest = &after[end + 2..];
        }

        if !rest.is_empty() {
            if rest.contains("}}") {
                return Err(invalid(template, "unmatched '}}'"));
            }
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    /// The original template text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render against a context
    pub fn render(&self, ctx: &CacheContext) -> CircletResult<String> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(Placeholder::Branch) => out.push_str(&ctx.branch),
                Segment::Placeholder(Placeholder::Revision) => out.push_str(&ctx.revision),
                Segment::Placeholder(Placeholder::Environment(name)) => out.push_str(
                    ctx.environment
                        .get(name)
                        .map(String::as_str)
                        .unwrap_or(NO_VALUE),
                ),
                Segment::Placeholder(Placeholder::Checksum(path)) => {
                    out.push_str(&checksum_file(&ctx.project_dir.join(path))?)
                }
                Segment::Placeholder(Placeholder::Epoch) => out.push_str(&ctx.epoch.to_string()),
                Segment::Placeholder(Placeholder::Arch) => out.push_str(&ctx.arch),
            }
        }
        Ok(out)
    }
}

/// Parse and render in one call
pub fn render_key(template: &str, ctx: &CacheContext) -> CircletResult<String> {
    KeyTemplate::parse(template)?.render(ctx)
}

fn parse_placeholder(body: &str) -> Result<Placeholder, String> {
    match body {
        ".Branch" => return Ok(Placeholder::Branch),
        ".Revision" => return Ok(Placeholder::Revision),
        "epoch" => return Ok(Placeholder::Epoch),
        "arch" => return Ok(Placeholder::Arch),
        _ => {}
    }

    if let Some(name) = body.strip_prefix(".Environment.") {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!("invalid environment variable name '{}'", name));
        }
        return Ok(Placeholder::Environment(name.to_string()));
    }

    if let Some(arg) = body.strip_prefix("checksum") {
        let arg = arg.trim();
        let path = arg
            .strip_prefix('"')
            .and_then(|a| a.strip_suffix('"'))
            .filter(|p| !p.is_empty() && !p.contains('"'))
            .ok_or_else(|| "checksum expects a quoted file path".to_string())?;
        return Ok(Placeholder::Checksum(path.to_string()));
    }

    Err(format!("unknown placeholder '{{{{ {} }}}}'", body))
}

/// Hex SHA-256 of a file's contents
pub fn checksum_file(path: &Path) -> CircletResult<String> {
    let contents = fs::read(path).map_err(|e| CircletError::ChecksumRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Ok(hex::encode(hasher.finalize()))
}

fn invalid(template: &str, reason: impl Into<String>) -> CircletError {
    CircletError::TemplateInvalid {
        template: template.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx(dir: &Path) -> CacheContext {
        CacheContext::new(dir)
            .with_branch("master")
            .with_revision("0a1b2c")
            .with_env([("RUST_TOOLCHAIN", "nightly-2019-08-01")])
    }

    #[test]
    fn renders_branch_revision_environment() {
        let temp = TempDir::new().unwrap();
        let key = render_key(
            "v1-{{ .Branch }}-{{.Revision}}-{{ .Environment.RUST_TOOLCHAIN }}",
            &ctx(temp.path()),
        )
        .unwrap();
        assert_eq!(key, "v1-master-0a1b2c-nightly-2019-08-01");
    }

    #[test]
    fn missing_environment_renders_no_value() {
        let temp = TempDir::new().unwrap();
        let key = render_key("v1-{{ .Environment.UNSET_VAR }}", &ctx(temp.path())).unwrap();
        assert_eq!(key, "v1-<no value>");
    }

    #[test]
    fn checksum_is_content_hash() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("Cargo.lock"), b"[[package]]").unwrap();

        let key = render_key(r#"cargo-{{ checksum "Cargo.lock" }}"#, &ctx(temp.path())).unwrap();
        let hash = key.strip_prefix("cargo-").unwrap();
        assert_eq!(hash.len(), 64);

        fs::write(temp.path().join("Cargo.lock"), b"[[package]]\nname = \"muta\"").unwrap();
        let changed = render_key(r#"cargo-{{ checksum "Cargo.lock" }}"#, &ctx(temp.path())).unwrap();
        assert_ne!(key, changed);
    }

    #[test]
    fn checksum_missing_file_errors() {
        let temp = TempDir::new().unwrap();
        let err = render_key(r#"{{ checksum "nope.lock" }}"#, &ctx(temp.path())).unwrap_err();
        assert!(matches!(err, CircletError::ChecksumRead { .. }));
    }

    #[test]
    fn rendering_is_deterministic() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("Cargo.lock"), b"lock").unwrap();
        let template =
            KeyTemplate::parse(r#"{{ arch }}-{{ epoch }}-{{ .Branch }}-{{ checksum "Cargo.lock" }}"#)
                .unwrap();

        let first = template.render(&ctx(temp.path())).unwrap();
        let second = template.render(&ctx(temp.path())).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn literal_only_template() {
        let temp = TempDir::new().unwrap();
        assert_eq!(render_key("cargo-registry-", &ctx(temp.path())).unwrap(), "cargo-registry-");
    }

    #[test]
    fn rejects_malformed_templates() {
        assert!(KeyTemplate::parse("v1-{{ .Branch").is_err());
        assert!(KeyTemplate::parse("v1-{{ .Unknown }}").is_err());
        assert!(KeyTemplate::parse("v1-{{ checksum Cargo.lock }}").is_err());
        assert!(KeyTemplate::parse("v1-}}").is_err());
        assert!(KeyTemplate::parse("{{ .Environment. }}").is_err());
    }
}
