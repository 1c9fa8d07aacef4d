//! Values substituted into cache key templates
//!
//! Rendering only ever reads from a `CacheContext`; the process environment
//! is consulted once, by `CacheContext::detect`.

use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Explicit cache key context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheContext {
    /// `{{ .Branch }}`
    pub branch: String,
    /// `{{ .Revision }}`
    pub revision: String,
    /// `{{ .Environment.NAME }}`
    pub environment: BTreeMap<String, String>,
    /// Base directory for `{{ checksum "path" }}`
    pub project_dir: PathBuf,
    /// `{{ epoch }}`
    pub epoch: i64,
    /// `{{ arch }}`
    pub arch: String,
}

impl CacheContext {
    /// Context with empty branch/revision, no environment, epoch 0
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            branch: String::new(),
            revision: String::new(),
            environment: BTreeMap::new(),
            project_dir: project_dir.into(),
            epoch: 0,
            arch: host_arch(),
        }
    }

    /// Build a context from the process environment and git.
    ///
    /// `CIRCLE_BRANCH` / `CIRCLE_SHA1` take precedence over git. If neither
    /// is available the values stay empty.
    pub async fn detect(project_dir: &Path) -> Self {
        let environment: BTreeMap<String, String> = std::env::vars().collect();

        let branch = match environment.get("CIRCLE_BRANCH") {
            Some(branch) => branch.clone(),
            None => git_output(project_dir, &["rev-parse", "--abbrev-ref", "HEAD"])
                .await
                .unwrap_or_default(),
        };
        let revision = match environment.get("CIRCLE_SHA1") {
            Some(sha) => sha.clone(),
            None => git_output(project_dir, &["rev-parse", "HEAD"])
                .await
                .unwrap_or_default(),
        };

        debug!("Cache context: branch={:?} revision={:?}", branch, revision);

        Self {
            branch,
            revision,
            environment,
            project_dir: project_dir.to_path_buf(),
            epoch: Utc::now().timestamp(),
            arch: host_arch(),
        }
    }

    /// Override the branch
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Override the revision
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    /// Add or replace environment variables
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.environment
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Same context rooted at another directory (a job's working directory)
    pub fn for_directory(&self, dir: &Path) -> Self {
        Self {
            project_dir: dir.to_path_buf(),
            ..self.clone()
        }
    }
}

/// `{os}-{arch}`, e.g. `linux-x86_64`
fn host_arch() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

async fn git_output(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn builder_overrides() {
        let ctx = CacheContext::new("/src")
            .with_branch("master")
            .with_revision("abc123")
            .with_env([("RUST_VERSION", "1.40")]);

        assert_eq!(ctx.branch, "master");
        assert_eq!(ctx.revision, "abc123");
        assert_eq!(ctx.environment["RUST_VERSION"], "1.40");
    }

    #[test]
    fn for_directory_keeps_values() {
        let ctx = CacheContext::new("/src").with_branch("dev");
        let job = ctx.for_directory(Path::new("/src/muta"));
        assert_eq!(job.project_dir, PathBuf::from("/src/muta"));
        assert_eq!(job.branch, "dev");
    }

    #[tokio::test]
    #[serial]
    async fn detect_prefers_circle_variables() {
        let temp = TempDir::new().unwrap();
        std::env::set_var("CIRCLE_BRANCH", "feature/cache");
        std::env::set_var("CIRCLE_SHA1", "deadbeef");

        let ctx = CacheContext::detect(temp.path()).await;

        std::env::remove_var("CIRCLE_BRANCH");
        std::env::remove_var("CIRCLE_SHA1");

        assert_eq!(ctx.branch, "feature/cache");
        assert_eq!(ctx.revision, "deadbeef");
        assert!(ctx.epoch > 0);
    }
}
