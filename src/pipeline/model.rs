//! Pipeline data model
//!
//! Everything here is built once from the document and never mutated.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// A parsed pipeline document
#[derive(Debug, Clone, Serialize)]
pub struct Pipeline {
    /// Top-level `version`, if present
    pub version: Option<String>,
    /// Jobs by name
    pub jobs: BTreeMap<String, Job>,
    /// Workflows by name; every workflow is a validated DAG
    pub workflows: BTreeMap<String, Workflow>,
}

impl Pipeline {
    /// Look up a job by name
    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.get(name)
    }

    /// Look up a workflow by name
    pub fn workflow(&self, name: &str) -> Option<&Workflow> {
        self.workflows.get(name)
    }
}

/// A named unit of CI work
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub name: String,
    /// Primary docker image, recorded but not used for execution
    pub image: Option<String>,
    pub environment: BTreeMap<String, String>,
    /// `working_directory`, relative to the project or prefixed with `~/`
    pub working_directory: Option<String>,
    pub steps: Vec<Step>,
}

impl Job {
    /// Iterate over every cache spec referenced by this job's steps
    pub fn cache_specs(&self) -> impl Iterator<Item = &CacheSpec> {
        self.steps.iter().filter_map(|step| match step {
            Step::Run(_) => None,
            Step::RestoreCache(restore) => Some(&restore.cache),
            Step::SaveCache(save) => Some(&save.cache),
        })
    }
}

/// One action within a job
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    Run(RunStep),
    RestoreCache(RestoreCacheStep),
    SaveCache(SaveCacheStep),
}

impl Step {
    /// Human-readable label for output
    pub fn label(&self) -> String {
        match self {
            Self::Run(run) => run
                .name
                .clone()
                .unwrap_or_else(|| first_line(&run.command).to_string()),
            Self::RestoreCache(restore) => restore
                .name
                .clone()
                .unwrap_or_else(|| "Restoring cache".to_string()),
            Self::SaveCache(save) => save
                .name
                .clone()
                .unwrap_or_else(|| "Saving cache".to_string()),
        }
    }

    /// Document keyword of this step kind
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Run(_) => StepKind::Run,
            Self::RestoreCache(_) => StepKind::RestoreCache,
            Self::SaveCache(_) => StepKind::SaveCache,
        }
    }
}

/// Step kinds accepted in documents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Run,
    RestoreCache,
    SaveCache,
}

impl StepKind {
    /// Parse from the document keyword
    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "run" => Some(Self::Run),
            "restore_cache" => Some(Self::RestoreCache),
            "save_cache" => Some(Self::SaveCache),
            _ => None,
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Run => "run",
            Self::RestoreCache => "restore_cache",
            Self::SaveCache => "save_cache",
        };
        write!(f, "{}", name)
    }
}

/// A shell command step
#[derive(Debug, Clone, Serialize)]
pub struct RunStep {
    pub name: Option<String>,
    pub command: String,
    pub timeout: Option<Duration>,
    /// Overlays the job environment for this step only
    pub environment: BTreeMap<String, String>,
}

/// A cache restore step
#[derive(Debug, Clone, Serialize)]
pub struct RestoreCacheStep {
    pub name: Option<String>,
    pub cache: CacheSpec,
}

/// A cache save step
#[derive(Debug, Clone, Serialize)]
pub struct SaveCacheStep {
    pub name: Option<String>,
    /// Only the primary key is used on save
    pub cache: CacheSpec,
    pub paths: Vec<String>,
}

/// A primary cache key template plus ordered fallbacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheSpec {
    pub primary: String,
    pub fallbacks: Vec<String>,
}

impl CacheSpec {
    /// A spec with a single key and no fallbacks
    pub fn single(key: impl Into<String>) -> Self {
        Self {
            primary: key.into(),
            fallbacks: Vec::new(),
        }
    }

    /// Build from an ordered key list; the first key becomes the primary
    pub fn from_keys(keys: Vec<String>) -> Option<Self> {
        let mut keys = keys.into_iter();
        let primary = keys.next()?;
        Some(Self {
            primary,
            fallbacks: keys.collect(),
        })
    }

    /// All key templates in restore order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.fallbacks.iter().map(String::as_str))
    }
}

/// A DAG of jobs connected by `requires` edges
#[derive(Debug, Clone, Serialize)]
pub struct Workflow {
    pub name: String,
    pub jobs: Vec<WorkflowJob>,
}

impl Workflow {
    /// Workflow entry for a job name
    pub fn entry(&self, job: &str) -> Option<&WorkflowJob> {
        self.jobs.iter().find(|entry| entry.name == job)
    }
}

/// A job reference inside a workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowJob {
    pub name: String,
    pub requires: Vec<String>,
}

fn first_line(command: &str) -> &str {
    command.lines().next().unwrap_or("").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_spec_key_order() {
        let spec = CacheSpec::from_keys(vec![
            "v1-{{ .Branch }}".to_string(),
            "v1-".to_string(),
        ])
        .unwrap();

        assert_eq!(spec.primary, "v1-{{ .Branch }}");
        let keys: Vec<_> = spec.keys().collect();
        assert_eq!(keys, vec!["v1-{{ .Branch }}", "v1-"]);
    }

    #[test]
    fn cache_spec_requires_a_key() {
        assert!(CacheSpec::from_keys(vec![]).is_none());
    }

    #[test]
    fn run_label_defaults_to_first_command_line() {
        let step = Step::Run(RunStep {
            name: None,
            command: "  cargo build\ncargo test".to_string(),
            timeout: None,
            environment: BTreeMap::new(),
        });
        assert_eq!(step.label(), "cargo build");
        assert_eq!(step.kind(), StepKind::Run);
    }

    #[test]
    fn step_kind_keywords() {
        assert_eq!(StepKind::from_keyword("save_cache"), Some(StepKind::SaveCache));
        assert_eq!(StepKind::from_keyword("checkout"), None);
        assert_eq!(StepKind::RestoreCache.to_string(), "restore_cache");
    }
}
