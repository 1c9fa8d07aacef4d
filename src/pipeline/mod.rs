//! Pipeline model
//!
//! Parses a CircleCI-style document into jobs, steps, cache specs and
//! workflows. Parsing happens once per invocation; the result is immutable.
//!
//! # Accepted steps
//!
//! | Keyword | Body |
//! |---------|------|
//! | `run` | command string, or `command` / `name` / `timeout` / `environment` |
//! | `restore_cache` | `keys` list or single `key` |
//! | `save_cache` | `key` and `paths` |

pub mod document;
pub mod graph;
pub mod model;
pub mod parse;

pub use graph::{PlanLevel, WorkflowGraph};
pub use model::{
    CacheSpec, Job, Pipeline, RestoreCacheStep, RunStep, SaveCacheStep, Step, StepKind, Workflow,
    WorkflowJob,
};
pub use parse::{parse_duration, IMPLICIT_WORKFLOW};

use crate::error::{CircletError, CircletResult};
use std::path::Path;

impl Pipeline {
    /// Parse a pipeline from YAML text
    pub fn from_yaml_str(content: &str) -> CircletResult<Self> {
        let doc = document::parse_document(content)?;
        parse::build_pipeline(&doc)
    }

    /// Read and parse a pipeline document
    pub async fn load(path: &Path) -> CircletResult<Self> {
        let doc = document::read_document(path).await?;
        parse::build_pipeline(&doc)
    }

    /// Build the dependency graph for a workflow
    pub fn workflow_graph(&self, name: &str) -> CircletResult<WorkflowGraph> {
        let workflow = self
            .workflow(name)
            .ok_or_else(|| CircletError::WorkflowNotFound(name.to_string()))?;
        WorkflowGraph::build(workflow, self)
    }

    /// Pick the workflow to run when the user did not name one
    pub fn default_workflow(&self) -> CircletResult<&str> {
        let mut names = self.workflows.keys();
        match (names.next(), names.next()) {
            (Some(only), None) => Ok(only.as_str()),
            (None, _) => Err(CircletError::WorkflowNotFound(
                "<none defined>".to_string(),
            )),
            (Some(_), Some(_)) => Err(CircletError::AmbiguousWorkflow(
                self.workflows
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
            )),
        }
    }
}
