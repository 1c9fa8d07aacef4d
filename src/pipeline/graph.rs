//! Workflow dependency graph using petgraph.
//!
//! Edges point from a prerequisite to the job that requires it, so a
//! topological order is a valid execution order.

use crate::error::{CircletError, CircletResult};
use crate::pipeline::model::{Pipeline, Workflow};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Read-only DAG of the jobs in one workflow
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    name: String,
    graph: DiGraph<String, ()>,
    name_to_node: HashMap<String, NodeIndex>,
    order: Vec<NodeIndex>,
}

/// One parallel level of the plan
#[derive(Debug, Clone, Serialize)]
pub struct PlanLevel {
    pub level: usize,
    pub jobs: Vec<String>,
}

impl WorkflowGraph {
    /// Build and validate the graph for a workflow.
    ///
    /// # Errors
    ///
    /// Unknown jobs, unknown `requires` targets, and cycles are rejected.
    pub fn build(workflow: &Workflow, pipeline: &Pipeline) -> CircletResult<Self> {
        let mut graph = DiGraph::new();
        let mut name_to_node = HashMap::new();

        for entry in &workflow.jobs {
            if pipeline.job(&entry.name).is_none() {
                return Err(CircletError::UnknownJob {
                    workflow: workflow.name.clone(),
                    job: entry.name.clone(),
                });
            }
            let node = graph.add_node(entry.name.clone());
            name_to_node.insert(entry.name.clone(), node);
        }

        for entry in &workflow.jobs {
            let to = name_to_node[&entry.name];
            for requirement in &entry.requires {
                let from = name_to_node.get(requirement).copied().ok_or_else(|| {
                    CircletError::UnknownRequirement {
                        workflow: workflow.name.clone(),
                        job: entry.name.clone(),
                        requires: requirement.clone(),
                    }
                })?;
                graph.add_edge(from, to, ());
            }
        }

        toposort(&graph, None).map_err(|cycle| CircletError::CycleDetected {
            workflow: workflow.name.clone(),
            job: graph[cycle.node_id()].clone(),
        })?;
        let order = declared_order(&graph);

        debug!(
            "Workflow '{}': {} jobs, {} edges",
            workflow.name,
            graph.node_count(),
            graph.edge_count()
        );

        Ok(Self {
            name: workflow.name.clone(),
            graph,
            name_to_node,
            order,
        })
    }

    /// A graph holding a single job with no edges
    pub fn single(job: &str) -> Self {
        let mut graph = DiGraph::new();
        let node = graph.add_node(job.to_string());
        Self {
            name: job.to_string(),
            name_to_node: HashMap::from([(job.to_string(), node)]),
            order: vec![node],
            graph,
        }
    }

    /// Workflow name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of jobs
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the workflow has no jobs
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Job names in topological order
    pub fn order(&self) -> Vec<&str> {
        self.order.iter().map(|&idx| self.graph[idx].as_str()).collect()
    }

    /// Direct prerequisites of a job
    pub fn requires(&self, job: &str) -> Vec<&str> {
        self.neighbors(job, Direction::Incoming)
    }

    /// Jobs that directly require `job`
    pub fn dependents(&self, job: &str) -> Vec<&str> {
        self.neighbors(job, Direction::Outgoing)
    }

    fn neighbors(&self, job: &str, direction: Direction) -> Vec<&str> {
        let Some(&node) = self.name_to_node.get(job) else {
            return Vec::new();
        };
        let mut names: Vec<&str> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|idx| self.graph[idx].as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Group jobs into levels; every job's prerequisites sit in earlier levels
    pub fn levels(&self) -> Vec<PlanLevel> {
        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        for &node in &self.order {
            let level = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .filter_map(|dep| depth.get(&dep))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(node, level);
        }

        let max = depth.values().copied().max().map_or(0, |m| m + 1);
        let mut levels: Vec<PlanLevel> = (0..max)
            .map(|level| PlanLevel {
                level,
                jobs: Vec::new(),
            })
            .collect();
        for &node in &self.order {
            levels[depth[&node]].jobs.push(self.graph[node].clone());
        }
        for level in &mut levels {
            level.jobs.sort();
        }
        levels
    }
}

/// Kahn's algorithm, always taking the earliest declared ready job.
///
/// Node indices follow declaration order, so independent jobs keep the order
/// the workflow lists them in. The graph must be acyclic.
fn declared_order(graph: &DiGraph<String, ()>) -> Vec<NodeIndex> {
    let mut waiting: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|node| {
            let prerequisites = graph
                .neighbors_directed(node, Direction::Incoming)
                .collect::<HashSet<_>>()
                .len();
            (node, prerequisites)
        })
        .collect();
    let mut ready: BTreeSet<NodeIndex> = waiting
        .iter()
        .filter(|&(_, &count)| count == 0)
        .map(|(&node, _)| node)
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(node) = ready.pop_first() {
        order.push(node);
        let dependents: HashSet<NodeIndex> =
            graph.neighbors_directed(node, Direction::Outgoing).collect();
        for dependent in dependents {
            if let Some(count) = waiting.get_mut(&dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::model::{Job, WorkflowJob};
    use std::collections::BTreeMap;

    fn pipeline_with(jobs: &[&str]) -> Pipeline {
        Pipeline {
            version: None,
            jobs: jobs
                .iter()
                .map(|name| {
                    (
                        name.to_string(),
                        Job {
                            name: name.to_string(),
                            image: None,
                            environment: BTreeMap::new(),
                            working_directory: None,
                            steps: Vec::new(),
                        },
                    )
                })
                .collect(),
            workflows: BTreeMap::new(),
        }
    }

    fn workflow(entries: &[(&str, &[&str])]) -> Workflow {
        Workflow {
            name: "ci".to_string(),
            jobs: entries
                .iter()
                .map(|(name, requires)| WorkflowJob {
                    name: name.to_string(),
                    requires: requires.iter().map(|r| r.to_string()).collect(),
                })
                .collect(),
        }
    }

    #[test]
    fn topological_order_respects_requires() {
        let p = pipeline_with(&["build", "test", "lint"]);
        let wf = workflow(&[("test", &["build"]), ("lint", &[]), ("build", &[])]);
        let graph = WorkflowGraph::build(&wf, &p).unwrap();

        let order = graph.order();
        let pos = |name| order.iter().position(|n| *n == name).unwrap();
        assert!(pos("build") < pos("test"));
        assert_eq!(graph.requires("test"), vec!["build"]);
        assert_eq!(graph.dependents("build"), vec!["test"]);
    }

    #[test]
    fn independent_jobs_keep_declared_order() {
        let p = pipeline_with(&["build", "test", "lint", "docs"]);
        let wf = workflow(&[
            ("build", &[]),
            ("lint", &[]),
            ("test", &["build"]),
            ("docs", &["lint"]),
        ]);
        let graph = WorkflowGraph::build(&wf, &p).unwrap();
        assert_eq!(graph.order(), vec!["build", "lint", "test", "docs"]);

        let wf = workflow(&[("zeta", &[]), ("alpha", &[]), ("mid", &["zeta", "alpha"])]);
        let p = pipeline_with(&["zeta", "alpha", "mid"]);
        let graph = WorkflowGraph::build(&wf, &p).unwrap();
        assert_eq!(graph.order(), vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn duplicate_requires_counted_once() {
        let p = pipeline_with(&["build", "test"]);
        let wf = workflow(&[("build", &[]), ("test", &["build", "build"])]);
        let graph = WorkflowGraph::build(&wf, &p).unwrap();
        assert_eq!(graph.order(), vec!["build", "test"]);
    }

    #[test]
    fn levels_group_independent_jobs() {
        let p = pipeline_with(&["build", "test", "lint", "deploy"]);
        let wf = workflow(&[
            ("build", &[]),
            ("lint", &[]),
            ("test", &["build"]),
            ("deploy", &["test", "lint"]),
        ]);
        let levels = WorkflowGraph::build(&wf, &p).unwrap().levels();

        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0].jobs, vec!["build", "lint"]);
        assert_eq!(levels[1].jobs, vec!["test"]);
        assert_eq!(levels[2].jobs, vec!["deploy"]);
    }

    #[test]
    fn cycle_rejected() {
        let p = pipeline_with(&["a", "b"]);
        let wf = workflow(&[("a", &["b"]), ("b", &["a"])]);
        let err = WorkflowGraph::build(&wf, &p).unwrap_err();
        assert!(matches!(err, CircletError::CycleDetected { .. }));
    }

    #[test]
    fn self_requirement_rejected() {
        let p = pipeline_with(&["a"]);
        let wf = workflow(&[("a", &["a"])]);
        assert!(WorkflowGraph::build(&wf, &p).is_err());
    }

    #[test]
    fn unknown_references_rejected() {
        let p = pipeline_with(&["build"]);

        let wf = workflow(&[("deploy", &[])]);
        assert!(matches!(
            WorkflowGraph::build(&wf, &p).unwrap_err(),
            CircletError::UnknownJob { .. }
        ));

        let wf = workflow(&[("build", &["setup"])]);
        assert!(matches!(
            WorkflowGraph::build(&wf, &p).unwrap_err(),
            CircletError::UnknownRequirement { .. }
        ));
    }

    #[test]
    fn single_job_graph() {
        let graph = WorkflowGraph::single("build");
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.order(), vec!["build"]);
        assert!(graph.requires("build").is_empty());
    }
}
