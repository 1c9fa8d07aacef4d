//! Workflow scheduling
//!
//! Jobs start as soon as every job they require has succeeded, bounded by a
//! worker semaphore. A failed job blocks its dependents; independent
//! branches keep running unless fail-fast is on.

use crate::error::{CircletError, CircletResult};
use crate::pipeline::{Pipeline, WorkflowGraph};
use crate::workflow::report::{JobReport, JobStatus, WorkflowReport};
use crate::workflow::runner::JobRunner;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Scheduling knobs
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Maximum concurrently running jobs
    pub workers: usize,
    /// Stop launching jobs after the first failure
    pub fail_fast: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            fail_fast: false,
        }
    }
}

/// Runs workflows through a [`JobRunner`]
pub struct WorkflowExecutor {
    runner: Arc<dyn JobRunner>,
    options: ExecutorOptions,
}

impl WorkflowExecutor {
    pub fn new(runner: Arc<dyn JobRunner>, options: ExecutorOptions) -> Self {
        Self { runner, options }
    }

    /// Run every job of the graph and collect their outcomes
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        graph: &WorkflowGraph,
    ) -> CircletResult<WorkflowReport> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!(
            "Running workflow '{}' ({} jobs, {} workers, run {})",
            graph.name(),
            graph.len(),
            self.options.workers,
            run_id
        );

        let order: Vec<String> = graph.order().into_iter().map(String::from).collect();
        for name in &order {
            if pipeline.job(name).is_none() {
                return Err(CircletError::JobNotFound(name.clone()));
            }
        }

        let mut waiting_on: HashMap<&str, usize> = order
            .iter()
            .map(|name| (name.as_str(), graph.requires(name).len()))
            .collect();
        let mut ready: VecDeque<&str> = order
            .iter()
            .map(String::as_str)
            .filter(|name| waiting_on[name] == 0)
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let mut running: JoinSet<(String, JobStatus, Duration)> = JoinSet::new();
        let mut outcomes: HashMap<String, (JobStatus, Duration)> = HashMap::new();
        let mut first_failure: Option<String> = None;
        let mut stopped = false;

        loop {
            if stopped {
                for name in ready.drain(..) {
                    debug!("Cancelling '{}' after failure", name);
                    outcomes.insert(name.to_string(), (JobStatus::Cancelled, Duration::ZERO));
                }
            }

            while let Some(&name) = ready.front() {
                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    break;
                };
                ready.pop_front();

                let Some(job) = pipeline.job(name).cloned() else {
                    return Err(CircletError::JobNotFound(name.to_string()));
                };
                let runner = self.runner.clone();
                info!("Starting job '{}'", name);
                running.spawn(async move {
                    let _permit = permit;
                    let job_started = Instant::now();
                    let status = runner.run(&job).await;
                    (job.name, status, job_started.elapsed())
                });
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            let (name, status, duration) =
                joined.map_err(|e| CircletError::Internal(format!("job task failed: {}", e)))?;

            if status.is_success() {
                info!("Job '{}' succeeded in {:.1}s", name, duration.as_secs_f64());
                for dependent in graph.dependents(&name) {
                    if let Some(count) = waiting_on.get_mut(dependent) {
                        *count -= 1;
                        if *count == 0 {
                            ready.push_back(dependent);
                        }
                    }
                }
            } else {
                warn!("Job '{}' {}", name, status);
                if status.is_own_failure() && first_failure.is_none() {
                    first_failure = Some(name.clone());
                }
                if self.options.fail_fast {
                    stopped = true;
                }
            }

            outcomes.insert(name, (status, duration));
        }

        let jobs = order
            .iter()
            .map(|name| {
                let (status, duration) = outcomes.get(name).cloned().unwrap_or_else(|| {
                    let by = graph
                        .requires(name)
                        .into_iter()
                        .filter(|req| !matches!(outcomes.get(*req), Some((JobStatus::Succeeded, _))))
                        .map(String::from)
                        .collect();
                    (JobStatus::Blocked { by }, Duration::ZERO)
                });
                JobReport {
                    name: name.clone(),
                    status,
                    duration,
                }
            })
            .collect();

        Ok(WorkflowReport {
            run_id,
            workflow: graph.name().to_string(),
            jobs,
            first_failure,
            duration: started.elapsed(),
        })
    }
}
