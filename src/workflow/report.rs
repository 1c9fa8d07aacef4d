//! Job and workflow outcomes

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Final status of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// Every step succeeded
    Succeeded,
    /// A step of this job failed
    Failed {
        step: String,
        /// Command exit status, if the failure came from one
        exit_code: Option<i32>,
        reason: String,
    },
    /// A run step exceeded its timeout and was killed
    TimedOut { step: String, after_secs: u64 },
    /// Never started because a prerequisite did not succeed
    Blocked { by: Vec<String> },
    /// Never started because fail-fast stopped the workflow
    Cancelled,
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Whether the job itself ran and failed
    pub fn is_own_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::TimedOut { .. })
    }

    /// Process exit code this status maps to
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Succeeded => 0,
            Self::Failed {
                exit_code: Some(code),
                ..
            } if *code != 0 => *code,
            _ => 1,
        }
    }

    /// Short label for tables
    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "success",
            Self::Failed { .. } => "failed",
            Self::TimedOut { .. } => "timed out",
            Self::Blocked { .. } => "blocked",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "success"),
            Self::Failed {
                step,
                exit_code: Some(code),
                ..
            } => write!(f, "failed at '{}' (exit code {})", step, code),
            Self::Failed { step, reason, .. } => write!(f, "failed at '{}': {}", step, reason),
            Self::TimedOut { step, after_secs } => {
                write!(f, "timed out at '{}' after {}s", step, after_secs)
            }
            Self::Blocked { by } => write!(f, "blocked (requires {})", by.join(", ")),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of one job within a workflow run
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub name: String,
    #[serde(flatten)]
    pub status: JobStatus,
    /// Wall-clock time spent running (zero if never started)
    pub duration: Duration,
}

/// Aggregate outcome of a workflow run
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub run_id: Uuid,
    pub workflow: String,
    /// One entry per job, in topological order
    pub jobs: Vec<JobReport>,
    /// First job to fail on its own, by completion time
    pub first_failure: Option<String>,
    pub duration: Duration,
}

impl WorkflowReport {
    /// True when every job succeeded
    pub fn success(&self) -> bool {
        self.jobs.iter().all(|job| job.status.is_success())
    }

    /// 0 on success, otherwise the exit code of the first failed job
    pub fn exit_code(&self) -> i32 {
        if self.success() {
            return 0;
        }
        self.first_failure
            .as_deref()
            .and_then(|name| self.job(name))
            .map_or(1, |job| job.status.exit_code())
    }

    /// Look up a job's report
    pub fn job(&self, name: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|job| job.name == name)
    }

    /// Count jobs with a given label
    pub fn count(&self, predicate: impl Fn(&JobStatus) -> bool) -> usize {
        self.jobs.iter().filter(|job| predicate(&job.status)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(jobs: Vec<(&str, JobStatus)>, first_failure: Option<&str>) -> WorkflowReport {
        WorkflowReport {
            run_id: Uuid::new_v4(),
            workflow: "ci".to_string(),
            jobs: jobs
                .into_iter()
                .map(|(name, status)| JobReport {
                    name: name.to_string(),
                    status,
                    duration: Duration::ZERO,
                })
                .collect(),
            first_failure: first_failure.map(str::to_string),
            duration: Duration::ZERO,
        }
    }

    #[test]
    fn success_exit_code_zero() {
        let r = report(vec![("build", JobStatus::Succeeded)], None);
        assert!(r.success());
        assert_eq!(r.exit_code(), 0);
    }

    #[test]
    fn exit_code_propagates_from_first_failure() {
        let r = report(
            vec![
                (
                    "build",
                    JobStatus::Failed {
                        step: "cargo build".to_string(),
                        exit_code: Some(101),
                        reason: "exit status 101".to_string(),
                    },
                ),
                (
                    "test",
                    JobStatus::Blocked {
                        by: vec!["build".to_string()],
                    },
                ),
            ],
            Some("build"),
        );
        assert!(!r.success());
        assert_eq!(r.exit_code(), 101);
    }

    #[test]
    fn timeout_maps_to_one() {
        let status = JobStatus::TimedOut {
            step: "sleep".to_string(),
            after_secs: 5,
        };
        assert_eq!(status.exit_code(), 1);
        assert!(status.is_own_failure());
        assert!(!JobStatus::Cancelled.is_own_failure());
    }

    #[test]
    fn blocked_display_names_prerequisites() {
        let status = JobStatus::Blocked {
            by: vec!["build-check".to_string()],
        };
        assert_eq!(status.to_string(), "blocked (requires build-check)");
    }
}
