//! Workflow execution
//!
//! [`WorkflowExecutor`] schedules a validated [`WorkflowGraph`](crate::pipeline::WorkflowGraph)
//! and hands each job to a [`JobRunner`]. Outcomes are collected in a
//! [`WorkflowReport`].

pub mod executor;
pub mod report;
pub mod runner;

pub use executor::{ExecutorOptions, WorkflowExecutor};
pub use report::{JobReport, JobStatus, WorkflowReport};
pub use runner::{circle_env, job_working_dir, JobRunner, OutputSink, ShellJobRunner};
