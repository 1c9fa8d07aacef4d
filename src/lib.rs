//! circlet - run CircleCI-style pipelines locally
//!
//! Parses a pipeline document into jobs and workflows, renders cache keys
//! against an explicit context, and executes workflows as dependency graphs
//! of shell jobs.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod ui;
pub mod workflow;

pub use error::{CircletError, CircletResult};
