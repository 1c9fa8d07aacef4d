//! Error types for circlet
//!
//! All modules use `CircletResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for circlet operations
pub type CircletResult<T> = Result<T, CircletError>;

/// All errors that can occur in circlet
#[derive(Error, Debug)]
pub enum CircletError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Pipeline document errors
    #[error("Pipeline document not found: {0}")]
    PipelineNotFound(PathBuf),

    #[error("Malformed pipeline document: {0}")]
    PipelineParse(String),

    #[error("Invalid pipeline at {location}: {reason}")]
    PipelineInvalid { location: String, reason: String },

    #[error("Unknown step kind '{kind}' in job '{job}'")]
    UnknownStep { job: String, kind: String },

    #[error("Duplicate job '{job}' in workflow '{workflow}'")]
    DuplicateJob { workflow: String, job: String },

    #[error("Workflow '{workflow}' references unknown job '{job}'")]
    UnknownJob { workflow: String, job: String },

    #[error("Job '{job}' in workflow '{workflow}' requires unknown job '{requires}'")]
    UnknownRequirement {
        workflow: String,
        job: String,
        requires: String,
    },

    #[error("Workflow '{workflow}' has a dependency cycle through '{job}'")]
    CycleDetected { workflow: String, job: String },

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Pipeline defines several workflows, choose one: {0}")]
    AmbiguousWorkflow(String),

    // Cache key errors
    #[error("Invalid cache key template '{template}': {reason}")]
    TemplateInvalid { template: String, reason: String },

    #[error("Cannot checksum {path}: {source}")]
    ChecksumRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Cache store errors
    #[error("Cache store error: {0}")]
    CacheStore(String),

    #[error("Cache path {path} is outside the working directory and home directory")]
    CachePathOutside { path: PathBuf },

    #[error("Cache archive error: {context}")]
    CacheArchive {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl CircletError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create an invalid pipeline error at a dotted document location
    pub fn invalid(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PipelineInvalid {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error comes from the pipeline document itself
    pub fn is_document_error(&self) -> bool {
        matches!(
            self,
            Self::PipelineNotFound(_)
                | Self::PipelineParse(_)
                | Self::PipelineInvalid { .. }
                | Self::UnknownStep { .. }
                | Self::DuplicateJob { .. }
                | Self::UnknownJob { .. }
                | Self::UnknownRequirement { .. }
                | Self::CycleDetected { .. }
                | Self::Yaml(_)
                | Self::ConfigInvalid { .. }
                | Self::TomlParse(_)
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::PipelineNotFound(_) => Some("Pass --file or create .circleci/config.yml"),
            Self::UnknownStep { .. } => {
                Some("Supported steps: run, restore_cache, save_cache")
            }
            Self::AmbiguousWorkflow(_) => Some("Name one: circlet run <WORKFLOW>"),
            Self::CachePathOutside { .. } => {
                Some("Use a path relative to the working directory or starting with ~/")
            }
            _ => None,
        }
    }
}
