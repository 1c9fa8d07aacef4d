//! CLI command implementations

pub mod cache;
pub mod config;
pub mod keys;
pub mod plan;
pub mod run;
pub mod validate;

pub use cache::execute as cache;
pub use config::execute as config;
pub use keys::execute as keys;
pub use plan::execute as plan;
pub use run::execute as run;
pub use validate::execute as validate;

use crate::cli::args::DocumentArgs;
use crate::config::Config;
use crate::error::{CircletError, CircletResult};
use crate::pipeline::{Pipeline, WorkflowGraph};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A loaded pipeline document and the project it belongs to
pub(crate) struct Document {
    pub path: PathBuf,
    pub project_dir: PathBuf,
    pub pipeline: Pipeline,
}

/// Load the document named by `--file`, or `pipeline.file` from config
pub(crate) async fn load_document(args: &DocumentArgs, config: &Config) -> CircletResult<Document> {
    let cwd = std::env::current_dir().map_err(|e| CircletError::io("getting current directory", e))?;
    let path = cwd.join(args.file.as_ref().unwrap_or(&config.pipeline.file));
    let project_dir = project_dir_for(&path);
    debug!(
        "Pipeline document {} (project {})",
        path.display(),
        project_dir.display()
    );

    let pipeline = Pipeline::load(&path).await?;
    Ok(Document {
        path,
        project_dir,
        pipeline,
    })
}

/// `.circleci/config.yml` belongs to the directory above `.circleci`;
/// any other document to its own directory
fn project_dir_for(document: &Path) -> PathBuf {
    let parent = document.parent().unwrap_or(Path::new("."));
    if parent.file_name().is_some_and(|name| name == ".circleci") {
        return parent.parent().unwrap_or(parent).to_path_buf();
    }
    parent.to_path_buf()
}

/// Graph for the named workflow, or the only one defined
pub(crate) fn select_graph(pipeline: &Pipeline, workflow: Option<&str>) -> CircletResult<WorkflowGraph> {
    let name = match workflow {
        Some(name) => name,
        None => pipeline.default_workflow()?,
    };
    pipeline.workflow_graph(name)
}

/// Format a duration as seconds with one decimal
pub(crate) fn format_secs(duration: std::time::Duration) -> String {
    format!("{:.1}s", duration.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_dir_of_circleci_document() {
        assert_eq!(
            project_dir_for(Path::new("/src/muta/.circleci/config.yml")),
            PathBuf::from("/src/muta")
        );
        assert_eq!(
            project_dir_for(Path::new("/src/muta/ci.yml")),
            PathBuf::from("/src/muta")
        );
    }

    #[test]
    fn format_secs_one_decimal() {
        assert_eq!(format_secs(std::time::Duration::from_millis(1300)), "1.3s");
    }
}
