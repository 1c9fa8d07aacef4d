//! Validate command - parse the pipeline document and report its shape

use crate::cli::args::DocumentArgs;
use crate::cli::commands::load_document;
use crate::config::Config;
use crate::error::CircletResult;
use crate::ui::{self, UiContext};

/// Execute the validate command
pub async fn execute(args: DocumentArgs, config: &Config) -> CircletResult<()> {
    let ctx = UiContext::detect();
    let document = load_document(&args, config).await?;
    let pipeline = &document.pipeline;

    ui::step_ok_detail(
        &ctx,
        "Pipeline is valid",
        &document.path.display().to_string(),
    );
    if let Some(version) = &pipeline.version {
        ui::key_value(&ctx, "version", version);
    }
    ui::key_value(&ctx, "jobs", &pipeline.jobs.len().to_string());

    for (name, workflow) in &pipeline.workflows {
        let graph = pipeline.workflow_graph(name)?;
        ui::key_value(
            &ctx,
            &format!("workflow {}", name),
            &format!(
                "{} job(s) in {} level(s)",
                workflow.jobs.len(),
                graph.levels().len()
            ),
        );
    }

    Ok(())
}
