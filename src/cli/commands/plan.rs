//! Plan command - show the execution order of a workflow

use crate::cli::args::{OutputFormat, PlanArgs};
use crate::cli::commands::{load_document, select_graph};
use crate::config::Config;
use crate::error::CircletResult;
use crate::pipeline::{PlanLevel, WorkflowGraph};
use console::style;
use serde::Serialize;

/// Execute the plan command
pub async fn execute(args: PlanArgs, config: &Config) -> CircletResult<()> {
    let document = load_document(&args.document, config).await?;
    let graph = select_graph(&document.pipeline, args.workflow.as_deref())?;

    match args.format {
        OutputFormat::Table => print_plan_table(&graph),
        OutputFormat::Json => print_plan_json(&graph)?,
        OutputFormat::Plain => print_plan_plain(&graph),
    }
    Ok(())
}

/// Levels with the prerequisites of every job
pub(crate) fn print_plan_table(graph: &WorkflowGraph) {
    println!("Workflow: {}", style(graph.name()).bold());
    println!();
    println!("{:<7} {:<30} {:<40}", "LEVEL", "JOB", "REQUIRES");
    println!("{}", "-".repeat(77));

    for level in graph.levels() {
        for job in &level.jobs {
            let requires = graph.requires(job);
            let requires = if requires.is_empty() {
                style("-").dim().to_string()
            } else {
                requires.join(", ")
            };
            println!("{:<7} {:<30} {:<40}", level.level, job, requires);
        }
    }

    println!();
    println!("Total: {} job(s)", graph.len());
}

fn print_plan_json(graph: &WorkflowGraph) -> CircletResult<()> {
    #[derive(Serialize)]
    struct PlanJson<'a> {
        workflow: &'a str,
        order: Vec<&'a str>,
        levels: Vec<PlanLevel>,
    }

    let plan = PlanJson {
        workflow: graph.name(),
        order: graph.order(),
        levels: graph.levels(),
    };
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn print_plan_plain(graph: &WorkflowGraph) {
    for job in graph.order() {
        println!("{}", job);
    }
}
