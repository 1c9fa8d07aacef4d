//! Run command - execute a workflow or a single job

use crate::cache::{CacheContext, CacheResolver, CacheStore, LocalCacheStore};
use crate::cli::args::RunArgs;
use crate::cli::commands::{format_secs, load_document, plan, select_graph};
use crate::config::{Config, ConfigManager};
use crate::error::{CircletError, CircletResult};
use crate::pipeline::WorkflowGraph;
use crate::ui::{self, UiContext};
use crate::workflow::{
    ExecutorOptions, JobStatus, OutputSink, ShellJobRunner, WorkflowExecutor, WorkflowReport,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Exit code reported when interrupted with Ctrl-C
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Execute the run command; returns the process exit code
pub async fn execute(args: RunArgs, config: &Config) -> CircletResult<i32> {
    let ctx = UiContext::detect();
    let document = load_document(&args.document, config).await?;
    let pipeline = &document.pipeline;

    let graph = match &args.job {
        Some(job) => {
            if pipeline.job(job).is_none() {
                return Err(CircletError::JobNotFound(job.clone()));
            }
            WorkflowGraph::single(job)
        }
        None => select_graph(pipeline, args.workflow.as_deref())?,
    };

    if args.dry_run {
        plan::print_plan_table(&graph);
        return Ok(0);
    }

    let mut context = CacheContext::detect(&document.project_dir).await;
    if let Some(branch) = &args.branch {
        context = context.with_branch(branch.clone());
    }

    let cache = if config.cache.enabled && !args.no_cache {
        let dir = config
            .cache
            .dir
            .clone()
            .unwrap_or_else(ConfigManager::cache_dir);
        let store = LocalCacheStore::new(dir);
        debug!("Using {} cache store at {}", store.store_name(), store.dir().display());
        Some(CacheResolver::new(Arc::new(store)))
    } else {
        debug!("Cache steps disabled");
        None
    };

    let output: OutputSink = {
        let ctx = ctx.clone();
        Arc::new(move |job: &str, line: &str| ui::job_line(&ctx, job, line))
    };
    let default_timeout = (config.executor.default_timeout_secs > 0)
        .then(|| Duration::from_secs(config.executor.default_timeout_secs));

    let runner = ShellJobRunner::new(
        config.executor.shell.clone(),
        &document.project_dir,
        context,
    )
    .with_cache(cache)
    .with_env(config.env.clone())
    .with_overrides(args.env.into_iter().collect())
    .with_default_timeout(default_timeout)
    .with_output(output);

    let options = ExecutorOptions {
        workers: args
            .workers
            .filter(|&w| w > 0)
            .unwrap_or_else(|| config.executor.effective_workers()),
        fail_fast: args.fail_fast || config.executor.fail_fast,
    };

    ui::intro(
        &ctx,
        &format!("circlet run {} ({} workers)", graph.name(), options.workers),
    );

    let executor = WorkflowExecutor::new(Arc::new(runner), options);
    let report = tokio::select! {
        report = executor.execute(pipeline, &graph) => report?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping running jobs");
            ui::outro_error(&ctx, "Interrupted");
            return Ok(INTERRUPTED_EXIT_CODE);
        }
    };

    print_summary(&ctx, &report);
    Ok(report.exit_code())
}

fn print_summary(ctx: &UiContext, report: &WorkflowReport) {
    ui::section(ctx, &format!("Workflow {}", report.workflow));

    for job in &report.jobs {
        match &job.status {
            JobStatus::Succeeded => ui::step_ok_detail(ctx, &job.name, &format_secs(job.duration)),
            JobStatus::Failed { .. } | JobStatus::TimedOut { .. } => {
                ui::step_error_detail(ctx, &job.name, &job.status.to_string())
            }
            JobStatus::Blocked { by } => ui::step_blocked(ctx, &job.name, &by.join(", ")),
            JobStatus::Cancelled => ui::step_warn(ctx, &format!("{} cancelled", job.name)),
        }
    }

    if report.success() {
        ui::outro_success(
            ctx,
            &format!(
                "{} job(s) succeeded in {}",
                report.jobs.len(),
                format_secs(report.duration)
            ),
        );
    } else {
        let failed = report.count(|status| !status.is_success());
        ui::outro_error(
            ctx,
            &format!(
                "{} of {} job(s) did not succeed (exit code {})",
                failed,
                report.jobs.len(),
                report.exit_code()
            ),
        );
    }
}
