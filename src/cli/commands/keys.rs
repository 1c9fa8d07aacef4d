//! Keys command - render every cache key with the current context

use crate::cache::{render_key, CacheContext};
use crate::cli::args::KeysArgs;
use crate::cli::commands::load_document;
use crate::config::Config;
use crate::error::{CircletError, CircletResult};
use crate::pipeline::{CacheSpec, Job, Step};
use crate::ui::{self, UiContext};
use crate::workflow::{circle_env, job_working_dir};

/// Execute the keys command
pub async fn execute(args: KeysArgs, config: &Config) -> CircletResult<()> {
    let ctx = UiContext::detect();
    let document = load_document(&args.document, config).await?;

    let mut context = CacheContext::detect(&document.project_dir).await;
    if let Some(branch) = &args.branch {
        context = context.with_branch(branch.clone());
    }

    let jobs: Vec<&Job> = match &args.job {
        Some(name) => vec![document
            .pipeline
            .job(name)
            .ok_or_else(|| CircletError::JobNotFound(name.clone()))?],
        None => document.pipeline.jobs.values().collect(),
    };

    for job in jobs {
        if job.cache_specs().next().is_none() {
            continue;
        }
        ui::section(&ctx, &job.name);

        let workdir = job_working_dir(&document.project_dir, job);
        let job_context = context
            .for_directory(&workdir)
            .with_env(circle_env(job, &workdir, &context))
            .with_env(config.env.clone())
            .with_env(job.environment.clone());

        for step in &job.steps {
            let (verb, spec) = match step {
                Step::RestoreCache(restore) => ("restore", &restore.cache),
                Step::SaveCache(save) => ("save", &save.cache),
                Step::Run(_) => continue,
            };
            print_spec(&ctx, verb, spec, &job_context);
        }
    }

    Ok(())
}

fn print_spec(ctx: &UiContext, verb: &str, spec: &CacheSpec, context: &CacheContext) {
    // save only ever writes the primary key
    let keys: Vec<&str> = if verb == "save" {
        vec![spec.primary.as_str()]
    } else {
        spec.keys().collect()
    };

    for template in keys {
        match render_key(template, context) {
            Ok(key) => ui::key_value(ctx, verb, &key),
            Err(e) => ui::step_error_detail(ctx, template, &e.to_string()),
        }
    }
}
