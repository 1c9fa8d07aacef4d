//! Job execution
//!
//! A [`JobRunner`] turns one [`Job`] into a [`JobStatus`]. The executor only
//! sees this trait; [`ShellJobRunner`] is the implementation used by the CLI.

use crate::cache::archive::{self, ArchiveRoots};
use crate::cache::{CacheContext, CacheResolver, RestoreOutcome};
use crate::error::{CircletError, CircletResult};
use crate::pipeline::{Job, RestoreCacheStep, RunStep, SaveCacheStep, Step};
use crate::workflow::report::JobStatus;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Receives `(job, line)` for every line of step output
pub type OutputSink = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Runs a single job to completion
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run every step of `job` in order, stopping at the first failure
    async fn run(&self, job: &Job) -> JobStatus;
}

/// Runs steps as shell commands on the host
pub struct ShellJobRunner {
    shell: Vec<String>,
    project_dir: PathBuf,
    home: Option<PathBuf>,
    context: CacheContext,
    cache: Option<CacheResolver>,
    /// `[env]` from configuration
    extra_env: BTreeMap<String, String>,
    /// `-e KEY=VALUE` from the command line, applied last
    override_env: BTreeMap<String, String>,
    default_timeout: Option<Duration>,
    output: OutputSink,
}

impl ShellJobRunner {
    pub fn new(shell: Vec<String>, project_dir: impl Into<PathBuf>, context: CacheContext) -> Self {
        Self {
            shell,
            project_dir: project_dir.into(),
            home: dirs::home_dir(),
            context,
            cache: None,
            extra_env: BTreeMap::new(),
            override_env: BTreeMap::new(),
            default_timeout: None,
            output: Arc::new(|_, _| {}),
        }
    }

    /// Enable cache steps; `None` skips them
    pub fn with_cache(mut self, cache: Option<CacheResolver>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.extra_env = env;
        self
    }

    pub fn with_overrides(mut self, env: BTreeMap<String, String>) -> Self {
        self.override_env = env;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Override the directory `~/` cache paths resolve against
    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    pub fn with_output(mut self, output: OutputSink) -> Self {
        self.output = output;
        self
    }

    /// Directory a job's steps run in
    pub fn working_dir(&self, job: &Job) -> PathBuf {
        job_working_dir(&self.project_dir, job)
    }

    /// Environment for one step, lowest precedence first
    fn step_env(
        &self,
        job: &Job,
        workdir: &Path,
        step_env: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let mut env = circle_env(job, workdir, &self.context);
        env.extend(self.extra_env.clone());
        env.extend(job.environment.clone());
        env.extend(step_env.clone());
        env.extend(self.override_env.clone());
        env
    }

    /// Key context for a job: its working directory and the variables its steps see
    fn job_context(&self, job: &Job, workdir: &Path) -> CacheContext {
        self.context
            .for_directory(workdir)
            .with_env(circle_env(job, workdir, &self.context))
            .with_env(self.extra_env.clone())
            .with_env(job.environment.clone())
            .with_env(self.override_env.clone())
    }

    fn roots(&self, job: &Job, workdir: &Path) -> ArchiveRoots {
        let alias = job
            .working_directory
            .clone()
            .filter(|dir| is_anchored(dir));
        ArchiveRoots::new(workdir)
            .with_home(self.home.clone())
            .with_alias(alias)
    }

    async fn run_command(
        &self,
        job: &Job,
        run: &RunStep,
        label: &str,
        workdir: &Path,
    ) -> Result<(), JobStatus> {
        let Some((program, args)) = self.shell.split_first() else {
            return Err(failed(label, "executor.shell is empty"));
        };

        let mut child = Command::new(program)
            .args(args)
            .arg(&run.command)
            .current_dir(workdir)
            .envs(self.step_env(job, workdir, &run.environment))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| failed(label, format!("failed to start {}: {}", program, e)))?;

        let output = self.output.clone();
        let job_name = job.name.clone();
        let on_line = move |line: String| output(&job_name, &line);

        let timeout = run.timeout.or(self.default_timeout);
        let finished = async {
            stream_output(&mut child, &on_line).await;
            child.wait().await
        };
        let status = match timeout {
            Some(limit) => {
                let result = tokio::time::timeout(limit, finished).await;
                let Ok(status) = result else {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill timed out step '{}': {}", label, e);
                    }
                    return Err(JobStatus::TimedOut {
                        step: label.to_string(),
                        after_secs: limit.as_secs(),
                    });
                };
                status
            }
            None => finished.await,
        };

        let status = status.map_err(|e| failed(label, format!("waiting for command: {}", e)))?;
        if status.success() {
            return Ok(());
        }
        Err(JobStatus::Failed {
            step: label.to_string(),
            exit_code: status.code(),
            reason: status.to_string(),
        })
    }

    async fn restore_cache(
        &self,
        job: &Job,
        restore: &RestoreCacheStep,
        workdir: &Path,
    ) -> CircletResult<()> {
        let Some(cache) = &self.cache else {
            debug!("Cache disabled, skipping restore in '{}'", job.name);
            return Ok(());
        };

        let ctx = self.job_context(job, workdir);
        match cache.restore(&restore.cache, &ctx).await? {
            RestoreOutcome::Hit { key, archive } => {
                let roots = self.roots(job, workdir);
                let written = tokio::task::spawn_blocking(move || archive::unpack(&archive, &roots))
                    .await
                    .map_err(|e| CircletError::Internal(format!("unpack task failed: {}", e)))??;
                (self.output)(
                    &job.name,
                    &format!("Restored cache {} ({} files)", key, written),
                );
            }
            RestoreOutcome::Miss { tried } => {
                (self.output)(
                    &job.name,
                    &format!("No cache found for keys: {}", tried.join(", ")),
                );
            }
        }
        Ok(())
    }

    async fn save_cache(&self, job: &Job, save: &SaveCacheStep, workdir: &Path) -> CircletResult<()> {
        let Some(cache) = &self.cache else {
            debug!("Cache disabled, skipping save in '{}'", job.name);
            return Ok(());
        };

        let roots = self.roots(job, workdir);
        let paths = save
            .paths
            .iter()
            .map(|path| roots.resolve(path))
            .collect::<CircletResult<Vec<_>>>()?;

        let ctx = self.job_context(job, workdir);
        let key = cache.save(&save.cache, &ctx, &paths).await?;
        (self.output)(&job.name, &format!("Saved cache {}", key));
        Ok(())
    }

    async fn run_step(&self, job: &Job, step: &Step, label: &str, workdir: &Path) -> Result<(), JobStatus> {
        match step {
            Step::Run(run) => self.run_command(job, run, label, workdir).await,
            Step::RestoreCache(restore) => self
                .restore_cache(job, restore, workdir)
                .await
                .map_err(|e| failed(label, e.to_string())),
            Step::SaveCache(save) => self
                .save_cache(job, save, workdir)
                .await
                .map_err(|e| failed(label, e.to_string())),
        }
    }
}

#[async_trait]
impl JobRunner for ShellJobRunner {
    async fn run(&self, job: &Job) -> JobStatus {
        let workdir = self.working_dir(job);
        if let Err(e) = tokio::fs::create_dir_all(&workdir).await {
            return failed(
                "working directory",
                format!("creating {}: {}", workdir.display(), e),
            );
        }

        for step in &job.steps {
            let label = step.label();
            info!("[{}] {}", job.name, label);
            (self.output)(&job.name, &format!("==> {}", label));

            if let Err(status) = self.run_step(job, step, &label, &workdir).await {
                (self.output)(&job.name, &format!("Step '{}' {}", label, status));
                return status;
            }
        }

        JobStatus::Succeeded
    }
}

/// Resolve a job's `working_directory` against the project directory.
///
/// Relative values resolve under the project directory. Absolute and `~/`
/// values name the checkout location on a CI machine, which locally is the
/// project directory itself.
pub fn job_working_dir(project_dir: &Path, job: &Job) -> PathBuf {
    match job.working_directory.as_deref() {
        Some(dir) if !is_anchored(dir) => project_dir.join(dir),
        _ => project_dir.to_path_buf(),
    }
}

/// `CI` and `CIRCLE_*` variables injected into every step of `job`
pub fn circle_env(job: &Job, workdir: &Path, context: &CacheContext) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("CI".to_string(), "true".to_string()),
        ("CIRCLE_JOB".to_string(), job.name.clone()),
        ("CIRCLE_BRANCH".to_string(), context.branch.clone()),
        ("CIRCLE_SHA1".to_string(), context.revision.clone()),
        (
            "CIRCLE_WORKING_DIRECTORY".to_string(),
            workdir.display().to_string(),
        ),
    ])
}

/// Absolute or home-relative, as opposed to relative to the project
fn is_anchored(dir: &str) -> bool {
    dir == "~" || dir.starts_with("~/") || Path::new(dir).is_absolute()
}

fn failed(step: &str, reason: impl Into<String>) -> JobStatus {
    JobStatus::Failed {
        step: step.to_string(),
        exit_code: None,
        reason: reason.into(),
    }
}

/// Forward stdout and stderr lines as they arrive, until both close
async fn stream_output(child: &mut Child, on_line: &(dyn Fn(String) + Send + Sync)) {
    let mut stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
    let mut stderr = child.stderr.take().map(|s| BufReader::new(s).lines());
    let mut stdout_done = stdout.is_none();
    let mut stderr_done = stderr.is_none();

    while !stdout_done || !stderr_done {
        tokio::select! {
            line = next_line(&mut stdout), if !stdout_done => match line {
                Some(line) => on_line(line),
                None => stdout_done = true,
            },
            line = next_line(&mut stderr), if !stderr_done => match line {
                Some(line) => on_line(line),
                None => stderr_done = true,
            },
        }
    }
}

async fn next_line<R: AsyncBufRead + Unpin>(lines: &mut Option<Lines<R>>) -> Option<String> {
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => None,
    }
}
