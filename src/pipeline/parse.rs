//! Conversion from an expanded YAML document into the pipeline model

use crate::error::{CircletError, CircletResult};
use crate::pipeline::graph::WorkflowGraph;
use crate::pipeline::model::{
    CacheSpec, Job, Pipeline, RestoreCacheStep, RunStep, SaveCacheStep, Step, StepKind, Workflow,
    WorkflowJob,
};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

static NULL_BODY: Value = Value::Null;

/// Name of the workflow synthesized for documents without `workflows`
pub const IMPLICIT_WORKFLOW: &str = "default";

/// Build a validated pipeline from an expanded document
pub fn build_pipeline(doc: &Value) -> CircletResult<Pipeline> {
    let root = doc
        .as_mapping()
        .ok_or_else(|| CircletError::invalid("<root>", "document must be a mapping"))?;

    let version = root.get("version").map(scalar_to_string).transpose()?;

    let jobs_value = root
        .get("jobs")
        .ok_or_else(|| CircletError::invalid("jobs", "missing jobs section"))?;
    let jobs_map = jobs_value
        .as_mapping()
        .ok_or_else(|| CircletError::invalid("jobs", "must be a mapping of job names"))?;
    if jobs_map.is_empty() {
        return Err(CircletError::invalid("jobs", "at least one job is required"));
    }

    // Duplicate job names are already rejected by the YAML parser
    let mut jobs = BTreeMap::new();
    for (key, value) in jobs_map {
        let name = key_string(key, "jobs")?;
        let job = parse_job(&name, value)?;
        jobs.insert(name, job);
    }

    let workflows = match root.get("workflows") {
        Some(value) => parse_workflows(value)?,
        None => implicit_workflows(&jobs),
    };

    let pipeline = Pipeline {
        version,
        jobs,
        workflows,
    };

    for workflow in pipeline.workflows.values() {
        WorkflowGraph::build(workflow, &pipeline)?;
    }

    debug!(
        "Parsed pipeline: {} jobs, {} workflows",
        pipeline.jobs.len(),
        pipeline.workflows.len()
    );
    Ok(pipeline)
}

fn implicit_workflows(jobs: &BTreeMap<String, Job>) -> BTreeMap<String, Workflow> {
    let mut workflows = BTreeMap::new();
    if jobs.contains_key("build") {
        workflows.insert(
            IMPLICIT_WORKFLOW.to_string(),
            Workflow {
                name: IMPLICIT_WORKFLOW.to_string(),
                jobs: vec![WorkflowJob {
                    name: "build".to_string(),
                    requires: Vec::new(),
                }],
            },
        );
    }
    workflows
}

fn parse_job(name: &str, value: &Value) -> CircletResult<Job> {
    let location = format!("jobs.{}", name);
    let map = value
        .as_mapping()
        .ok_or_else(|| CircletError::invalid(&location, "job must be a mapping"))?;

    let image = match map.get("docker") {
        Some(Value::Sequence(images)) => images
            .first()
            .and_then(|first| first.get("image"))
            .map(scalar_to_string)
            .transpose()?,
        Some(_) => {
            return Err(CircletError::invalid(
                format!("{}.docker", location),
                "must be a list of images",
            ))
        }
        None => None,
    };

    let environment = parse_env(map.get("environment"), &format!("{}.environment", location))?;

    let working_directory = map
        .get("working_directory")
        .map(scalar_to_string)
        .transpose()?;

    let steps = match map.get("steps") {
        Some(Value::Sequence(items)) => items
            .iter()
            .enumerate()
            .map(|(index, item)| parse_step(name, index, item))
            .collect::<CircletResult<Vec<_>>>()?,
        Some(Value::Null) | None => Vec::new(),
        Some(_) => {
            return Err(CircletError::invalid(
                format!("{}.steps", location),
                "must be a list",
            ))
        }
    };

    Ok(Job {
        name: name.to_string(),
        image,
        environment,
        working_directory,
        steps,
    })
}

fn parse_step(job: &str, index: usize, value: &Value) -> CircletResult<Step> {
    let location = format!("jobs.{}.steps[{}]", job, index);

    let (keyword, body) = match value {
        Value::String(keyword) => (keyword.clone(), &NULL_BODY),
        Value::Mapping(map) if map.len() == 1 => {
            let (key, body) = map
                .iter()
                .next()
                .ok_or_else(|| CircletError::invalid(&location, "empty step"))?;
            (key_string(key, &location)?, body)
        }
        _ => {
            return Err(CircletError::invalid(
                &location,
                "step must be a keyword or a single-key mapping",
            ))
        }
    };

    let kind = StepKind::from_keyword(&keyword).ok_or_else(|| CircletError::UnknownStep {
        job: job.to_string(),
        kind: keyword.clone(),
    })?;

    let location = format!("{}.{}", location, kind);
    match kind {
        StepKind::Run => parse_run(body, &location).map(Step::Run),
        StepKind::RestoreCache => parse_restore(body, &location).map(Step::RestoreCache),
        StepKind::SaveCache => parse_save(body, &location).map(Step::SaveCache),
    }
}

fn parse_run(body: &Value, location: &str) -> CircletResult<RunStep> {
    match body {
        Value::String(command) => Ok(RunStep {
            name: None,
            command: command.clone(),
            timeout: None,
            environment: BTreeMap::new(),
        }),
        Value::Mapping(map) => {
            let command = map
                .get("command")
                .map(scalar_to_string)
                .transpose()?
                .ok_or_else(|| CircletError::invalid(location, "missing command"))?;

            let timeout = map
                .get("timeout")
                .or_else(|| map.get("no_output_timeout"))
                .map(|v| parse_timeout(v, location))
                .transpose()?;

            Ok(RunStep {
                name: optional_string(map, "name")?,
                command,
                timeout,
                environment: parse_env(map.get("environment"), &format!("{}.environment", location))?,
            })
        }
        _ => Err(CircletError::invalid(
            location,
            "run must be a command string or a mapping",
        )),
    }
}

fn parse_restore(body: &Value, location: &str) -> CircletResult<RestoreCacheStep> {
    let map = body
        .as_mapping()
        .ok_or_else(|| CircletError::invalid(location, "must be a mapping"))?;

    let keys = match (map.get("keys"), map.get("key")) {
        (Some(Value::Sequence(keys)), _) => keys
            .iter()
            .map(scalar_to_string)
            .collect::<CircletResult<Vec<_>>>()?,
        (Some(_), _) => return Err(CircletError::invalid(location, "keys must be a list")),
        (None, Some(key)) => vec![scalar_to_string(key)?],
        (None, None) => Vec::new(),
    };

    let cache = CacheSpec::from_keys(keys)
        .ok_or_else(|| CircletError::invalid(location, "at least one cache key is required"))?;

    Ok(RestoreCacheStep {
        name: optional_string(map, "name")?,
        cache,
    })
}

fn parse_save(body: &Value, location: &str) -> CircletResult<SaveCacheStep> {
    let map = body
        .as_mapping()
        .ok_or_else(|| CircletError::invalid(location, "must be a mapping"))?;

    let key = map
        .get("key")
        .map(scalar_to_string)
        .transpose()?
        .ok_or_else(|| CircletError::invalid(location, "missing key"))?;

    let paths = match map.get("paths") {
        Some(Value::Sequence(paths)) if !paths.is_empty() => paths
            .iter()
            .map(scalar_to_string)
            .collect::<CircletResult<Vec<_>>>()?,
        _ => {
            return Err(CircletError::invalid(
                location,
                "paths must be a non-empty list",
            ))
        }
    };

    Ok(SaveCacheStep {
        name: optional_string(map, "name")?,
        cache: CacheSpec::single(key),
        paths,
    })
}

fn parse_workflows(value: &Value) -> CircletResult<BTreeMap<String, Workflow>> {
    let map = value
        .as_mapping()
        .ok_or_else(|| CircletError::invalid("workflows", "must be a mapping"))?;

    let mut workflows = BTreeMap::new();
    for (key, body) in map {
        let name = key_string(key, "workflows")?;
        if name == "version" {
            continue;
        }
        let workflow = parse_workflow(&name, body)?;
        workflows.insert(name, workflow);
    }
    Ok(workflows)
}

fn parse_workflow(name: &str, value: &Value) -> CircletResult<Workflow> {
    let location = format!("workflows.{}", name);
    let entries = value
        .get("jobs")
        .and_then(Value::as_sequence)
        .ok_or_else(|| CircletError::invalid(&location, "jobs must be a list"))?;
    if entries.is_empty() {
        return Err(CircletError::invalid(&location, "at least one job is required"));
    }

    let mut jobs: Vec<WorkflowJob> = Vec::with_capacity(entries.len());
    for entry in entries {
        let job = parse_workflow_job(entry, &location)?;
        if jobs.iter().any(|existing| existing.name == job.name) {
            return Err(CircletError::DuplicateJob {
                workflow: name.to_string(),
                job: job.name,
            });
        }
        jobs.push(job);
    }

    Ok(Workflow {
        name: name.to_string(),
        jobs,
    })
}

fn parse_workflow_job(entry: &Value, location: &str) -> CircletResult<WorkflowJob> {
    match entry {
        Value::String(name) => Ok(WorkflowJob {
            name: name.clone(),
            requires: Vec::new(),
        }),
        Value::Mapping(map) if map.len() == 1 => {
            let (key, body) = map
                .iter()
                .next()
                .ok_or_else(|| CircletError::invalid(location, "empty job entry"))?;
            let name = key_string(key, location)?;
            let requires = match body.get("requires") {
                Some(Value::Sequence(items)) => items
                    .iter()
                    .map(scalar_to_string)
                    .collect::<CircletResult<Vec<_>>>()?,
                Some(_) => {
                    return Err(CircletError::invalid(
                        format!("{}.{}.requires", location, name),
                        "must be a list",
                    ))
                }
                None => Vec::new(),
            };
            Ok(WorkflowJob { name, requires })
        }
        _ => Err(CircletError::invalid(
            location,
            "job entry must be a name or a single-key mapping",
        )),
    }
}

fn parse_env(value: Option<&Value>, location: &str) -> CircletResult<BTreeMap<String, String>> {
    let Some(value) = value else {
        return Ok(BTreeMap::new());
    };
    let map = value
        .as_mapping()
        .ok_or_else(|| CircletError::invalid(location, "must be a mapping"))?;

    map.iter()
        .map(|(key, value)| {
            Ok::<_, CircletError>((key_string(key, location)?, scalar_to_string(value)?))
        })
        .collect()
}

/// Parse a CircleCI duration: `45s`, `10m`, `1h30m`, or bare seconds
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(secs) = text.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = 0u64;
    let mut digits = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        let amount: u64 = digits.parse().ok()?;
        total = total.checked_add(amount.checked_mul(unit)?)?;
        digits.clear();
    }

    // trailing number without a unit
    if !digits.is_empty() {
        return None;
    }
    Some(Duration::from_secs(total))
}

fn parse_timeout(value: &Value, location: &str) -> CircletResult<Duration> {
    let text = scalar_to_string(value)?;
    parse_duration(&text)
        .ok_or_else(|| CircletError::invalid(location, format!("invalid timeout '{}'", text)))
}

fn optional_string(map: &Mapping, key: &str) -> CircletResult<Option<String>> {
    map.get(key).map(scalar_to_string).transpose()
}

fn key_string(key: &Value, location: &str) -> CircletResult<String> {
    key.as_str()
        .map(str::to_string)
        .ok_or_else(|| CircletError::invalid(location, "keys must be strings"))
}

fn scalar_to_string(value: &Value) -> CircletResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(CircletError::PipelineParse(format!(
            "expected a scalar value, found {:?}",
            value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::document::parse_document;

    fn pipeline(yaml: &str) -> CircletResult<Pipeline> {
        build_pipeline(&parse_document(yaml)?)
    }

    const MUTA: &str = r#"
version: 2
defaults: &defaults
  docker:
    - image: circleci/rust:1.40
  working_directory: ~/muta
  environment:
    RUST_BACKTRACE: 1
restore_registry: &restore_registry
  restore_cache:
    keys:
      - cargo-registry-{{ checksum "Cargo.lock" }}
      - cargo-registry-
jobs:
  build-check:
    <<: *defaults
    steps:
      - *restore_registry
      - run:
          name: Check
          command: cargo check --all
          no_output_timeout: 20m
      - save_cache:
          key: cargo-registry-{{ checksum "Cargo.lock" }}
          paths:
            - ~/.cargo/registry
  passed:
    <<: *defaults
    steps:
      - run: echo passed
workflows:
  version: 2
  ci:
    jobs:
      - build-check
      - passed:
          requires:
            - build-check
"#;

    #[test]
    fn parses_muta_style_document() {
        let p = pipeline(MUTA).unwrap();

        assert_eq!(p.version.as_deref(), Some("2"));
        assert_eq!(p.jobs.len(), 2);

        let job = p.job("build-check").unwrap();
        assert_eq!(job.image.as_deref(), Some("circleci/rust:1.40"));
        assert_eq!(job.working_directory.as_deref(), Some("~/muta"));
        assert_eq!(job.environment.get("RUST_BACKTRACE").map(String::as_str), Some("1"));
        assert_eq!(job.steps.len(), 3);

        match &job.steps[0] {
            Step::RestoreCache(restore) => {
                assert_eq!(restore.cache.fallbacks, vec!["cargo-registry-"]);
            }
            other => panic!("expected restore_cache, got {:?}", other),
        }
        match &job.steps[1] {
            Step::Run(run) => {
                assert_eq!(run.name.as_deref(), Some("Check"));
                assert_eq!(run.timeout, Some(Duration::from_secs(1200)));
            }
            other => panic!("expected run, got {:?}", other),
        }

        let ci = p.workflow("ci").unwrap();
        assert!(p.workflow("version").is_none());
        assert_eq!(ci.entry("passed").unwrap().requires, vec!["build-check"]);
    }

    #[test]
    fn rejects_unknown_step_kind() {
        let err = pipeline("jobs:\n  build:\n    steps:\n      - checkout\n").unwrap_err();
        assert!(matches!(err, CircletError::UnknownStep { kind, .. } if kind == "checkout"));

        let err = pipeline("jobs:\n  build:\n    steps:\n      - deploy: {}\n").unwrap_err();
        assert!(matches!(err, CircletError::UnknownStep { .. }));
    }

    #[test]
    fn rejects_duplicate_job_name() {
        let yaml = "jobs:\n  build:\n    steps: []\n  build:\n    steps: []\n";
        let err = pipeline(yaml).unwrap_err();
        assert!(matches!(err, CircletError::PipelineParse(ref msg) if msg.contains("duplicate")));
    }

    #[test]
    fn rejects_workflow_without_jobs() {
        let yaml = "jobs:\n  build: { steps: [] }\nworkflows:\n  ci:\n    jobs: []\n";
        let err = pipeline(yaml).unwrap_err();
        assert!(err.to_string().contains("at least one job is required"));
        assert!(err.to_string().contains("workflows.ci"));
    }

    #[test]
    fn rejects_duplicate_workflow_entry() {
        let yaml = r#"
jobs:
  build: { steps: [] }
workflows:
  ci:
    jobs: [build, build]
"#;
        assert!(matches!(
            pipeline(yaml).unwrap_err(),
            CircletError::DuplicateJob { .. }
        ));
    }

    #[test]
    fn rejects_missing_jobs() {
        assert!(pipeline("version: 2\n").is_err());
        assert!(pipeline("jobs: {}\n").is_err());
    }

    #[test]
    fn implicit_workflow_for_build_job() {
        let p = pipeline("jobs:\n  build:\n    steps:\n      - run: make\n").unwrap();
        let default = p.workflow(IMPLICIT_WORKFLOW).unwrap();
        assert_eq!(default.jobs.len(), 1);
        assert_eq!(default.jobs[0].name, "build");
    }

    #[test]
    fn restore_single_key_and_run_environment() {
        let yaml = r#"
jobs:
  test:
    steps:
      - restore_cache:
          key: v1-{{ .Branch }}
      - run:
          command: cargo test
          environment:
            RUST_LOG: debug
            THREADS: 4
"#;
        let p = pipeline(yaml).unwrap();
        let job = p.job("test").unwrap();
        match &job.steps[1] {
            Step::Run(run) => {
                assert_eq!(run.environment.get("THREADS").map(String::as_str), Some("4"));
            }
            other => panic!("expected run, got {:?}", other),
        }
        assert_eq!(job.cache_specs().count(), 1);
        assert!(p.workflows.is_empty());
    }

    #[test]
    fn save_cache_requires_paths() {
        let yaml = "jobs:\n  build:\n    steps:\n      - save_cache:\n          key: k\n";
        assert!(pipeline(yaml).is_err());
    }

    #[test]
    fn duration_formats() {
        assert_eq!(parse_duration("45s"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("10m"), Some(Duration::from_secs(600)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("10x"), None);
        assert_eq!(parse_duration("1h30"), None);
        assert_eq!(parse_duration(""), None);
    }
}
