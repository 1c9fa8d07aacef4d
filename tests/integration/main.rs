//! Integration tests for circlet

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn circlet() -> Command {
        cargo_bin_cmd!("circlet")
    }

    /// A project directory with a config that runs steps under /bin/sh
    struct Project {
        dir: TempDir,
    }

    impl Project {
        fn new(pipeline: &str) -> Self {
            let dir = TempDir::new().unwrap();
            fs::create_dir_all(dir.path().join(".circleci")).unwrap();
            fs::write(dir.path().join(".circleci/config.yml"), pipeline).unwrap();
            let cache_dir = dir.path().join("cache-store");
            fs::write(
                dir.path().join("circlet.toml"),
                format!(
                    "[executor]\nshell = [\"/bin/sh\", \"-c\"]\nworkers = 2\n\n[cache]\ndir = {:?}\n",
                    cache_dir.display().to_string()
                ),
            )
            .unwrap();
            Self { dir }
        }

        fn path(&self) -> &Path {
            self.dir.path()
        }

        fn cmd(&self) -> Command {
            let mut cmd = circlet();
            cmd.current_dir(self.path())
                .env("CIRCLET_CONFIG", self.path().join("circlet.toml"))
                .env_remove("CIRCLE_BRANCH")
                .env_remove("CIRCLE_SHA1")
                .arg("--no-local");
            cmd
        }
    }

    const PASSING: &str = r#"
version: 2
jobs:
  build-check:
    steps:
      - run: echo checking
  passed:
    steps:
      - run: echo all good
workflows:
  version: 2
  ci:
    jobs:
      - build-check
      - passed:
          requires: [build-check]
"#;

    const FAILING: &str = r#"
jobs:
  build:
    steps:
      - run:
          name: cargo build
          command: exit 3
  test:
    steps:
      - run: touch test-ran
workflows:
  ci:
    jobs:
      - build
      - test:
          requires: [build]
"#;

    #[test]
    fn help_displays() {
        circlet()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("CircleCI-style pipelines"));
    }

    #[test]
    fn version_displays() {
        circlet()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("circlet"));
    }

    #[test]
    fn validate_accepts_document() {
        let project = Project::new(PASSING);
        project
            .cmd()
            .arg("validate")
            .assert()
            .success()
            .stdout(predicate::str::contains("Pipeline is valid"));
    }

    #[test]
    fn validate_rejects_cycle_with_exit_code_two() {
        let project = Project::new(
            "jobs:\n  a: {steps: []}\n  b: {steps: []}\nworkflows:\n  ci:\n    jobs:\n      - a: {requires: [b]}\n      - b: {requires: [a]}\n",
        );
        project
            .cmd()
            .arg("validate")
            .assert()
            .code(2)
            .stderr(predicate::str::contains("cycle"));
    }

    #[test]
    fn validate_rejects_unknown_step() {
        let project = Project::new("jobs:\n  build:\n    steps:\n      - checkout\n");
        project
            .cmd()
            .arg("validate")
            .assert()
            .code(2)
            .stderr(predicate::str::contains("checkout"));
    }

    #[test]
    fn missing_document_is_reported() {
        let project = Project::new(PASSING);
        project
            .cmd()
            .args(["validate", "--file", "nope.yml"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("not found"));
    }

    #[test]
    fn run_gated_workflow_succeeds() {
        let project = Project::new(PASSING);
        project
            .cmd()
            .arg("run")
            .assert()
            .success()
            .stdout(predicate::str::contains("[passed] all good"));
    }

    #[test]
    fn run_failure_blocks_dependent_and_propagates_exit_code() {
        let project = Project::new(FAILING);
        project
            .cmd()
            .args(["run", "ci"])
            .assert()
            .code(3)
            .stdout(predicate::str::contains("requires build"));
        assert!(!project.path().join("test-ran").exists());
    }

    #[test]
    fn run_single_job() {
        let project = Project::new(FAILING);
        project
            .cmd()
            .args(["run", "--job", "test"])
            .assert()
            .success();
        assert!(project.path().join("test-ran").exists());
    }

    #[test]
    fn run_dry_run_executes_nothing() {
        let project = Project::new(FAILING);
        project
            .cmd()
            .args(["run", "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("LEVEL"));
        assert!(!project.path().join("test-ran").exists());
    }

    #[test]
    fn run_env_override_reaches_steps() {
        let project = Project::new("jobs:\n  build:\n    steps:\n      - run: test \"$MODE\" = local\n");
        project
            .cmd()
            .args(["run", "-e", "MODE=local"])
            .assert()
            .success();
    }

    #[test]
    fn plan_json_lists_order() {
        let project = Project::new(PASSING);
        project
            .cmd()
            .args(["plan", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"order\""))
            .stdout(predicate::str::contains("build-check"));
    }

    #[test]
    fn keys_render_with_branch() {
        let project = Project::new(
            "jobs:\n  build:\n    steps:\n      - restore_cache:\n          keys:\n            - v1-{{ .Branch }}\n            - v1-\n",
        );
        project
            .cmd()
            .args(["keys", "--branch", "dev"])
            .assert()
            .success()
            .stdout(predicate::str::contains("v1-dev"));
    }

    #[test]
    fn keys_see_injected_job_variables() {
        let project = Project::new(
            "jobs:\n  build:\n    steps:\n      - save_cache:\n          key: v1-{{ .Environment.CIRCLE_JOB }}-{{ .Environment.CIRCLE_BRANCH }}\n          paths: [target]\n",
        );
        project
            .cmd()
            .args(["keys", "--branch", "dev"])
            .assert()
            .success()
            .stdout(predicate::str::contains("v1-build-dev"));
    }

    #[test]
    fn second_run_restores_saved_cache() {
        let project = Project::new(
            r#"
jobs:
  build:
    steps:
      - restore_cache:
          keys:
            - target-{{ checksum "Cargo.lock" }}
            - target-
      - run: mkdir -p target && echo built > target/out
      - save_cache:
          key: target-{{ checksum "Cargo.lock" }}
          paths:
            - target
"#,
        );
        fs::write(project.path().join("Cargo.lock"), "# lock").unwrap();

        project
            .cmd()
            .arg("run")
            .assert()
            .success()
            .stdout(predicate::str::contains("Saved cache target-"));
        project
            .cmd()
            .arg("run")
            .assert()
            .success()
            .stdout(predicate::str::contains("Restored cache target-"));
        project
            .cmd()
            .args(["cache", "list", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("target-"));
    }

    #[test]
    fn cache_list_empty() {
        let project = Project::new(PASSING);
        project
            .cmd()
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cache entries found"));
    }

    #[test]
    fn config_path() {
        let project = Project::new(PASSING);
        project
            .cmd()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("circlet.toml"));
    }

    #[test]
    fn config_show() {
        let project = Project::new(PASSING);
        project
            .cmd()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[executor]"))
            .stdout(predicate::str::contains("/bin/sh"));
    }

    #[test]
    fn config_set_rejects_unknown_key() {
        let project = Project::new(PASSING);
        project
            .cmd()
            .args(["config", "set", "vm.name", "x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown config key"));
    }
}
