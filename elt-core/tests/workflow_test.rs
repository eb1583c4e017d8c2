//! CI/CD workflow tests against a local object store and scripted dbt/aws calls.

use elt_core::config::PipelineConfig;
use elt_core::process::{CommandOutput, ScriptedRunner};
use elt_core::state::{LocalStore, ManifestState, ObjectStore, MANIFEST_FILE};
use elt_core::workflow::{Step, StepStatus, Workflow, WorkflowRunner};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const MANIFEST: &str = r#"{"metadata":{"generated_at":"2024-06-01T10:00:00Z"},"nodes":{"model.commodities.stg_commodity_prices":{},"test.commodities.not_null_stg_commodity_prices_symbol":{}}}"#;
const KEY: &str = "dbt/state/manifest.json";

struct Harness {
    dir: TempDir,
    config: PipelineConfig,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.state.local_store = Some(dir.path().join("bucket"));
        config.state.state_dir = dir.path().join("state");
        config.transform.project_dir = dir.path().join("transform");
        config.transform.profiles_dir = dir.path().join("transform");
        Self { dir, config }
    }

    fn store(&self) -> LocalStore {
        LocalStore::new(self.dir.path().join("bucket"))
    }

    fn seed_remote(&self, contents: &str) {
        let src = self.dir.path().join("seed.json");
        fs::write(&src, contents).unwrap();
        self.store().upload(&src, KEY).unwrap();
    }

    /// A runner whose `dbt build` writes a manifest the way dbt does.
    fn building_runner(&self) -> ScriptedRunner {
        let target = self.config.transform.target_dir();
        ScriptedRunner::new().respond_with("dbt build", CommandOutput::ok(), move |_| {
            write_manifest(&target);
        })
    }
}

fn write_manifest(target_dir: &Path) {
    fs::create_dir_all(target_dir).unwrap();
    fs::write(target_dir.join(MANIFEST_FILE), MANIFEST).unwrap();
}

fn build_line(lines: &[String]) -> &str {
    lines
        .iter()
        .find(|l| l.starts_with("dbt build"))
        .map(String::as_str)
        .expect("no dbt build call")
}

#[test]
fn integration_without_manifest_runs_full_build_into_dev() {
    let h = Harness::new();
    let runner = ScriptedRunner::new();
    let store = h.store();

    let report = WorkflowRunner::new(&h.config, &runner, &store).run(Workflow::Integration);

    assert!(report.succeeded(), "{report:?}");
    assert_eq!(report.manifest, Some(ManifestState::Missing));
    let lines = runner.command_lines();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("dbt deps"));
    let build = build_line(&lines);
    assert!(build.contains("--target dev"));
    assert!(!build.contains("--defer"));
    assert!(!build.contains("state:modified+"));
}

#[test]
fn integration_with_manifest_defers_to_pulled_state() {
    let h = Harness::new();
    h.seed_remote(MANIFEST);
    let runner = ScriptedRunner::new();
    let store = h.store();

    let report = WorkflowRunner::new(&h.config, &runner, &store).run(Workflow::Integration);

    assert!(report.succeeded(), "{report:?}");
    match &report.manifest {
        Some(ManifestState::Present(info)) => assert_eq!(info.node_count, 2),
        other => panic!("expected pulled manifest, got {other:?}"),
    }
    let state_dir = h.config.state.state_dir.display().to_string();
    let lines = runner.command_lines();
    let build = build_line(&lines);
    assert!(build.contains("--target dev"));
    assert!(build.contains(&format!("--select state:modified+ --defer --state {state_dir}")));
    assert!(h.config.state.state_dir.join(MANIFEST_FILE).is_file());
    // Integration never publishes state.
    assert!(report.pushed.is_none());
}

#[test]
fn delivery_builds_prod_and_publishes_new_manifest() {
    let h = Harness::new();
    let runner = h.building_runner();
    let store = h.store();
    assert!(!store.exists(KEY).unwrap());

    let report = WorkflowRunner::new(&h.config, &runner, &store).run(Workflow::Delivery);

    assert!(report.succeeded(), "{report:?}");
    assert_eq!(report.steps.len(), 4);
    assert!(build_line(&runner.command_lines()).contains("--target prod"));

    let pushed = report.pushed.as_ref().expect("manifest pushed");
    assert_eq!(pushed.node_count, 2);
    assert!(store.exists(KEY).unwrap());
    let stored = fs::read_to_string(h.dir.path().join("bucket").join(KEY)).unwrap();
    assert_eq!(stored, MANIFEST);
}

#[test]
fn failed_build_skips_manifest_push() {
    let h = Harness::new();
    h.seed_remote(MANIFEST);
    write_manifest(&h.config.transform.target_dir());
    let runner = ScriptedRunner::new().respond(
        "dbt build",
        CommandOutput::exit(1).with_stderr("Database Error in model stg_commodity_prices"),
    );
    let store = h.store();

    let report = WorkflowRunner::new(&h.config, &runner, &store)
        .full_refresh(true)
        .run(Workflow::Delivery);

    assert!(!report.succeeded());
    let failed = report.failed_step().unwrap();
    assert_eq!(failed.step, Step::Build);
    assert!(matches!(&failed.status, StepStatus::Failed(msg) if msg.contains("Database Error")));
    assert_eq!(report.steps[3].step, Step::PushManifest);
    assert_eq!(report.steps[3].status, StepStatus::Skipped);
    assert!(build_line(&runner.command_lines()).ends_with("--full-refresh"));

    let err = report.into_result().unwrap_err();
    assert!(err.to_string().starts_with("delivery workflow failed at 'dbt build'"));
}

#[test]
fn failed_deps_skips_everything_after() {
    let h = Harness::new();
    let runner = ScriptedRunner::new().respond("dbt deps", CommandOutput::exit(2));
    let store = h.store();

    let report = WorkflowRunner::new(&h.config, &runner, &store).run(Workflow::Integration);

    let statuses: Vec<&StepStatus> = report.steps.iter().map(|s| &s.status).collect();
    assert!(matches!(statuses[0], StepStatus::Failed(_)));
    assert_eq!(statuses[1], &StepStatus::Skipped);
    assert_eq!(statuses[2], &StepStatus::Skipped);
    assert_eq!(runner.command_lines().len(), 1);
    assert!(report.manifest.is_none());
}

#[test]
fn corrupt_stored_manifest_is_quarantined_and_build_is_full() {
    let h = Harness::new();
    h.seed_remote("{\"nodes\": trunc");
    let runner = ScriptedRunner::new();
    let store = h.store();

    let report = WorkflowRunner::new(&h.config, &runner, &store).run(Workflow::Integration);

    assert!(report.succeeded(), "{report:?}");
    assert_eq!(report.manifest, Some(ManifestState::Missing));
    assert!(!build_line(&runner.command_lines()).contains("--defer"));
    let state_dir = &h.config.state.state_dir;
    assert!(!state_dir.join(MANIFEST_FILE).exists());
    assert!(state_dir.join("manifest.json.quarantined").exists());
}

#[test]
fn delivery_without_build_output_fails_at_push() {
    let h = Harness::new();
    let runner = ScriptedRunner::new();
    let store = h.store();

    let report = WorkflowRunner::new(&h.config, &runner, &store).run(Workflow::Delivery);

    assert_eq!(report.failed_step().map(|s| s.step), Some(Step::PushManifest));
    assert!(!store.exists(KEY).unwrap());
}
