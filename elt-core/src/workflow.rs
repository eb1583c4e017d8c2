//! CI/CD workflows: the fixed step sequences run on pull requests and on
//! pushes to main.
//!
//! Integration (pull request → main):
//!   install dbt packages → pull manifest → build into `dev`
//!
//! Delivery (push → main):
//!   install dbt packages → pull manifest → build into `prod` → push manifest
//!
//! The build is deferred against the pulled manifest when one exists and is a
//! full build otherwise. The first failing step stops the run; later steps are
//! reported as skipped.

use crate::config::PipelineConfig;
use crate::process::CommandRunner;
use crate::state::{ManifestInfo, ManifestState, ManifestSync, ObjectStore};
use crate::transform::{DbtCommand, DbtSubcommand, Target};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workflow {
    Integration,
    Delivery,
}

impl Workflow {
    pub fn name(&self) -> &'static str {
        match self {
            Workflow::Integration => "integration",
            Workflow::Delivery => "delivery",
        }
    }

    pub fn target(&self) -> Target {
        match self {
            Workflow::Integration => Target::Dev,
            Workflow::Delivery => Target::Prod,
        }
    }

    pub fn steps(&self) -> &'static [Step] {
        match self {
            Workflow::Integration => &[Step::InstallDeps, Step::PullManifest, Step::Build],
            Workflow::Delivery => &[
                Step::InstallDeps,
                Step::PullManifest,
                Step::Build,
                Step::PushManifest,
            ],
        }
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    InstallDeps,
    PullManifest,
    Build,
    PushManifest,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::InstallDeps => "install dbt packages",
            Step::PullManifest => "pull manifest",
            Step::Build => "dbt build",
            Step::PushManifest => "push manifest",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    Failed(String),
    Skipped,
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: Step,
    pub status: StepStatus,
    pub elapsed: Duration,
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub workflow: Workflow,
    pub steps: Vec<StepReport>,
    pub manifest: Option<ManifestState>,
    pub pushed: Option<ManifestInfo>,
}

impl WorkflowReport {
    pub fn succeeded(&self) -> bool {
        self.steps
            .iter()
            .all(|s| s.status == StepStatus::Succeeded)
    }

    pub fn failed_step(&self) -> Option<&StepReport> {
        self.steps
            .iter()
            .find(|s| matches!(s.status, StepStatus::Failed(_)))
    }

    pub fn into_result(self) -> Result<Self, WorkflowError> {
        match self.failed_step() {
            Some(StepReport {
                step,
                status: StepStatus::Failed(message),
                ..
            }) => Err(WorkflowError::StepFailed {
                workflow: self.workflow,
                step: *step,
                message: message.clone(),
            }),
            _ => Ok(self),
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{workflow} workflow failed at '{step}': {message}")]
    StepFailed {
        workflow: Workflow,
        step: Step,
        message: String,
    },
}

pub struct WorkflowRunner<'a> {
    config: &'a PipelineConfig,
    runner: &'a dyn CommandRunner,
    store: &'a dyn ObjectStore,
    full_refresh: bool,
}

impl<'a> WorkflowRunner<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        runner: &'a dyn CommandRunner,
        store: &'a dyn ObjectStore,
    ) -> Self {
        Self {
            config,
            runner,
            store,
            full_refresh: false,
        }
    }

    pub fn full_refresh(mut self, yes: bool) -> Self {
        self.full_refresh = yes;
        self
    }

    pub fn run(&self, workflow: Workflow) -> WorkflowReport {
        let span = tracing::info_span!("workflow", name = workflow.name());
        let _enter = span.enter();

        let mut report = WorkflowReport {
            workflow,
            steps: Vec::with_capacity(workflow.steps().len()),
            manifest: None,
            pushed: None,
        };
        let mut halted = false;

        for &step in workflow.steps() {
            if halted {
                report.steps.push(StepReport {
                    step,
                    status: StepStatus::Skipped,
                    elapsed: Duration::ZERO,
                    detail: None,
                });
                continue;
            }

            tracing::info!(%step, "step started");
            let started = Instant::now();
            let outcome = self.run_step(workflow, step, &mut report);
            let elapsed = started.elapsed();

            let (status, detail) = match outcome {
                Ok(detail) => {
                    tracing::info!(%step, ?elapsed, "step succeeded");
                    (StepStatus::Succeeded, detail)
                }
                Err(message) => {
                    tracing::error!(%step, ?elapsed, error = %message, "step failed");
                    halted = true;
                    (StepStatus::Failed(message), None)
                }
            };

            report.steps.push(StepReport {
                step,
                status,
                elapsed,
                detail,
            });
        }

        report
    }

    fn run_step(
        &self,
        workflow: Workflow,
        step: Step,
        report: &mut WorkflowReport,
    ) -> Result<Option<String>, String> {
        let sync = ManifestSync::new(self.store, self.config.state.manifest_key());
        let state_dir = &self.config.state.state_dir;

        match step {
            Step::InstallDeps => {
                DbtCommand::new(DbtSubcommand::Deps, workflow.target())
                    .run(self.runner, self.config)
                    .map_err(|e| e.to_string())?;
                Ok(None)
            }
            Step::PullManifest => {
                let state = sync.pull(state_dir).map_err(|e| e.to_string())?;
                let detail = match &state {
                    ManifestState::Present(info) => {
                        format!("{} nodes from {}", info.node_count, sync.location())
                    }
                    ManifestState::Missing => "no manifest, full build".to_string(),
                };
                report.manifest = Some(state);
                Ok(Some(detail))
            }
            Step::Build => {
                let deferred = report
                    .manifest
                    .as_ref()
                    .is_some_and(ManifestState::is_present);
                let mut build = DbtCommand::new(DbtSubcommand::Build, workflow.target())
                    .full_refresh(self.full_refresh);
                if deferred {
                    build = build.deferred_to(state_dir);
                }
                build
                    .run(self.runner, self.config)
                    .map_err(|e| e.to_string())?;
                Ok(Some(if deferred {
                    "state:modified+ (deferred)".to_string()
                } else {
                    "full build".to_string()
                }))
            }
            Step::PushManifest => {
                let info = sync
                    .push(&self.config.transform.target_dir())
                    .map_err(|e| e.to_string())?;
                let detail = format!("{} nodes to {}", info.node_count, sync.location());
                report.pushed = Some(info);
                Ok(Some(detail))
            }
        }
    }
}
