//! dbt invocations.
//!
//! The transformation itself lives in the dbt project (`transform/`); this
//! module only decides how dbt is called. Connection settings reach dbt as
//! `DBT_*` environment variables read by `profiles.yml`.

use crate::config::PipelineConfig;
use crate::process::{CommandRunner, CommandSpec, ProcessError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// dbt target, which is also the schema models are built into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Dev,
    Prod,
}

impl Target {
    pub fn name(&self) -> &'static str {
        match self {
            Target::Dev => "dev",
            Target::Prod => "prod",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Target::Dev),
            "prod" => Ok(Target::Prod),
            other => Err(format!("unknown target '{other}' (expected dev or prod)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbtSubcommand {
    Deps,
    Build,
    Run,
    Test,
    Compile,
}

impl DbtSubcommand {
    fn as_str(&self) -> &'static str {
        match self {
            DbtSubcommand::Deps => "deps",
            DbtSubcommand::Build => "build",
            DbtSubcommand::Run => "run",
            DbtSubcommand::Test => "test",
            DbtSubcommand::Compile => "compile",
        }
    }

    fn takes_target(&self) -> bool {
        !matches!(self, DbtSubcommand::Deps)
    }
}

/// One dbt call.
#[derive(Debug, Clone)]
pub struct DbtCommand {
    subcommand: DbtSubcommand,
    target: Target,
    state_dir: Option<PathBuf>,
    select: Option<String>,
    full_refresh: bool,
}

impl DbtCommand {
    pub fn new(subcommand: DbtSubcommand, target: Target) -> Self {
        Self {
            subcommand,
            target,
            state_dir: None,
            select: None,
            full_refresh: false,
        }
    }

    /// Build only what changed against the manifest in `state_dir`, deferring
    /// unchanged upstream references to it.
    pub fn deferred_to(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(state_dir.into());
        self
    }

    pub fn select(mut self, selector: impl Into<String>) -> Self {
        self.select = Some(selector.into());
        self
    }

    pub fn full_refresh(mut self, yes: bool) -> Self {
        self.full_refresh = yes;
        self
    }

    pub fn is_deferred(&self) -> bool {
        self.state_dir.is_some()
    }

    pub fn to_spec(&self, config: &PipelineConfig) -> CommandSpec {
        let t = &config.transform;
        let mut spec = CommandSpec::new(&t.dbt_bin)
            .arg(self.subcommand.as_str())
            .arg("--project-dir")
            .arg(t.project_dir.display().to_string())
            .arg("--profiles-dir")
            .arg(t.profiles_dir.display().to_string());

        if self.subcommand.takes_target() {
            spec = spec.args(["--target", self.target.name()]);
            if let Some(threads) = t.threads {
                spec = spec.arg("--threads").arg(threads.to_string());
            }
        }

        match (&self.select, &self.state_dir) {
            (Some(selector), _) => spec = spec.args(["--select", selector.as_str()]),
            (None, Some(_)) => spec = spec.args(["--select", "state:modified+"]),
            (None, None) => {}
        }

        if let Some(dir) = &self.state_dir {
            spec = spec
                .arg("--defer")
                .arg("--state")
                .arg(dir.display().to_string());
        }

        if self.full_refresh {
            spec = spec.arg("--full-refresh");
        }

        with_connection_env(spec, config)
    }

    pub fn run(&self, runner: &dyn CommandRunner, config: &PipelineConfig) -> Result<(), ProcessError> {
        let spec = self.to_spec(config);
        tracing::info!(
            command = %spec.display(),
            target = %self.target,
            deferred = self.is_deferred(),
            "running dbt"
        );
        runner.run(&spec)?.check(&spec)?;
        Ok(())
    }
}

fn with_connection_env(spec: CommandSpec, config: &PipelineConfig) -> CommandSpec {
    let db = &config.database;
    let schemas = &config.schemas;
    let spec = spec
        .env("DBT_HOST", &db.host)
        .env("DBT_PORT", db.port.to_string())
        .env("DBT_USER", &db.user)
        .env("DBT_DBNAME", &db.name)
        .env("DBT_RAW_SCHEMA", &schemas.raw)
        .env("DBT_DEV_SCHEMA", &schemas.dev)
        .env("DBT_PROD_SCHEMA", &schemas.prod)
        .env("DBT_RAW_TABLE", &config.extract.raw_table);
    match &db.password {
        Some(password) => spec.env("DBT_PASSWORD", password),
        None => spec,
    }
}
