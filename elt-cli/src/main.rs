//! `elt`: commodity ELT pipeline commands.
//!
//! Commands:
//! - `extract`: fetch daily closes from Yahoo Finance and replace the raw table
//! - `symbols`: list the commodity catalog
//! - `manifest pull|push|status`: move the dbt manifest to and from the object store
//! - `transform`: run dbt against `dev` or `prod`
//! - `workflow integration|delivery`: the CI/CD step sequences
//! - `config check|show`: validate or print the effective configuration

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use elt_core::config::PipelineConfig;
use elt_core::data::{
    extract_symbols, normalize, Catalog, CircuitBreaker, LogProgress, YahooProvider,
};
use elt_core::logging::{init_logging, LogConfig};
use elt_core::process::{CommandRunner, ScriptedRunner, SystemRunner};
use elt_core::state::{LocalStore, ManifestState, ManifestSync, ObjectStore, S3CliStore};
use elt_core::transform::{DbtCommand, DbtSubcommand, Target};
use elt_core::warehouse::{MemorySink, PostgresSink, RawSink, RawTable};
use elt_core::workflow::{StepStatus, Workflow, WorkflowReport, WorkflowRunner};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "elt", about = "Commodity ELT pipeline: extract, load, transform")]
struct Cli {
    /// Pipeline config file. Missing file means defaults plus environment.
    #[arg(long, global = true, default_value = "elt.toml")]
    config: PathBuf,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch commodity closes and replace the raw table.
    Extract {
        /// Tickers to extract (e.g. GC=F CL=F), added to any --sector selection.
        #[arg(long, num_args = 1..)]
        symbols: Vec<String>,

        /// Catalog sectors to extract (energy, metals, agriculture).
        #[arg(long, num_args = 1..)]
        sector: Vec<String>,

        /// Start date (YYYY-MM-DD). Defaults to extract.start_date.
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end: Option<String>,

        /// Fetch and validate but do not touch the database.
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Load whatever succeeded even if some symbols failed.
        #[arg(long, default_value_t = false)]
        allow_partial: bool,
    },
    /// List the commodity catalog.
    Symbols {
        /// Print the catalog as TOML, ready to edit and point extract.catalog at.
        #[arg(long, default_value_t = false)]
        toml: bool,
    },
    /// Manage the dbt manifest in the object store.
    Manifest {
        #[command(subcommand)]
        action: ManifestAction,
    },
    /// Run dbt.
    Transform {
        #[arg(long, value_enum, default_value_t = TargetArg::Dev)]
        target: TargetArg,

        #[arg(long, value_enum, default_value_t = DbtArg::Build)]
        command: DbtArg,

        /// Defer to the manifest in state.state_dir and select state:modified+.
        #[arg(long, default_value_t = false)]
        defer: bool,

        /// dbt node selector.
        #[arg(long)]
        select: Option<String>,

        #[arg(long, default_value_t = false)]
        full_refresh: bool,

        /// Print the dbt command instead of running it.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Run a CI/CD workflow.
    Workflow {
        #[arg(value_enum)]
        workflow: WorkflowArg,

        #[arg(long, default_value_t = false)]
        full_refresh: bool,

        /// Print the commands instead of running them. Manifest transfers still
        /// go through a local store if one is configured.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Configuration helpers.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ManifestAction {
    /// Download the stored manifest into state.state_dir.
    Pull,
    /// Upload the manifest from the dbt target directory.
    Push,
    /// Report whether a stored manifest exists.
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate the effective configuration.
    Check,
    /// Print the effective configuration as TOML (secrets omitted).
    Show,
}

#[derive(Clone, Copy, ValueEnum)]
enum TargetArg {
    Dev,
    Prod,
}

impl From<TargetArg> for Target {
    fn from(t: TargetArg) -> Self {
        match t {
            TargetArg::Dev => Target::Dev,
            TargetArg::Prod => Target::Prod,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DbtArg {
    Deps,
    Build,
    Run,
    Test,
    Compile,
}

impl From<DbtArg> for DbtSubcommand {
    fn from(c: DbtArg) -> Self {
        match c {
            DbtArg::Deps => DbtSubcommand::Deps,
            DbtArg::Build => DbtSubcommand::Build,
            DbtArg::Run => DbtSubcommand::Run,
            DbtArg::Test => DbtSubcommand::Test,
            DbtArg::Compile => DbtSubcommand::Compile,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum WorkflowArg {
    Integration,
    Delivery,
}

impl From<WorkflowArg> for Workflow {
    fn from(w: WorkflowArg) -> Self {
        match w {
            WorkflowArg::Integration => Workflow::Integration,
            WorkflowArg::Delivery => Workflow::Delivery,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(LogConfig::from_env().with_verbosity(cli.verbose))
        .context("failed to initialize logging")?;

    let config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Extract {
            symbols,
            sector,
            start,
            end,
            dry_run,
            allow_partial,
        } => run_extract(&config, symbols, sector, start, end, dry_run, allow_partial),
        Commands::Symbols { toml } => run_symbols(&config, toml),
        Commands::Manifest { action } => run_manifest(&config, action),
        Commands::Transform {
            target,
            command,
            defer,
            select,
            full_refresh,
            dry_run,
        } => run_transform(&config, target, command, defer, select, full_refresh, dry_run),
        Commands::Workflow {
            workflow,
            full_refresh,
            dry_run,
        } => run_workflow(&config, workflow.into(), full_refresh, dry_run),
        Commands::Config { action } => match action {
            ConfigAction::Check => {
                println!("configuration OK ({})", cli.config.display());
                Ok(())
            }
            ConfigAction::Show => {
                print!("{}", config.to_toml()?);
                Ok(())
            }
        },
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD"))
}

fn load_catalog(config: &PipelineConfig) -> Result<Catalog> {
    match &config.extract.catalog {
        Some(path) => Catalog::from_file(path).context("loading commodity catalog"),
        None => Ok(Catalog::default_commodities()),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_extract(
    config: &PipelineConfig,
    symbols: Vec<String>,
    sectors: Vec<String>,
    start: Option<String>,
    end: Option<String>,
    dry_run: bool,
    allow_partial: bool,
) -> Result<()> {
    let start_date = start
        .as_deref()
        .map(parse_date)
        .transpose()?
        .unwrap_or(config.extract.start_date);
    let end_date = end
        .as_deref()
        .map(parse_date)
        .transpose()?
        .unwrap_or_else(|| chrono::Local::now().date_naive());
    if start_date > end_date {
        bail!("start date {start_date} is after end date {end_date}");
    }

    // Command-line selection replaces the configured one entirely.
    let (sectors, symbols) = if sectors.is_empty() && symbols.is_empty() {
        (config.extract.sectors.clone(), config.extract.symbols.clone())
    } else {
        (sectors, symbols)
    };
    let selected = load_catalog(config)?.select(&sectors, &symbols)?;
    if selected.is_empty() {
        bail!("no symbols selected");
    }

    let table = RawTable::new(&config.schemas.raw, &config.extract.raw_table)?;
    tracing::info!(
        symbols = selected.len(),
        %start_date,
        %end_date,
        table = %table,
        "extracting"
    );

    let breaker = Arc::new(CircuitBreaker::default_provider());
    let provider = YahooProvider::new(Arc::clone(&breaker))?;
    let sym_refs: Vec<&str> = selected.iter().map(|s| s.as_str()).collect();
    let summary = extract_symbols(&provider, &sym_refs, start_date, end_date, &LogProgress);

    if !summary.all_succeeded() {
        for (sym, err) in &summary.errors {
            tracing::error!(symbol = %sym, error = %err, "extraction failed");
        }
        if !breaker.is_allowed() {
            let cooldown = breaker.remaining_cooldown();
            tracing::error!(
                cooldown_mins = cooldown.as_secs().div_ceil(60),
                "Yahoo Finance is refusing requests; retry after the cooldown"
            );
        }
        if !allow_partial || summary.succeeded == 0 {
            bail!(
                "{}/{} symbols failed; raw table left untouched",
                summary.failed,
                summary.total
            );
        }
        tracing::warn!(
            failed = summary.failed,
            "loading partial extraction (--allow-partial)"
        );
    }

    let (observations, report) = normalize(summary.observations)?;

    let loaded = if dry_run {
        MemorySink::new().replace(&table, &observations)?
    } else {
        PostgresSink::connect(&config.database)?.replace(&table, &observations)?
    };

    println!(
        "{} {} rows into {} ({} duplicates, {} invalid closes dropped){}",
        if dry_run { "Would load" } else { "Loaded" },
        loaded.rows,
        loaded.table,
        report.duplicates,
        report.invalid_closes,
        if dry_run { " [dry run]" } else { "" },
    );
    Ok(())
}

fn run_symbols(config: &PipelineConfig, as_toml: bool) -> Result<()> {
    let catalog = load_catalog(config)?;
    if as_toml {
        print!("{}", catalog.to_toml()?);
        return Ok(());
    }
    println!("{:<12} Symbols", "Sector");
    println!("{}", "-".repeat(58));
    for (sector, symbols) in &catalog.sectors {
        println!("{:<12} {}", sector, symbols.join(" "));
    }
    Ok(())
}

/// Local store when configured, otherwise S3 through the CLI.
fn open_store<'a>(
    config: &'a PipelineConfig,
    runner: &'a dyn CommandRunner,
) -> Result<Box<dyn ObjectStore + 'a>> {
    if let Some(dir) = &config.state.local_store {
        return Ok(Box::new(LocalStore::new(dir)));
    }
    match &config.state.bucket {
        Some(bucket) => Ok(Box::new(S3CliStore::new(
            runner,
            config.state.aws_bin.clone(),
            bucket.clone(),
        ))),
        None => bail!("no object store configured: set state.bucket (or ELT_STATE_BUCKET) or state.local_store"),
    }
}

fn run_manifest(config: &PipelineConfig, action: ManifestAction) -> Result<()> {
    let runner = SystemRunner;
    let store = open_store(config, &runner)?;
    let sync = ManifestSync::new(store.as_ref(), config.state.manifest_key());

    match action {
        ManifestAction::Pull => match sync.pull(&config.state.state_dir)? {
            ManifestState::Present(info) => println!(
                "Pulled {} ({} nodes, blake3 {})",
                info.path.display(),
                info.node_count,
                &info.hash[..12]
            ),
            ManifestState::Missing => {
                println!("No manifest at {}; next build will be full", sync.location())
            }
        },
        ManifestAction::Push => {
            let info = sync.push(&config.transform.target_dir())?;
            println!(
                "Pushed {} ({} nodes) to {}",
                info.path.display(),
                info.node_count,
                sync.location()
            );
        }
        ManifestAction::Status => {
            let present = sync.remote_exists()?;
            println!(
                "{}: {}",
                sync.location(),
                if present { "present" } else { "missing" }
            );
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_transform(
    config: &PipelineConfig,
    target: TargetArg,
    command: DbtArg,
    defer: bool,
    select: Option<String>,
    full_refresh: bool,
    dry_run: bool,
) -> Result<()> {
    let mut dbt = DbtCommand::new(command.into(), target.into()).full_refresh(full_refresh);
    if let Some(selector) = select {
        dbt = dbt.select(selector);
    }
    if defer {
        let manifest = config.state.state_dir.join(elt_core::state::MANIFEST_FILE);
        if !manifest.is_file() {
            bail!(
                "--defer needs {} (run `elt manifest pull` first)",
                manifest.display()
            );
        }
        dbt = dbt.deferred_to(&config.state.state_dir);
    }

    if dry_run {
        println!("{}", dbt.to_spec(config).display());
        return Ok(());
    }

    dbt.run(&SystemRunner, config)?;
    Ok(())
}

fn run_workflow(
    config: &PipelineConfig,
    workflow: Workflow,
    full_refresh: bool,
    dry_run: bool,
) -> Result<()> {
    let system = SystemRunner;
    let scripted = ScriptedRunner::new();
    let runner: &dyn CommandRunner = if dry_run { &scripted } else { &system };

    let store = open_store(config, runner)?;
    let report = WorkflowRunner::new(config, runner, store.as_ref())
        .full_refresh(full_refresh)
        .run(workflow);

    print_report(&report);
    if dry_run {
        println!();
        println!("Commands (dry run):");
        for line in scripted.command_lines() {
            println!("  {line}");
        }
    }

    report.into_result()?;
    Ok(())
}

fn print_report(report: &WorkflowReport) {
    println!();
    println!("=== {} workflow ===", report.workflow);
    for step in &report.steps {
        let status = match &step.status {
            StepStatus::Succeeded => "ok",
            StepStatus::Failed(_) => "FAILED",
            StepStatus::Skipped => "skipped",
        };
        println!(
            "{:<22} {:<8} {:>8.1}s  {}",
            step.step.to_string(),
            status,
            step.elapsed.as_secs_f64(),
            step.detail.as_deref().unwrap_or("")
        );
    }
    println!();
}
