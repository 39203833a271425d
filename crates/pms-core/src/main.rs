//! pms-core command line.
//!
//! Commands write their payload to stdout (pretty JSON by default, a
//! one-line summary with `--format summary`) and log to stderr.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use pms_common::{Error, OutputFormat, StructuredError};
use pms_config::{load_settings, ResolvedSettings, Rounding, SettingsSnapshot, CONFIG_SCHEMA_VERSION};
use pms_core::design::{materialize_plans, Design};
use pms_core::estimate::EstimationRule;
use pms_core::exit_codes::ExitCode;
use pms_core::fixtures::{generate_synthetic_chain, SyntheticChainConfig};
use pms_core::inference::{MetropolisSampler, PosteriorRequest, PosteriorSampler};
use pms_core::logging::{
    event_names, generate_run_id, init_logging, LogConfig, LogFormat, LogLevel, Stage,
};
use pms_core::loss::loss_from_spec;
use pms_core::model::PriorData;
use pms_core::scenario::{DesignFile, Scenario, SCENARIO_SCHEMA_VERSION};
use pms_core::utility::{
    compare_designs, estimate_design_utility, sweep_budgets, UtilityOptions, UtilityReport,
};
use serde::Serialize;
use tracing::{error, info, info_span, warn};

/// Bayesian utility of supply-chain sampling designs
#[derive(Parser)]
#[command(name = "pms-core")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

#[derive(Args, Debug)]
struct GlobalOpts {
    /// Settings file (takes precedence over PMS_SETTINGS and config dirs)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "json")]
    format: OutputFormat,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log format on stderr: human or jsonl
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Prefix human log lines with a timestamp (JSONL always carries `ts`)
    #[arg(long, global = true)]
    log_timestamps: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a synthetic scenario, with current-belief draws
    Synth(SynthArgs),
    /// Discretize a design at one or more budgets
    Plan(PlanArgs),
    /// Print the balanced design for additional tests
    Balance(BalanceArgs),
    /// Estimate the expected loss of one design at one budget
    Utility(UtilityArgs),
    /// Estimate expected loss over several budgets
    Sweep(SweepArgs),
    /// Rank standard and user-supplied designs at one budget
    Compare(CompareArgs),
    /// Validate settings and, optionally, a scenario file
    Check(CheckArgs),
    /// Print version information
    Version,
}

#[derive(Args, Debug)]
struct SynthArgs {
    #[arg(long, default_value = "3")]
    supply_nodes: usize,

    #[arg(long, default_value = "4")]
    test_nodes: usize,

    /// Tests already run on the chain
    #[arg(long, default_value = "100")]
    samples: u64,

    #[arg(long, default_value = "1.0")]
    sens: f64,

    #[arg(long, default_value = "1.0")]
    spec: f64,

    #[arg(long, default_value = "1")]
    seed: u64,

    /// Skip sampling current-belief draws
    #[arg(long)]
    no_draws: bool,

    /// Write the scenario here instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DesignArgs {
    /// Design file: {"test_nodes": [...]} or {"traces": [[...]]}
    #[arg(long, conflicts_with_all = ["balanced", "trace"])]
    design: Option<PathBuf>,

    /// Balance toward equal tests per trace (uses the largest budget)
    #[arg(long, conflicts_with = "trace")]
    balanced: bool,

    /// Put every test on one trace, given as TN,SN
    #[arg(long, value_delimiter = ',')]
    trace: Option<Vec<usize>>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Simulated futures (overrides settings)
    #[arg(long)]
    omega: Option<usize>,

    /// Base seed (overrides settings)
    #[arg(long)]
    seed: Option<u64>,

    /// Run futures on the calling thread
    #[arg(long)]
    sequential: bool,

    /// Estimation rule: mean, majority[:t] or median (overrides settings)
    #[arg(long)]
    estimate: Option<EstimationRule>,
}

#[derive(Args, Debug)]
struct PlanArgs {
    #[arg(long)]
    scenario: PathBuf,

    #[command(flatten)]
    design: DesignArgs,

    /// Budget levels; repeat or separate with commas
    #[arg(long, required = true, value_delimiter = ',')]
    budget: Vec<u64>,

    /// Rounding policy: low or high (overrides settings)
    #[arg(long)]
    rounding: Option<Rounding>,
}

#[derive(Args, Debug)]
struct BalanceArgs {
    #[arg(long)]
    scenario: PathBuf,

    /// Additional tests to allocate
    #[arg(long)]
    ntilde: u64,
}

#[derive(Args, Debug)]
struct UtilityArgs {
    #[arg(long)]
    scenario: PathBuf,

    #[command(flatten)]
    design: DesignArgs,

    #[arg(long)]
    budget: u64,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args, Debug)]
struct SweepArgs {
    #[arg(long)]
    scenario: PathBuf,

    #[command(flatten)]
    design: DesignArgs,

    #[arg(long, required = true, value_delimiter = ',')]
    budget: Vec<u64>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args, Debug)]
struct CompareArgs {
    #[arg(long)]
    scenario: PathBuf,

    #[arg(long)]
    budget: u64,

    /// Extra design files to include
    #[arg(long = "design")]
    designs: Vec<PathBuf>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args, Debug)]
struct CheckArgs {
    #[arg(long)]
    scenario: Option<PathBuf>,
}

/// Shared state for one invocation.
struct RunContext<'a> {
    global: &'a GlobalOpts,
    run_id: String,
    resolved: ResolvedSettings,
    snapshot: SettingsSnapshot,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    schema_version: &'static str,
    command: &'a str,
    run_id: &'a str,
    generated_at: String,
    settings: &'a SettingsSnapshot,
    result: T,
}

impl RunContext<'_> {
    fn sampler(&self) -> MetropolisSampler {
        MetropolisSampler::new(
            self.resolved.settings.mcmc.clone(),
            self.resolved.settings.prior.clone(),
        )
    }

    fn options(&self, run: &RunArgs) -> UtilityOptions {
        let mut options = UtilityOptions::from_settings(&self.resolved.settings.utility);
        if let Some(omega) = run.omega {
            options.omega_count = omega;
        }
        options.base_seed = self.seed(run);
        if run.sequential {
            options.parallel = false;
        }
        options
    }

    /// `--seed` when given, the configured base seed otherwise.
    fn seed(&self, run: &RunArgs) -> u64 {
        run.seed.unwrap_or(self.resolved.settings.utility.base_seed)
    }

    fn rule(&self, run: &RunArgs) -> EstimationRule {
        run.estimate
            .unwrap_or_else(|| EstimationRule::from(&self.resolved.settings.estimate))
    }

    /// Print the payload in the selected format.
    fn emit<T: Serialize>(
        &self,
        command: &str,
        result: T,
        summary: impl FnOnce(&T) -> String,
    ) -> Result<(), Error> {
        let _stage = info_span!("report", stage = %Stage::Report).entered();
        match self.global.format {
            OutputFormat::Json => {
                let envelope = Envelope {
                    schema_version: CONFIG_SCHEMA_VERSION,
                    command,
                    run_id: &self.run_id,
                    generated_at: chrono::Utc::now().to_rfc3339(),
                    settings: &self.snapshot,
                    result,
                };
                println!("{}", serde_json::to_string_pretty(&envelope)?);
            }
            OutputFormat::Summary => println!("{}", summary(&result)),
        }
        Ok(())
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                ExitCode::ArgsError
            } else {
                ExitCode::Ok
            };
            let _ = err.print();
            std::process::exit(code.as_i32());
        }
    };

    let base = LogConfig::from_env(None, cli.global.log_format);
    let level = LogLevel::from_verbosity(base.level, cli.global.verbose, cli.global.quiet);
    init_logging(
        &base
            .with_level(level)
            .with_timestamps(cli.global.log_timestamps),
    );

    let code = match run(&cli) {
        Ok(()) => ExitCode::Ok,
        Err(err) => {
            let code = ExitCode::for_error(&err);
            if code == ExitCode::InternalError {
                error!(target: event_names::INTERNAL_ERROR, error = %err, "run failed");
            }
            report_error(&cli.global, &err);
            code
        }
    };
    std::process::exit(code.as_i32());
}

fn report_error(global: &GlobalOpts, err: &Error) {
    match global.format {
        OutputFormat::Json => {
            let structured = StructuredError::from(err);
            match serde_json::to_string_pretty(&structured) {
                Ok(json) => eprintln!("{json}"),
                Err(_) => eprintln!("{}", StructuredError::human(err)),
            }
        }
        OutputFormat::Summary => eprintln!("{}", StructuredError::human(err)),
    }
}

fn run(cli: &Cli) -> Result<(), Error> {
    if let Commands::Version = cli.command {
        print_version(&cli.global);
        return Ok(());
    }

    let run_id = generate_run_id();
    let span = info_span!("run", run_id = %run_id, stage = %Stage::Init);
    let _guard = span.enter();
    info!(
        target: event_names::RUN_STARTED,
        version = env!("CARGO_PKG_VERSION"),
        "run started"
    );

    let resolved = load_settings(cli.global.config.as_deref())?;
    match &resolved.path {
        Some(path) => info!(
            target: event_names::CONFIG_LOADED,
            path = %path.display(),
            source = %resolved.source,
            "settings loaded"
        ),
        None => info!(target: event_names::CONFIG_DEFAULT_USED, "using built-in settings"),
    }
    let snapshot = SettingsSnapshot::from_resolved(&resolved);
    let ctx = RunContext {
        global: &cli.global,
        run_id,
        resolved,
        snapshot,
    };

    let result = match &cli.command {
        Commands::Synth(args) => run_synth(&ctx, args),
        Commands::Plan(args) => run_plan(&ctx, args),
        Commands::Balance(args) => run_balance(&ctx, args),
        Commands::Utility(args) => run_utility(&ctx, args),
        Commands::Sweep(args) => run_sweep(&ctx, args),
        Commands::Compare(args) => run_compare(&ctx, args),
        Commands::Check(args) => run_check(&ctx, args),
        Commands::Version => Ok(()),
    };
    info!(target: event_names::RUN_FINISHED, ok = result.is_ok(), "run finished");
    result
}

fn print_version(global: &GlobalOpts) {
    match global.format {
        OutputFormat::Json => {
            let info = serde_json::json!({
                "pms_core_version": env!("CARGO_PKG_VERSION"),
                "settings_schema_version": CONFIG_SCHEMA_VERSION,
                "scenario_schema_version": SCENARIO_SCHEMA_VERSION,
            });
            println!("{info:#}");
        }
        OutputFormat::Summary => println!("pms-core {}", env!("CARGO_PKG_VERSION")),
    }
}

fn load_scenario(path: &Path) -> Result<Scenario, Error> {
    let scenario = Scenario::load(path)?;
    let shape = scenario.shape();
    info!(
        target: event_names::SCENARIO_LOADED,
        path = %path.display(),
        test_nodes = shape.num_test_nodes,
        supply_nodes = shape.num_supply_nodes,
        tests = scenario.observations.total_tests(),
        "scenario loaded"
    );
    Ok(scenario)
}

/// Prior data from the scenario's draws, sampling them when absent.
fn current_belief(ctx: &RunContext<'_>, scenario: &Scenario, run: &RunArgs) -> Result<PriorData, Error> {
    let draws = match &scenario.draws {
        Some(draws) => draws.clone(),
        None => {
            let _stage = info_span!("prior", stage = %Stage::Refit).entered();
            let request = PosteriorRequest {
                n: scenario.observations.n(),
                y: scenario.observations.y(),
                sens: scenario.sens,
                spec: scenario.spec,
                seed: ctx.seed(run),
                deadline: None,
            };
            let draws = ctx.sampler().sample(&request)?;
            info!(
                target: event_names::PRIOR_REFRESHED,
                draws = draws.num_draws(),
                "current belief sampled"
            );
            draws
        }
    };
    Ok(scenario.prior_data(draws)?)
}

fn select_design(args: &DesignArgs, scenario: &Scenario, budget: u64) -> Result<Design, Error> {
    if let Some(path) = &args.design {
        return Ok(DesignFile::load(path)?);
    }
    if let Some(trace) = &args.trace {
        let [tn, sn] = trace.as_slice() else {
            return Err(Error::InvalidDesign(
                "--trace expects two indices: TN,SN".to_string(),
            ));
        };
        return Ok(Design::single_trace(scenario.shape(), *tn, *sn)?);
    }
    if args.balanced {
        return Ok(Design::balanced(scenario.observations.n(), budget)?);
    }
    Ok(Design::uniform_traces(scenario.shape()))
}

#[derive(Serialize)]
struct SynthResult {
    path: Option<String>,
    test_nodes: usize,
    supply_nodes: usize,
    total_tests: u64,
    num_draws: usize,
}

fn run_synth(ctx: &RunContext<'_>, args: &SynthArgs) -> Result<(), Error> {
    let config = SyntheticChainConfig {
        num_supply_nodes: args.supply_nodes,
        num_test_nodes: args.test_nodes,
        sens: args.sens,
        spec: args.spec,
        num_samples: args.samples,
        seed: args.seed,
        true_rates: None,
    };
    let chain = generate_synthetic_chain(&config)?;
    let draws = if args.no_draws {
        None
    } else {
        let request = PosteriorRequest {
            n: chain.observations.n(),
            y: chain.observations.y(),
            sens: chain.sens,
            spec: chain.spec,
            seed: args.seed,
            deadline: None,
        };
        Some(ctx.sampler().sample(&request)?)
    };
    let mut scenario = Scenario::from_chain(chain, draws);
    scenario.description = Some(format!(
        "synthetic chain: {} test nodes, {} supply nodes, seed {}",
        args.test_nodes, args.supply_nodes, args.seed
    ));
    let json = scenario.to_json_pretty()?;

    let Some(path) = &args.output else {
        println!("{json}");
        return Ok(());
    };
    std::fs::write(path, json)?;
    let result = SynthResult {
        path: Some(path.display().to_string()),
        test_nodes: args.test_nodes,
        supply_nodes: args.supply_nodes,
        total_tests: scenario.observations.total_tests(),
        num_draws: scenario.draws.as_ref().map_or(0, |d| d.num_draws()),
    };
    ctx.emit("synth", result, |r| {
        format!(
            "wrote {}: {}x{} chain, {} tests, {} draws",
            path.display(),
            r.test_nodes,
            r.supply_nodes,
            r.total_tests,
            r.num_draws
        )
    })
}

#[derive(Serialize)]
struct PlanResult {
    budgets: Vec<u64>,
    rounding: String,
    /// One row per cell, one column per budget.
    plans: Vec<Vec<u64>>,
}

fn run_plan(ctx: &RunContext<'_>, args: &PlanArgs) -> Result<(), Error> {
    let scenario = load_scenario(&args.scenario)?;
    let largest = args.budget.iter().copied().max().unwrap_or(0);
    let design = select_design(&args.design, &scenario, largest)?;
    design.validate(scenario.shape())?;
    let rounding = args
        .rounding
        .unwrap_or(ctx.resolved.settings.utility.rounding);

    let _stage = info_span!("plan", stage = %Stage::Plan).entered();
    let plans = materialize_plans(&design, &args.budget, rounding)?;
    let result = PlanResult {
        budgets: args.budget.clone(),
        rounding: rounding.to_string(),
        plans: plans.rows().into_iter().map(|r| r.to_vec()).collect(),
    };
    ctx.emit("plan", result, |r| {
        format!(
            "{} cells x {} budgets ({} rounding)",
            r.plans.len(),
            r.budgets.len(),
            r.rounding
        )
    })
}

#[derive(Serialize)]
struct BalanceResult {
    ntilde: u64,
    design: DesignFile,
}

fn run_balance(ctx: &RunContext<'_>, args: &BalanceArgs) -> Result<(), Error> {
    let scenario = load_scenario(&args.scenario)?;
    let design = Design::balanced(scenario.observations.n(), args.ntilde)?;
    let result = BalanceResult {
        ntilde: args.ntilde,
        design: DesignFile::from_design(&design),
    };
    ctx.emit("balance", result, |r| {
        let nonzero = design.weights().iter().filter(|w| **w > 0.0).count();
        format!(
            "balanced design for {} more tests: {} of {} traces receive tests",
            r.ntilde,
            nonzero,
            design.len()
        )
    })
}

#[derive(Serialize)]
struct UtilityResult {
    loss: &'static str,
    rule: String,
    sampler: String,
    #[serde(flatten)]
    estimate: UtilityReport,
}

fn run_utility(ctx: &RunContext<'_>, args: &UtilityArgs) -> Result<(), Error> {
    let scenario = load_scenario(&args.scenario)?;
    let prior = current_belief(ctx, &scenario, &args.run)?;
    let design = select_design(&args.design, &scenario, args.budget)?;
    let loss = loss_from_spec(&ctx.resolved.settings.loss);
    let rule = ctx.rule(&args.run);
    let sampler = ctx.sampler();

    let estimate = estimate_design_utility(
        &prior,
        &design,
        args.budget,
        loss.as_ref(),
        &rule,
        &sampler,
        &ctx.options(&args.run),
    )?;
    let result = UtilityResult {
        loss: loss.name(),
        rule: rule.to_string(),
        sampler: sampler.name().to_string(),
        estimate: estimate.report(),
    };
    ctx.emit("utility", result, |r| {
        format!(
            "budget {}: {} loss {:.4} ± {:.4} (failed futures {}/{})",
            r.estimate.num_tests,
            r.loss,
            r.estimate.mean,
            2.0 * r.estimate.std,
            r.estimate.failure_count,
            r.estimate.omega_count
        )
    })
}

#[derive(Serialize)]
struct SweepResult {
    loss: &'static str,
    #[serde(flatten)]
    sweep: pms_core::utility::BudgetSweep,
    plans: Vec<Vec<u64>>,
}

fn run_sweep(ctx: &RunContext<'_>, args: &SweepArgs) -> Result<(), Error> {
    let scenario = load_scenario(&args.scenario)?;
    let prior = current_belief(ctx, &scenario, &args.run)?;
    let largest = args.budget.iter().copied().max().unwrap_or(0);
    let design = select_design(&args.design, &scenario, largest)?;
    let loss = loss_from_spec(&ctx.resolved.settings.loss);
    let options = ctx.options(&args.run);

    let sweep = sweep_budgets(
        &prior,
        &design,
        &args.budget,
        loss.as_ref(),
        &ctx.rule(&args.run),
        &ctx.sampler(),
        &options,
    )?;
    let plans = materialize_plans(&design, &args.budget, options.rounding)?;
    let result = SweepResult {
        loss: loss.name(),
        sweep,
        plans: plans.rows().into_iter().map(|r| r.to_vec()).collect(),
    };
    ctx.emit("sweep", result, |r| {
        let steps: Vec<String> = r
            .sweep
            .budgets
            .iter()
            .zip(&r.sweep.means)
            .map(|(b, m)| format!("{b}:{m:.4}"))
            .collect();
        format!("{} loss by budget {}", r.loss, steps.join(" "))
    })
}

#[derive(Serialize)]
struct RankedDesign {
    name: String,
    #[serde(flatten)]
    estimate: UtilityReport,
}

fn run_compare(ctx: &RunContext<'_>, args: &CompareArgs) -> Result<(), Error> {
    let scenario = load_scenario(&args.scenario)?;
    let prior = current_belief(ctx, &scenario, &args.run)?;

    let mut designs = vec![(
        "uniform_traces".to_string(),
        Design::uniform_traces(scenario.shape()),
    )];
    if scenario.sourcing.is_some() {
        designs.push((
            "uniform_test_nodes".to_string(),
            Design::uniform_test_nodes(scenario.shape().num_test_nodes),
        ));
    }
    match Design::balanced(scenario.observations.n(), args.budget) {
        Ok(design) => designs.push(("balanced".to_string(), design)),
        Err(err) => warn!(error = %err, "skipping balanced design"),
    }
    for path in &args.designs {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        designs.push((name, DesignFile::load(path)?));
    }

    let loss = loss_from_spec(&ctx.resolved.settings.loss);
    let ranked = compare_designs(
        &prior,
        &designs,
        args.budget,
        loss.as_ref(),
        &ctx.rule(&args.run),
        &ctx.sampler(),
        &ctx.options(&args.run),
    )?;
    let result: Vec<RankedDesign> = ranked
        .into_iter()
        .map(|c| RankedDesign {
            name: c.name,
            estimate: c.estimate.report(),
        })
        .collect();
    ctx.emit("compare", result, |r| {
        r.iter()
            .enumerate()
            .map(|(i, d)| format!("{}. {} {:.4}", i + 1, d.name, d.estimate.mean))
            .collect::<Vec<_>>()
            .join("  ")
    })
}

#[derive(Serialize)]
struct ScenarioSummary {
    path: String,
    test_nodes: usize,
    supply_nodes: usize,
    total_tests: u64,
    total_positives: u64,
    has_sourcing: bool,
    num_draws: Option<usize>,
}

#[derive(Serialize)]
struct CheckResult {
    settings_ok: bool,
    scenario: Option<ScenarioSummary>,
}

fn run_check(ctx: &RunContext<'_>, args: &CheckArgs) -> Result<(), Error> {
    let scenario = match &args.scenario {
        Some(path) => {
            let s = load_scenario(path)?;
            let shape = s.shape();
            Some(ScenarioSummary {
                path: path.display().to_string(),
                test_nodes: shape.num_test_nodes,
                supply_nodes: shape.num_supply_nodes,
                total_tests: s.observations.total_tests(),
                total_positives: s.observations.y().sum(),
                has_sourcing: s.sourcing.is_some(),
                num_draws: s.draws.as_ref().map(|d| d.num_draws()),
            })
        }
        None => None,
    };
    let result = CheckResult {
        settings_ok: true,
        scenario,
    };
    ctx.emit("check", result, |r| match &r.scenario {
        Some(s) => format!(
            "settings ok ({}); scenario {} ok: {}x{} chain, {} tests",
            ctx.snapshot.source, s.path, s.test_nodes, s.supply_nodes, s.total_tests
        ),
        None => format!("settings ok ({})", ctx.snapshot.source),
    })
}
