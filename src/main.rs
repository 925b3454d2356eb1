//! cluster-power
//!
//! Command-line front end for the cluster power orchestrator: ordered
//! shutdown and startup of a hypervisor cluster, dry-run plans and an
//! inventory status view.
//!
//! Exit codes: 0 on full success, 1 when the run recorded failures or was
//! cancelled, 2 when it aborted on a fatal error.

use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cluster_power_orchestrator::{
    ClusterClientFactory, ClusterClientRef, ClusterSeed, Config, Direction, Error,
    InventorySnapshot, LifecycleEvent, LifecycleOrchestrator, LifecycleReport, PowerPlan, Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Ordered shutdown and startup of a hypervisor cluster
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(long, short, env = "CLUSTER_POWER_CONFIG", default_value = "cluster-power.yaml")]
    config: PathBuf,

    /// Override the cluster named in the configuration
    #[arg(long, env = "CLUSTER_POWER_CLUSTER")]
    cluster: Option<String>,

    /// Run against a simulated cluster seeded from this file
    #[arg(long, env = "CLUSTER_POWER_SIMULATE")]
    simulate: Option<PathBuf>,

    /// Skip the confirmation prompt
    #[arg(long, short)]
    yes: bool,

    /// Report format
    #[arg(long, value_enum, default_value = "text")]
    output: OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Shut down all targeted VMs by category, then the hosts
    Shutdown,
    /// Take hosts out of maintenance, then start VMs by category
    Startup,
    /// Show what a run would do without issuing anything
    Plan {
        #[arg(value_enum)]
        direction: DirectionArg,
    },
    /// Show the current inventory
    Status,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DirectionArg {
    Shutdown,
    Startup,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Shutdown => Direction::Shutdown,
            DirectionArg::Startup => Direction::Startup,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(Error::Cancelled) => {
            warn!("Not confirmed; nothing was issued");
            ExitCode::from(1)
        }
        Err(e) => {
            error!("Aborted: {}", e);
            eprintln!("error: {}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> Result<u8> {
    info!("cluster-power {}", cluster_power_orchestrator::VERSION);

    let (config, client) = connect(&args).await?;
    let orchestrator = LifecycleOrchestrator::new(client, config)?;

    let direction = match args.command {
        Command::Status => {
            let snapshot = orchestrator.snapshot().await?;
            print_status(&snapshot, args.output)?;
            return Ok(0);
        }
        Command::Plan { direction } => {
            let plan = orchestrator.plan(direction.into()).await?;
            print_plan(&plan, args.output)?;
            return Ok(0);
        }
        Command::Shutdown => Direction::Shutdown,
        Command::Startup => Direction::Startup,
    };

    if !args.yes {
        let plan = orchestrator.plan(direction).await?;
        print_plan(&plan, OutputFormat::Text)?;
        if !confirm(&plan).await? {
            return Err(Error::Cancelled);
        }
    }

    // Ctrl-C stops the run at the next phase boundary
    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current phase");
            token.cancel();
        }
    });

    let renderer = tokio::spawn(render_events(orchestrator.subscribe()));

    let report = match direction {
        Direction::Shutdown => orchestrator.shutdown_cluster().await?,
        Direction::Startup => orchestrator.startup_cluster().await?,
    };

    drop(orchestrator);
    let _ = renderer.await;

    print_report(&report, args.output)?;
    Ok(report.exit_code() as u8)
}

/// Load the configuration and build the cluster client it names
async fn connect(args: &Args) -> Result<(Config, ClusterClientRef)> {
    let seed = args
        .simulate
        .as_ref()
        .map(ClusterSeed::from_file)
        .transpose()?;

    let mut config = if args.config.exists() {
        Config::from_file(&args.config)?
    } else if let Some(seed) = &seed {
        info!(
            "{} not found; using defaults for the simulated cluster",
            args.config.display()
        );
        Config::new(seed.cluster.clone())
    } else {
        return Err(Error::Configuration(format!(
            "configuration file {} not found",
            args.config.display()
        )));
    };

    if let Some(cluster) = &args.cluster {
        config.cluster = cluster.clone();
        config.validate()?;
    }

    let client: ClusterClientRef = match seed {
        Some(seed) => {
            info!("Using simulated cluster '{}'", seed.cluster);
            ClusterClientFactory::simulated(seed) as ClusterClientRef
        }
        None => ClusterClientFactory::connect(&config).await?,
    };

    Ok((config, client))
}

async fn confirm(plan: &PowerPlan) -> Result<bool> {
    eprint!(
        "Type the cluster name '{}' to {} {} VMs: ",
        plan.cluster,
        plan.direction,
        plan.target_count()
    );
    std::io::stderr().flush()?;

    let line = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await
    .map_err(|e| Error::Internal(format!("Confirmation prompt failed: {}", e)))??;

    Ok(line.trim() == plan.cluster)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("reqwest=warn".parse().unwrap())
        .add_directive("rustls=warn".parse().unwrap());

    // Reports go to stdout; logs stay on stderr
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

// =============================================================================
// Rendering
// =============================================================================

async fn render_events(mut events: tokio::sync::broadcast::Receiver<LifecycleEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(line) = describe_event(&event) {
                    eprintln!("{}", line);
                }
            }
            Err(RecvError::Lagged(missed)) => eprintln!("... {} status events dropped", missed),
            Err(RecvError::Closed) => break,
        }
    }
}

fn describe_event(event: &LifecycleEvent) -> Option<String> {
    match event {
        LifecycleEvent::RunStarted { direction, cluster } => {
            Some(format!("==> {} of cluster {}", direction, cluster))
        }
        LifecycleEvent::PhaseStarted {
            direction,
            category,
            members,
        } if *members > 0 => Some(format!("--> {} phase {} ({} VMs)", direction, category, members)),
        LifecycleEvent::OperationFinished {
            target,
            kind,
            state,
            error,
        } => error
            .as_ref()
            .map(|e| format!("    {} {} {}: {}", kind, target, state, e)),
        LifecycleEvent::ForceStopIssued { targets, .. } => {
            Some(format!("    force-stopping {}", targets.join(", ")))
        }
        LifecycleEvent::PhaseCompleted {
            category,
            attempted,
            succeeded,
            forced,
            failed,
        } if *attempted > 0 => Some(format!(
            "    {}: {}/{} done, {} forced{}",
            category,
            succeeded,
            attempted,
            forced,
            if failed.is_empty() {
                String::new()
            } else {
                format!(", failed: {}", failed.join(", "))
            }
        )),
        LifecycleEvent::GraceDelay { after, secs } => {
            Some(format!("    waiting {}s for {} to settle", secs, after))
        }
        LifecycleEvent::HostTransition { outcome } => Some(format!(
            "--> host {} {}: {}",
            outcome.host, outcome.action, outcome.status
        )),
        _ => None,
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_status(snapshot: &InventorySnapshot, output: OutputFormat) -> Result<()> {
    if output == OutputFormat::Json {
        return print_json(snapshot);
    }

    let summary = snapshot.summary();
    println!(
        "Cluster {}: {} hosts ({} connected, {} in maintenance), {} VMs ({} on, {} off, {} suspended)",
        snapshot.cluster,
        summary.hosts_total,
        summary.hosts_connected,
        summary.hosts_in_maintenance,
        summary.vms_total,
        summary.vms_powered_on,
        summary.vms_powered_off,
        summary.vms_suspended
    );
    for host in &snapshot.hosts {
        println!(
            "  {:<24} {:<15} {}",
            host.name,
            host.connection_state.to_string(),
            host.power_mode
        );
        for vm in snapshot.vms_on_host(&host.name) {
            println!("      {:<28} {}", vm.name, vm.power_state);
        }
    }
    Ok(())
}

fn print_plan(plan: &PowerPlan, output: OutputFormat) -> Result<()> {
    if output == OutputFormat::Json {
        return print_json(plan);
    }

    println!("Plan: {} of cluster {}", plan.direction, plan.cluster);
    for step in &plan.hosts_before {
        println!("  host {:<24} {}", step.host, step.action);
    }
    for (index, phase) in plan.phases.iter().enumerate() {
        println!(
            "  {}. {:<20} {}",
            index + 1,
            phase.category.id(),
            if phase.members.is_empty() {
                "-".to_string()
            } else {
                phase.members.join(", ")
            }
        );
    }
    for step in &plan.hosts_after {
        println!("  host {:<24} {}", step.host, step.action);
    }
    if !plan.excluded.is_empty() {
        println!("  untouched: {}", plan.excluded.join(", "));
    }
    Ok(())
}

fn print_report(report: &LifecycleReport, output: OutputFormat) -> Result<()> {
    if output == OutputFormat::Json {
        return print_json(report);
    }

    let verdict = if report.cancelled {
        "CANCELLED"
    } else if report.is_success() {
        "OK"
    } else {
        "FAILED"
    };
    println!(
        "Cluster {} of {}: {}",
        report.direction, report.cluster, verdict
    );

    for phase in &report.phases {
        println!(
            "  {:<20} {:>3}/{:<3} converged, {} forced",
            phase.category.id(),
            phase.succeeded,
            phase.attempted,
            phase.forced_count
        );
    }
    for outcome in &report.hosts {
        println!(
            "  host {:<24} {:<18} {}{}",
            outcome.host,
            outcome.action.to_string(),
            outcome.status,
            outcome
                .detail
                .as_ref()
                .map(|d| format!(" ({})", d))
                .unwrap_or_default()
        );
    }

    let failures = report.failures();
    if !failures.is_empty() {
        println!("Needs attention:");
        for failure in failures {
            println!("  [{}] {}: {}", failure.stage, failure.name, failure.reason);
        }
    }
    Ok(())
}
