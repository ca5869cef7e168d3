//! tunwardd — the self-healing tunnel supervisor daemon.
//!
//! Single binary that assembles the supervisor subsystems:
//! - Liveness evaluator (probe set + quorum verdict)
//! - Escalation state machine + remediation executor
//! - Usage ledger + throttle controller
//! - Diagnostics recorder
//! - File-backed state (ledger, status artifact, snapshot log)
//!
//! # Usage
//!
//! ```text
//! tunwardd --config /etc/tunward/tunward.toml run
//! tunwardd check
//! tunwardd remediate --tier soft-restart
//! tunwardd diagnostics
//! tunwardd usage
//! ```

mod loops;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::info;

use tunward_core::SupervisorConfig;
use tunward_diag::DiagnosticsRecorder;
use tunward_escalate::Remediator;
use tunward_health::Evaluator;
use tunward_hostctl::{
    ProcNetDev, ShellPacketFilter, ShellReachability, ShellVpn, SystemdSupervisor, TcShaper,
};
use tunward_state::{EscalationState, RemediationTier, StateFiles, period_for};
use tunward_usage::UsageSampler;

use loops::{Supervisor, epoch_secs};

/// Outer bound for remediation and diagnostics tool invocations, which
/// can legitimately take longer than a probe.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "tunwardd", about = "Self-healing tunnel supervisor", version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "/etc/tunward/tunward.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run both control loops until interrupted.
    Run,
    /// Run one liveness evaluation and print the verdict (exit 1 if failing).
    Check,
    /// Force one remediation attempt at the given tier.
    Remediate {
        #[arg(long, value_enum)]
        tier: TierArg,
    },
    /// Gather one diagnostics snapshot and print it.
    Diagnostics,
    /// Sample the usage ledger once and print the accumulated usage and tier.
    Usage,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TierArg {
    SoftRestart,
    CredentialRefresh,
    HardRestart,
    FullReset,
}

impl From<TierArg> for RemediationTier {
    fn from(arg: TierArg) -> Self {
        match arg {
            TierArg::SoftRestart => RemediationTier::SoftRestart,
            TierArg::CredentialRefresh => RemediationTier::CredentialRefresh,
            TierArg::HardRestart => RemediationTier::HardRestart,
            TierArg::FullReset => RemediationTier::FullReset,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tunwardd=debug,tunward=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let config = SupervisorConfig::from_file(&cli.config)?;

    match cli.command {
        Command::Run => run(config).await,
        Command::Check => check(config).await,
        Command::Remediate { tier } => remediate(config, tier.into()).await,
        Command::Diagnostics => diagnostics(config).await,
        Command::Usage => usage(config).await,
    }
}

fn shell_vpn(config: &SupervisorConfig) -> Arc<ShellVpn> {
    Arc::new(ShellVpn::new(config.vpn.clone(), CONTROL_TIMEOUT))
}

async fn run(config: SupervisorConfig) -> anyhow::Result<()> {
    info!("tunward supervisor starting");

    let files = StateFiles::open(&config.data_dir)?;
    let supervisor = Supervisor::new(
        config.clone(),
        files,
        shell_vpn(&config),
        Arc::new(ShellReachability),
        Arc::new(SystemdSupervisor::new(CONTROL_TIMEOUT)),
        Arc::new(ShellPacketFilter::new(
            config.filter.baseline_rules.clone(),
            CONTROL_TIMEOUT,
        )),
        Arc::new(TcShaper::new(CONTROL_TIMEOUT)),
        Arc::new(ProcNetDev::new()),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    supervisor.run(shutdown_rx).await;

    info!("tunward supervisor stopped");
    Ok(())
}

async fn check(config: SupervisorConfig) -> anyhow::Result<()> {
    let evaluator = Evaluator::new(
        shell_vpn(&config),
        Arc::new(ShellReachability),
        config.probes.clone(),
        config.probe_timeout,
        config.evaluator_deadline,
    );

    let verdict = evaluator.evaluate(epoch_secs()).await;
    println!("{}", serde_json::to_string_pretty(&verdict)?);

    if !verdict.passed {
        std::process::exit(1);
    }
    Ok(())
}

async fn remediate(config: SupervisorConfig, tier: RemediationTier) -> anyhow::Result<()> {
    let remediator = Remediator::new(
        shell_vpn(&config),
        Arc::new(SystemdSupervisor::new(CONTROL_TIMEOUT)),
        config.vpn.daemon_service.clone(),
        config.vpn.auth_key_file.clone(),
        Duration::from_secs(2),
    );

    if remediator.attempt(tier).await {
        println!("remediation commands succeeded at tier {tier}");
        Ok(())
    } else {
        eprintln!("remediation failed at tier {tier}");
        std::process::exit(1);
    }
}

async fn diagnostics(config: SupervisorConfig) -> anyhow::Result<()> {
    let files = StateFiles::open(&config.data_dir)?;
    let recorder = DiagnosticsRecorder::new(shell_vpn(&config), config.probe_timeout);

    let now = epoch_secs();
    // Seed the header from the last status artifact when one exists.
    let escalation = files
        .load_status()
        .ok()
        .flatten()
        .map(|s| s.escalation)
        .unwrap_or_else(|| EscalationState::new(now));

    let snapshot = recorder.snapshot(&escalation, &[], now).await;
    print!("{}", snapshot.render());
    Ok(())
}

async fn usage(config: SupervisorConfig) -> anyhow::Result<()> {
    let files = StateFiles::open(&config.data_dir)?;
    let period = period_for(SystemTime::now());
    let ledger = files.load_ledger_or_default(&period);

    let sampler = UsageSampler::new(Arc::new(ProcNetDev::new()));
    let outcome = sampler.tick(ledger, epoch_secs(), &period);
    files.save_ledger(&outcome.ledger)?;

    let tier = tunward_usage::tier_for(&config.usage, outcome.ledger.accumulated_bytes);
    println!(
        "period {}  accumulated {} bytes ({} of {} units)  tier {:?}",
        outcome.ledger.billing_period,
        outcome.ledger.accumulated_bytes,
        outcome.ledger.accumulated_bytes / config.usage.unit_bytes,
        config.usage.limit_units,
        tier,
    );
    Ok(())
}
