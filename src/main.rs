use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use lease_elector::shutdown::install_shutdown_handler;
use lease_elector::{
    ElectionConfig, ElectionDescriptor, Identity, InMemoryLockStore, LeaderElection, LockBackend,
    LockRecord,
};

#[derive(Parser, Debug)]
#[command(name = "lease-elector")]
#[command(version)]
#[command(about = "Lease-based leader election over a compare-and-swap lock store")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run several candidates in one process against an in-memory lock store
    Demo(DemoArgs),
}

// =============================================================================
// Demo Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct DemoArgs {
    /// Election name
    #[arg(long, default_value = "demo")]
    name: String,

    /// Election namespace
    #[arg(long, default_value = "default")]
    namespace: String,

    /// Number of competing candidates
    #[arg(long, default_value = "3")]
    candidates: usize,

    /// Lease duration in milliseconds
    #[arg(long, default_value = "15000")]
    lease_duration_ms: u64,

    /// Renew deadline in milliseconds
    #[arg(long, default_value = "10000")]
    renew_deadline_ms: u64,

    /// Retry period in milliseconds
    #[arg(long, default_value = "2000")]
    retry_period_ms: u64,

    /// Random extra fraction of the retry period while standing by
    #[arg(long, default_value = "0.0")]
    jitter: f64,

    /// Cancel whichever candidate leads after this many seconds
    #[arg(long)]
    kill_leader_after_secs: Option<u64>,

    /// Stop the demo after this many seconds
    #[arg(long, default_value = "30")]
    run_for_secs: u64,

    /// Output format for the final summary
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct CandidateOutput {
    id: String,
    state: String,
}

#[derive(Serialize)]
struct DemoSummaryOutput {
    election: String,
    record: Option<LockRecord>,
    candidates: Vec<CandidateOutput>,
}

// =============================================================================
// Demo Implementation
// =============================================================================

struct Candidate {
    election: Arc<LeaderElection>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

fn build_candidate(
    index: usize,
    args: &DemoArgs,
    config: &ElectionConfig,
    backend: Arc<dyn LockBackend>,
    shutdown: &CancellationToken,
) -> Result<Candidate, Box<dyn std::error::Error>> {
    let election = LeaderElection::builder(args.name.clone(), args.namespace.clone(), backend)
        .identity(Identity::for_host(&format!("candidate-{}", index)))
        .config(config.clone())
        .on_started_leading(move |leading| async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = leading.cancelled() => break,
                    _ = ticker.tick() => tracing::info!(candidate = index, "Doing leader work"),
                }
            }
        })
        .on_stopped_leading(move || async move {
            tracing::info!(candidate = index, "Leader work stopped");
        })
        .build()?;

    let election = Arc::new(election);
    let cancel = shutdown.child_token();
    let handle = tokio::spawn({
        let election = election.clone();
        let cancel = cancel.clone();
        async move { election.run(cancel).await }
    });

    Ok(Candidate {
        election,
        cancel,
        handle,
    })
}

async fn run_demo(args: DemoArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ElectionConfig::new(
        Duration::from_millis(args.lease_duration_ms),
        Duration::from_millis(args.renew_deadline_ms),
        Duration::from_millis(args.retry_period_ms),
    )
    .with_retry_jitter(args.jitter);
    config.validate()?;

    let descriptor = ElectionDescriptor::new(args.name.clone(), args.namespace.clone());
    let store = InMemoryLockStore::new();
    let backend: Arc<dyn LockBackend> = Arc::new(store.clone());
    let shutdown = install_shutdown_handler();

    tracing::info!(
        election = %descriptor,
        candidates = args.candidates,
        lease_duration_ms = args.lease_duration_ms,
        renew_deadline_ms = args.renew_deadline_ms,
        retry_period_ms = args.retry_period_ms,
        "Starting leader election demo"
    );

    let mut candidates = Vec::with_capacity(args.candidates);
    for index in 1..=args.candidates {
        candidates.push(build_candidate(
            index,
            &args,
            &config,
            backend.clone(),
            &shutdown,
        )?);
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.run_for_secs);
    let kill_at = args
        .kill_leader_after_secs
        .map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));
    let mut killed = false;
    let mut status = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => break,
            _ = status.tick() => {
                let leaders: Vec<String> = candidates
                    .iter()
                    .filter(|c| c.election.is_leader())
                    .map(|c| c.election.id().to_string())
                    .collect();
                tracing::info!(leaders = ?leaders, "Election status");

                if let Some(kill_at) = kill_at {
                    if !killed && tokio::time::Instant::now() >= kill_at {
                        if let Some(leader) = candidates.iter().find(|c| c.election.is_leader()) {
                            tracing::info!(id = %leader.election.id(), "Cancelling current leader");
                            leader.cancel.cancel();
                            killed = true;
                        }
                    }
                }
            }
        }
    }

    for candidate in &candidates {
        candidate.cancel.cancel();
    }

    let mut summary = DemoSummaryOutput {
        election: descriptor.to_string(),
        record: None,
        candidates: Vec::with_capacity(candidates.len()),
    };
    for candidate in candidates {
        if let Err(e) = candidate.handle.await {
            tracing::warn!(error = %e, "Candidate task failed");
        }
        summary.candidates.push(CandidateOutput {
            id: candidate.election.id().to_string(),
            state: candidate.election.state().to_string(),
        });
    }
    summary.record = store.record(&descriptor).await;

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Table => print_summary_table(&summary),
    }

    Ok(())
}

fn print_summary_table(summary: &DemoSummaryOutput) {
    println!("Election: {}", summary.election);
    match &summary.record {
        Some(record) => {
            let holder = if record.is_held() {
                record.holder_identity.as_str()
            } else {
                "<released>"
            };
            println!("Holder:      {}", holder);
            println!("Transitions: {}", record.leader_transitions);
            println!("Renewed at:  {}", record.renew_time.to_rfc3339());
        }
        None => println!("Holder:      <none>"),
    }
    println!();
    println!("{:<50} {:<15}", "CANDIDATE", "STATE");
    println!("{}", "-".repeat(65));
    for candidate in &summary.candidates {
        println!("{:<50} {:<15}", candidate.id, candidate.state);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Demo(demo) => run_demo(demo).await,
    }
}
