use anyhow::Result;
use approval_flow::{
    init_telemetry, shutdown_telemetry, AppConfig, ExecutorRegistry, NotificationSink,
    OperationState, OperationStateMachine, OperationTimer, RecordingNotifier, RefreshContext, RefreshCoordinator,
    RefreshError, RefreshKind, RefreshOperation,
};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use serde_json::json;
use std::cell::Cell;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "approval-flow")]
#[command(about = "Save → approve workflow state machine and unified refresh coordination")]
#[command(long_about = "Drives a plan through save, approve and retry with a guarded state machine, \
                       and deduplicates concurrent refreshes per logical key with a cooldown. \
                       Start with 'approval-flow simulate' to watch the button states.")]
struct Cli {
    /// Configuration file (defaults to ./approval-flow.toml when present)
    #[arg(long, global = true, help = "Path to a TOML configuration file")]
    config: Option<PathBuf>,
    /// Human-readable logs instead of JSON
    #[arg(long, global = true, help = "Emit plain-text logs on stderr")]
    plain_logs: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one save → approve cycle and print the button after every step
    Simulate {
        /// Number of save attempts the backend rejects before accepting
        #[arg(long, default_value = "0", help = "Save attempts that fail before one succeeds")]
        save_failures: u32,
        /// Number of approve attempts the backend rejects before accepting
        #[arg(long, default_value = "0", help = "Approve attempts that fail before one succeeds")]
        approve_failures: u32,
    },
    /// Fire concurrent refreshes to show deduplication, cooldown and stats
    RefreshDemo {
        /// Concurrent callers per client
        #[arg(long, default_value = "4")]
        callers: usize,
        /// Distinct clients (one logical key each)
        #[arg(long, default_value = "3")]
        clients: u64,
        /// Simulated executor latency in milliseconds
        #[arg(long, default_value = "50")]
        latency_ms: u64,
    },
    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    AppConfig::load_env_file()?;
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if cli.plain_logs {
        config.observability.json_logs = false;
    }
    init_telemetry(&config.observability)?;

    let result = match cli.command {
        Commands::Simulate { save_failures, approve_failures } => {
            tokio::runtime::Runtime::new()?.block_on(async {
                simulate_command(&config, save_failures, approve_failures).await
            })
        }
        Commands::RefreshDemo { callers, clients, latency_ms } => {
            tokio::runtime::Runtime::new()?.block_on(async {
                refresh_demo_command(&config, callers, clients, latency_ms).await
            })
        }
        Commands::Config => config_command(&config),
    };

    shutdown_telemetry();
    result
}

/// Backend stand-in that rejects the first `failures` calls
struct FlakyBackend {
    failures: Cell<u32>,
}

impl FlakyBackend {
    fn new(failures: u32) -> Self {
        Self { failures: Cell::new(failures) }
    }

    async fn call(&self, phase: &str) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let remaining = self.failures.get();
        if remaining > 0 {
            self.failures.set(remaining - 1);
            anyhow::bail!("{phase} rejected by backend ({remaining} failure(s) left)");
        }
        Ok(())
    }
}

fn print_button(machine: &OperationStateMachine) {
    let snapshot = machine.snapshot();
    println!(
        "  {:<14} [{}] enabled={} loading={} retries={}/{}",
        snapshot.state.to_string(),
        snapshot.button.label,
        snapshot.button.enabled,
        snapshot.button.loading,
        snapshot.retries,
        snapshot.max_retries,
    );
    if let Some(error) = snapshot.last_error {
        println!("  {:<14} last error: {error}", "");
    }
}

/// Retry a failed phase while the machine allows it; true once `target` is reached
async fn drive_phase(
    machine: &OperationStateMachine,
    backend: &FlakyBackend,
    phase: &str,
    target: OperationState,
) -> bool {
    print_button(machine);
    while !machine.is_state(target) && machine.state().is_error() && machine.retry_info().can_retry {
        machine.handle_retry(|| backend.call(phase)).await;
        print_button(machine);
    }
    machine.is_state(target)
}

async fn simulate_command(config: &AppConfig, save_failures: u32, approve_failures: u32) -> Result<()> {
    let timer = OperationTimer::new("simulate");
    let notifier = Arc::new(RecordingNotifier::new());
    let machine = OperationStateMachine::with_config("weekly-plan", config.state_machine)
        .with_notifier(notifier.clone() as Arc<dyn NotificationSink>);
    let _transitions = machine.subscribe(|new, old, action| {
        println!("{old} --{action}--> {new}");
    });

    println!("🗂️  PLAN APPROVAL SIMULATION");
    print_button(&machine);

    let save_backend = FlakyBackend::new(save_failures);
    machine.handle_save(|| save_backend.call("save")).await;
    let saved = drive_phase(&machine, &save_backend, "save", OperationState::Saved).await;

    if saved {
        let approve_backend = FlakyBackend::new(approve_failures);
        machine.handle_approve(|| approve_backend.call("approve")).await;
        drive_phase(&machine, &approve_backend, "approve", OperationState::Approved).await;
    }

    println!();
    println!("📣 Notifications:");
    for notice in notifier.take() {
        println!("  [{}] {}: {}", notice.level, notice.title, notice.message);
    }
    println!();
    println!("Final state: {}", machine.state());
    machine.destroy();

    timer.finish();
    Ok(())
}

async fn refresh_demo_command(config: &AppConfig, callers: usize, clients: u64, latency_ms: u64) -> Result<()> {
    let invocations = Arc::new(AtomicUsize::new(0));
    let executors = ExecutorRegistry::new().register_fn(RefreshKind::ApprovalStatus, {
        let invocations = Arc::clone(&invocations);
        move |context: RefreshContext| {
            let invocations = Arc::clone(&invocations);
            async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(latency_ms)).await;
                if context.is_cancelled() {
                    anyhow::bail!("refresh {} was cancelled", context.key);
                }
                Ok::<_, anyhow::Error>(json!({ "key": context.key, "status": "approved" }))
            }
        }
    });
    let coordinator = RefreshCoordinator::with_executors(config.refresh.clone(), executors);
    let _events = coordinator.subscribe(|event, state| {
        println!(
            "  event {} (pending: {})",
            serde_json::to_string(event).unwrap_or_default(),
            state.pending_operations.len()
        );
    });

    let requests = || {
        (0..callers)
            .flat_map(|_| 0..clients)
            .map(|client| {
                RefreshOperation::new(RefreshKind::ApprovalStatus)
                    .param("clientId", client)
                    .param("planStartDate", "2025-07-14")
            })
            .collect::<Vec<_>>()
    };

    println!("🔄 REFRESH DEMO: {callers} caller(s) × {clients} client(s)");
    let first = join_all(requests().into_iter().map(|op| coordinator.refresh_registered(op))).await;
    let succeeded = first.iter().filter(|result| result.is_ok()).count();
    println!(
        "Round 1: {} request(s), {} succeeded, {} executor call(s)",
        first.len(),
        succeeded,
        invocations.load(Ordering::SeqCst)
    );

    let second = join_all(requests().into_iter().map(|op| coordinator.refresh_registered(op))).await;
    let throttled = second
        .iter()
        .filter(|result| matches!(result, Err(RefreshError::CooldownRejected { .. })))
        .count();
    println!("Round 2 (inside cooldown): {throttled} of {} request(s) throttled", second.len());

    println!();
    println!("📊 Stats:");
    println!("{}", serde_json::to_string_pretty(&coordinator.stats())?);
    println!("{}", serde_json::to_string_pretty(&coordinator.metrics())?);
    if config.observability.metrics_enabled {
        coordinator.log_metrics();
    }
    Ok(())
}

fn config_command(config: &AppConfig) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}
