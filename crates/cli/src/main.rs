use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use undercity_core::elevator::ElevatorQueue;
use undercity_core::learning::{CapabilityLedger, ErrorPatternStore, RoutingProfile};
use undercity_core::persistence::next_highwatermark_id;
use undercity_core::router::{self, RouterInput};
use undercity_core::types::{TaskId, TaskStatus};
use undercity_core::worker::executor::TaskKind;
use undercity_core::worker::{run_task, WorkerInput};
use undercity_core::{git, verify};
use undercity_provider::Tier;

#[derive(Parser)]
#[command(name = "undercity", about = "Multi-agent LLM coding-task orchestrator", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Provider to use (overrides the configured default)
    #[arg(short, long)]
    provider: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive one task through the worker state machine to commit or failure
    Run {
        /// What to accomplish
        objective: String,
        /// Cap the worker at this tier (cheap, mid, strong)
        #[arg(long = "max-tier")]
        max_tier: Option<Tier>,
        /// Override the configured attempt budget
        #[arg(long = "max-attempts")]
        max_attempts: Option<u32>,
        /// Check out a new branch before running
        #[arg(long)]
        branch: Option<String>,
        /// Disable the escalating review pass for this run
        #[arg(long = "no-review")]
        no_review: bool,
        /// Force the planning phase on for this run
        #[arg(long)]
        plan: bool,
    },
    /// Manage the merge elevator queue
    Elevator {
        #[command(subcommand)]
        action: ElevatorAction,
    },
    /// Show the capability ledger's per-keyword tier statistics
    Ledger {
        #[command(subcommand)]
        action: ShowAction,
    },
    /// Show the routing profile's per-cell thresholds and success rates
    Profile {
        #[command(subcommand)]
        action: ShowAction,
    },
    /// Show recorded error patterns and pending failure signatures
    Errors {
        #[command(subcommand)]
        action: ShowAction,
    },
    /// Initialize a .undercity/ project directory
    Init,
}

#[derive(Subcommand)]
enum ElevatorAction {
    /// Queue a finished branch for integration
    Enqueue {
        /// Branch containing the worker's commits
        branch: String,
        /// The task id that produced the branch
        task_id: String,
    },
    /// Advance the next pending (or retry-eligible) item
    Process,
    /// Print queue counts by status
    Status,
}

#[derive(Subcommand)]
enum ShowAction {
    Show,
}

fn project_root() -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut current = cwd.clone();
    loop {
        if current.join(".undercity").is_dir() || current.join(".git").exists() {
            return current;
        }
        if !current.pop() {
            return cwd;
        }
    }
}

fn state_dir(root: &Path) -> PathBuf {
    root.join(".undercity")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("UNDERCITY_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let root = project_root();
    let state_dir = state_dir(&root);
    let config = undercity_config::Config::load_layered(&root)?;

    let provider_name = cli.provider.unwrap_or_else(|| config.provider.default.clone());
    let provider = undercity_provider::create_provider(&provider_name, &config)?;

    match cli.command {
        Commands::Run { objective, max_tier, max_attempts, branch, no_review, plan } => {
            let max_tier = max_tier.unwrap_or(Tier::Strong);

            let decision = router::route(
                RouterInput {
                    objective: &objective,
                    config: &config.router,
                    metrics: None,
                    max_tier,
                    worker_review_enabled: config.worker.enable_review && !no_review,
                    worker_annealing_enabled: config.worker.annealing,
                },
                &state_dir,
                &config.learning,
            );

            let id = next_highwatermark_id(&state_dir)?;
            let task_id = TaskId(format!("task-{id}"));

            if let Some(branch) = &branch {
                if let Err(e) = git::checkout_new(&root, branch) {
                    eprintln!("Failed to create branch {branch}: {e}");
                    std::process::exit(1);
                }
            }

            let mut worker_config = config.worker.clone();
            if let Some(max_attempts) = max_attempts {
                worker_config.max_attempts = max_attempts;
            }
            if plan {
                worker_config.enable_planning = true;
            }

            println!(
                "Routing \"{objective}\" to {} tier (complexity {:?}, review {})",
                decision.starting_tier,
                decision.complexity,
                if decision.review_policy.enable { "on" } else { "off" },
            );

            let result = run_task(WorkerInput {
                task_id,
                objective,
                project_root: root.clone(),
                state_dir,
                provider: provider.as_ref(),
                starting_tier: decision.starting_tier,
                max_tier: decision.cap_at_tier,
                worker_config: &worker_config,
                verify_config: &config.verify,
                learning_config: &config.learning,
                task_kind: TaskKind::Implementation,
                max_review_tier: decision.review_policy.max_review_tier,
                review_enabled: decision.review_policy.enable,
                annealing: decision.review_policy.annealing,
            })
            .await;

            print_result(&result);
            if result.status != TaskStatus::Complete {
                std::process::exit(1);
            }
        }
        Commands::Elevator { action } => match action {
            ElevatorAction::Enqueue { branch, task_id } => {
                let mut queue = ElevatorQueue::load(&state_dir);
                let modified_files = git::diff_name_only(&root, Some("main")).unwrap_or_default();
                queue.enqueue(branch.clone(), TaskId(task_id), "cli".to_string(), modified_files, config.elevator.max_retries);
                queue.save(&state_dir)?;
                println!("Queued {branch} for integration.");
            }
            ElevatorAction::Process => {
                let mut queue = ElevatorQueue::load(&state_dir);
                match queue.process_next(&root, &config.elevator, &config.verify).await {
                    Some(item) => println!("{}: {:?}", item.branch, item.status),
                    None => println!("Nothing to process."),
                }
                queue.save(&state_dir)?;
            }
            ElevatorAction::Status => {
                let queue = ElevatorQueue::load(&state_dir);
                let summary = queue.summary();
                println!(
                    "pending={} in_progress={} complete={} conflict={} test_failed={}",
                    summary.pending, summary.in_progress, summary.complete, summary.conflict, summary.test_failed
                );
                for (a, b, overlap) in queue.conflict_hints() {
                    println!("  conflict hint: {a} <-> {b} ({overlap} shared files)");
                }
            }
        },
        Commands::Ledger { action: ShowAction::Show } => {
            let ledger = CapabilityLedger::load(&state_dir);
            println!("total_entries={}", ledger.total_entries);
            for (pattern, stats) in &ledger.patterns {
                for tier in Tier::ALL {
                    if let Some(t) = stats.by_model.get(&tier) {
                        if t.attempts > 0 {
                            println!(
                                "  {pattern}/{tier}: attempts={} successes={} escalations={}",
                                t.attempts, t.successes, t.escalations
                            );
                        }
                    }
                }
            }
        }
        Commands::Profile { action: ShowAction::Show } => {
            let profile = RoutingProfile::load(&state_dir);
            println!("task_count={} updated_at={}", profile.task_count, profile.updated_at);
            for tier in Tier::ALL {
                if let Some(rate) = profile.model_success_rates.get(&tier) {
                    println!("  {tier}: success_rate={rate:.2}");
                }
            }
            for rec in &profile.recommendations {
                println!("  note: {rec}");
            }
        }
        Commands::Errors { action: ShowAction::Show } => {
            let errors = ErrorPatternStore::load(&state_dir);
            for (sig, pattern) in &errors.patterns {
                println!(
                    "{sig}: {:?} \"{}\" occurrences={} permanent={}",
                    pattern.category, pattern.message_prefix, pattern.occurrences, pattern.permanent
                );
            }
            if !errors.pending.is_empty() {
                println!("pending:");
                for (task_id, pending) in &errors.pending {
                    println!("  {task_id}: {}", pending.signature);
                }
            }
        }
        Commands::Init => {
            std::fs::create_dir_all(&state_dir)?;
            let config_path = state_dir.join("config.toml");
            if !config_path.exists() {
                std::fs::write(
                    &config_path,
                    "# Project-level undercity configuration\n\
                     # These settings override ~/.config/undercity/config.toml\n\n\
                     # [worker]\n\
                     # max_attempts = 7\n\
                     # enable_review = true\n",
                )?;
                println!("Created {}", config_path.display());
            } else {
                println!("{} already exists", config_path.display());
            }
            let checks = verify::detect_checks(&root, &config.verify);
            println!("Detected {} verification check(s) for this project.", checks.len());
        }
    }

    Ok(())
}

fn print_result(result: &undercity_core::types::TaskResult) {
    println!("status: {:?}", result.status);
    println!("tier: {}", result.model);
    println!("attempts: {}", result.attempts);
    if let Some(sha) = &result.commit_sha {
        println!("commit: {sha}");
    }
    if let Some(err) = &result.error {
        println!("error: {err}");
    }
    if let Some(subtasks) = &result.needs_decomposition {
        println!("needs decomposition into:");
        for s in subtasks {
            println!("  - {s}");
        }
    }
    if !result.unresolved_tickets.is_empty() {
        println!("unresolved review tickets:");
        for t in &result.unresolved_tickets {
            println!("  - {t}");
        }
    }
    println!("duration_ms: {}", result.duration_ms);
}
