//! Conductor - a bounded supervisor for code-generation agents

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use conductor::activity::JsonlActivityLog;
use conductor::collaborators::{
    ApprovalGate, AutoApprove, CommandGenerator, CommandVerifier, FileApproval, ScanContextSource,
    APPROVAL_FILE, PENDING_APPROVAL_FILE,
};
use conductor::config::{preflight, ConductorConfig, ConfigLoader};
use conductor::guardian::normalize::{digest, normalize};
use conductor::isolation::IsolationClient;
use conductor::orchestrator::commands::{enqueue, Command};
use conductor::orchestrator::persistence::StatePersistence;
use conductor::{ComplexityMode, ConductorError, Orchestrator, OrchestratorDeps, RunOutcome};

#[derive(Parser)]
#[command(name = "conductor")]
#[command(version)]
#[command(about = "Plan, build, verify, debug: a bounded supervisor for code-generation agents", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new run
    Run {
        /// What to build
        #[arg(long)]
        prompt: String,

        /// Complexity mode (defaults to the configured mode)
        #[arg(short, long, value_enum)]
        mode: Option<ComplexityMode>,

        /// Configuration preset to apply
        #[arg(long, value_name = "NAME")]
        preset: Option<String>,

        /// Override the guardian iteration ceiling
        #[arg(long, value_name = "N")]
        max_iterations: Option<u32>,

        /// Approve the plan without waiting for the operator
        #[arg(long)]
        auto_approve: bool,
    },

    /// Continue a paused run
    Resume {
        /// Switch complexity mode before resuming
        #[arg(short, long, value_enum)]
        mode: Option<ComplexityMode>,

        /// Configuration preset to apply
        #[arg(long, value_name = "NAME")]
        preset: Option<String>,

        /// Approve the plan without waiting for the operator
        #[arg(long)]
        auto_approve: bool,
    },

    /// Show the current run status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Queue a command for the running loop (pause, checkpoint, rollback)
    Send {
        /// Command verb
        verb: String,

        /// Checkpoint label
        label: Option<String>,
    },

    /// Approve the pending plan
    Approve,

    /// Reject the pending plan
    Reject,

    /// Print the normalized digest of a file
    Digest {
        file: PathBuf,

        /// Also print the normalized text
        #[arg(long)]
        show: bool,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved configuration as TOML
    Show {
        /// Configuration preset to apply
        #[arg(long, value_name = "NAME")]
        preset: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let project_path = cli.project.canonicalize().unwrap_or(cli.project.clone());
    if !project_path.exists() {
        eprintln!(
            "{} Project directory does not exist: {}",
            "Error:".red().bold(),
            project_path.display()
        );
        std::process::exit(1);
    }

    match execute(cli.command, &project_path).await {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {e:#}", "Error:".red().bold());
            let code = e
                .downcast_ref::<ConductorError>()
                .map_or(1, ConductorError::exit_code);
            std::process::exit(code);
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose {
        "conductor=debug,info"
    } else {
        "conductor=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn execute(command: Commands, project: &Path) -> anyhow::Result<i32> {
    match command {
        Commands::Run {
            prompt,
            mode,
            preset,
            max_iterations,
            auto_approve,
        } => {
            if prompt.trim().is_empty() {
                bail!("--prompt must not be empty");
            }
            let mut config = ConductorConfig::load(project, preset.as_deref())?;
            if let Some(max) = max_iterations {
                config.guardian.max_iterations = max;
            }
            preflight(&config)?;

            let deps = build_deps(project, &config, auto_approve)?;
            let mut orchestrator = Orchestrator::new(project, &config, deps);
            if let Some(mode) = mode {
                orchestrator = orchestrator.with_mode(mode);
            }
            let outcome = orchestrator.run(&prompt).await?;
            Ok(report(&outcome))
        }

        Commands::Resume {
            mode,
            preset,
            auto_approve,
        } => {
            let config = ConductorConfig::load(project, preset.as_deref())?;
            preflight(&config)?;

            let deps = build_deps(project, &config, auto_approve)?;
            let mut orchestrator = Orchestrator::new(project, &config, deps);
            let outcome = orchestrator.resume_run(mode).await?;
            Ok(report(&outcome))
        }

        Commands::Status { json } => {
            let config = ConductorConfig::load(project, None)?;
            print_status(project, &config, json)?;
            Ok(0)
        }

        Commands::Send { verb, label } => {
            let config = ConductorConfig::load(project, None)?;
            let line = format!(
                "/{} {}",
                verb.trim_start_matches('/'),
                label.as_deref().unwrap_or_default()
            );
            let Some(command) = Command::parse(&line) else {
                bail!("Unknown or incomplete command: {}", line.trim());
            };
            enqueue(&config.state_dir(project), &command)?;
            println!("{} Queued {}", "OK".green().bold(), command.to_line());
            Ok(0)
        }

        Commands::Approve => answer_approval(project, "approve", "approved"),
        Commands::Reject => answer_approval(project, "reject", "rejected"),

        Commands::Digest { file, show } => {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            if show {
                println!("{}", normalize(&text));
            }
            println!("{}", digest(&text));
            Ok(0)
        }

        Commands::Config { action } => match action {
            ConfigAction::Show { preset } => {
                let mut loader = ConfigLoader::new(project);
                if let Some(name) = preset {
                    loader = loader.with_preset(name);
                }
                let config = loader.load()?;
                for source in loader.sources() {
                    println!("# {source}");
                }
                println!("{}", config.to_toml()?);
                Ok(0)
            }
        },
    }
}

fn build_deps(
    project: &Path,
    config: &ConductorConfig,
    auto_approve: bool,
) -> anyhow::Result<OrchestratorDeps> {
    let approval: Arc<dyn ApprovalGate> = if auto_approve {
        Arc::new(AutoApprove)
    } else {
        Arc::new(FileApproval::new(config.state_dir(project)))
    };

    Ok(OrchestratorDeps {
        generator: Arc::new(CommandGenerator::from_config(&config.generator, project)?),
        vcs: Arc::new(IsolationClient::from_config(&config.isolation, project)?),
        verifier: Arc::new(CommandVerifier::new(config.verify.clone(), project)),
        context: Arc::new(ScanContextSource::new(project, config.context.clone())?),
        approval,
        activity: Arc::new(JsonlActivityLog::new(config.log_dir(project))),
    })
}

fn report(outcome: &RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Complete { iterations } => {
            println!(
                "{} Run complete after {iterations} iteration(s)",
                "OK".green().bold()
            );
        }
        RunOutcome::Paused { state, session } => {
            println!(
                "{} Paused in {state}; session saved to {}",
                "Paused:".yellow().bold(),
                session.display()
            );
            println!("   → run {} to continue", "conductor resume".bold());
        }
        RunOutcome::Failed { cause, iterations } => {
            eprintln!(
                "{} {cause} (after {iterations} iteration(s))",
                "Failed:".red().bold()
            );
        }
    }
    outcome.exit_code()
}

fn print_status(project: &Path, config: &ConductorConfig, json: bool) -> anyhow::Result<()> {
    let persistence = StatePersistence::new(config.state_dir(project));
    let status = persistence.read_status()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let Some(status) = status else {
        println!("No run status in {}", persistence.dir().display());
        return Ok(());
    };

    println!("\n{} Run Status", "Status:".cyan().bold());
    println!("   State:      {}", status.state.to_string().bold());
    println!("   Mode:       {}", status.complexity_mode);
    println!(
        "   Iterations: {}/{}",
        status.iteration_count, status.max_iterations
    );
    println!("   Retries:    {}", status.retry_count);
    println!(
        "   Elapsed:    {:.1} min (limit {} min)",
        status.elapsed_secs / 60.0,
        status.max_time_minutes
    );
    if let Some(task) = &status.last_task {
        println!("   Last task:  {task}");
    }
    if let Some(reason) = &status.reason {
        println!("   Reason:     {}", reason.red());
    }
    println!(
        "   Updated:    {}",
        status.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    if persistence.session_path().exists() {
        println!(
            "\n{} A paused session can be resumed with `conductor resume`",
            "Note:".yellow().bold()
        );
    }
    if persistence.dir().join(PENDING_APPROVAL_FILE).exists() {
        println!(
            "{} A plan is awaiting approval (`conductor approve` or `conductor reject`)",
            "Note:".yellow().bold()
        );
    }

    let events = JsonlActivityLog::new(config.log_dir(project)).tail(5)?;
    if !events.is_empty() {
        println!("\n{} Recent activity", "Activity:".cyan().bold());
        for event in events {
            println!(
                "   {} [{}] {} {}",
                event.ts.format("%H:%M:%S"),
                event.task_id,
                event.status,
                event.details
            );
        }
    }
    Ok(())
}

fn answer_approval(project: &Path, answer: &str, done: &str) -> anyhow::Result<i32> {
    let config = ConductorConfig::load(project, None)?;
    let state_dir = config.state_dir(project);
    if !state_dir.join(PENDING_APPROVAL_FILE).exists() {
        bail!("No plan is awaiting approval in {}", state_dir.display());
    }
    fs::write(state_dir.join(APPROVAL_FILE), format!("{answer}\n"))
        .context("Failed to write approval answer")?;
    println!("{} Plan {done}", "OK".green().bold());
    Ok(0)
}
