use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use cadence::agent::{AgentRunner, CommandAgent};
use cadence::audit::AuditLogger;
use cadence::config::Config;
use cadence::firewall::ContextFirewall;
use cadence::gate::{CheckpointGate, ConsoleGate, ScriptedGate};
use cadence::issues::{GitHubIssues, InMemoryIssues, IssueTracker};
use cadence::machine::PhaseStateMachine;
use cadence::phase::{Task, WorkflowOutcome};
use cadence::ui::WorkflowUI;
use cadence::workspace::WorkspacePool;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(version, about = "Human-gated workflow orchestrator")]
struct Cli {
    /// Task description driven through research, plan, implement, validate,
    /// and integrate
    description: Option<String>,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    project_dir: Option<PathBuf>,

    /// Run non-interactively, replaying comma-separated checkpoint inputs
    /// (e.g. "approve,approve,reject")
    #[arg(long)]
    scripted: Option<String>,

    /// Override the configured agent command (program plus arguments)
    #[arg(long)]
    agent_cmd: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let Some(description) = cli.description else {
        eprintln!("error: missing task description");
        eprintln!("usage: cadence \"<task description>\"");
        return Ok(ExitCode::FAILURE);
    };

    let project_dir = match cli.project_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let mut config = Config::new(project_dir, cli.verbose)?;
    if let Some(agent_cmd) = cli.agent_cmd {
        let mut parts = agent_cmd.split_whitespace().map(String::from);
        config.agent_command = parts
            .next()
            .context("--agent-cmd must name a program to run")?;
        config.agent_args = parts.collect();
    }
    config.ensure_directories()?;

    let agent: Arc<dyn AgentRunner> = Arc::new(CommandAgent::new(
        &config.agent_command,
        config.agent_args.clone(),
    ));
    let gate: Arc<dyn CheckpointGate> = match &cli.scripted {
        Some(script) => Arc::new(ScriptedGate::new(
            script.split(',').map(str::trim).map(String::from),
        )),
        None => Arc::new(ConsoleGate),
    };
    let tracker: Arc<dyn IssueTracker> = match (&config.github_repo, &config.github_token) {
        (Some(repo), Some(token)) => Arc::new(GitHubIssues::new(repo.clone(), token.clone())),
        _ => Arc::new(InMemoryIssues::new()),
    };
    let firewall = ContextFirewall::new(config.archive_dir.clone(), config.summary_budget)?;
    let pool = Arc::new(WorkspacePool::new(
        config.project_dir.clone(),
        config.workspaces_dir.clone(),
        config.integration_branch.clone(),
    ));
    let audit = AuditLogger::new(config.audit_dir.clone());
    let ui = Arc::new(WorkflowUI::new(cli.scripted.is_some()));

    let machine =
        PhaseStateMachine::new(agent, gate, tracker, firewall, pool, audit).with_ui(ui);

    let task = Task::new(&description);
    match machine.run(&task).await? {
        WorkflowOutcome::Completed(results) => {
            println!(
                "{} {} phases approved, artifacts under {}",
                console::style("Completed:").green().bold(),
                results.len(),
                config.archive_dir.display()
            );
            Ok(ExitCode::SUCCESS)
        }
        WorkflowOutcome::Aborted {
            at_phase,
            reason,
            results,
        } => {
            eprintln!(
                "{} at {} ({:?}); {} phase result(s) and all artifacts retained",
                console::style("Aborted").red().bold(),
                at_phase,
                reason,
                results.len()
            );
            Ok(ExitCode::FAILURE)
        }
    }
}
