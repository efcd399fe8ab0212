use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use pulse_common::{APP_NAME, PulseConfig, logging};
use pulse_completion::HttpCompletionClient;
use pulse_core::{Goal, NewEvent, NewProposal, NewStep, StepStatus};
use pulse_pipeline::{HeartbeatPipeline, RunReport};
use pulse_store::{MissionStore, SqliteStore};
use tracing::warn;

const PULSE_EVENT_KIND: &str = "heartbeat_pulse";

#[derive(Debug, Parser)]
#[command(name = "pulse", about = "Heartbeat mission pipeline CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate local setup and generate default config if missing.
    Doctor,
    /// Run one heartbeat: distill, resolve goal, plan, execute.
    Run,
    /// Record observed events.
    Event {
        #[command(subcommand)]
        command: EventCommand,
    },
    /// Goal operations.
    Goal {
        #[command(subcommand)]
        command: GoalCommand,
    },
    /// Inspect distilled memories.
    Memory {
        #[command(subcommand)]
        command: MemoryCommand,
    },
    /// Proposal operations.
    Proposal {
        #[command(subcommand)]
        command: ProposalCommand,
    },
    /// Mission step operations.
    Step {
        #[command(subcommand)]
        command: StepCommand,
    },
    /// Completion model configuration.
    Model {
        #[command(subcommand)]
        command: ModelCommand,
    },
}

#[derive(Debug, Subcommand)]
enum EventCommand {
    /// Record a dialogue turn (or any event kind) for later distillation.
    Add {
        summary: String,
        #[arg(long)]
        speaker: Option<String>,
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        title: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum GoalCommand {
    /// Add an active goal. Lower priority numbers are pursued first.
    Add {
        title: String,
        #[arg(long, default_value_t = 1)]
        priority: i64,
    },
    /// List goals in priority order.
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Change a goal's status, e.g. `paused` or `active`.
    Status { goal_id: String, status: String },
}

#[derive(Debug, Subcommand)]
enum MemoryCommand {
    /// Most recent memories for the configured agent.
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        agent: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum ProposalCommand {
    /// Most recent proposals.
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// File a requested (non-initiative) proposal with queued steps.
    Submit {
        title: String,
        #[arg(long)]
        summary: Option<String>,
        /// Step titles in execution order. Repeat for several steps.
        #[arg(long = "step")]
        steps: Vec<String>,
        #[arg(long)]
        agent: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum StepCommand {
    /// List steps, optionally for one proposal.
    List {
        #[arg(long)]
        proposal: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum ModelCommand {
    /// Show the configured provider, model and endpoint.
    Show,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Some(Command::Doctor) => doctor(),
        Some(Command::Run) => run(),
        Some(Command::Event { command }) => event(command),
        Some(Command::Goal { command }) => goal(command),
        Some(Command::Memory { command }) => memory(command),
        Some(Command::Proposal { command }) => proposal(command),
        Some(Command::Step { command }) => step(command),
        Some(Command::Model { command }) => model(command),
        None => {
            println!("{APP_NAME} CLI bootstrap complete.");
            println!("Run `pulse doctor` to generate and validate local config.");
            Ok(())
        }
    }
}

fn load_initialized_config() -> Result<PulseConfig> {
    let (config, _, _) = PulseConfig::load_or_create()?;
    config.validate_and_prepare()?;
    logging::init_from_config(&config);
    Ok(config)
}

fn doctor() -> Result<()> {
    let (config, path, created) = PulseConfig::load_or_create()?;
    config.validate_and_prepare()?;
    logging::init_from_config(&config);
    let store = SqliteStore::open(&config.db_path())?;

    println!("{} doctor: OK", APP_NAME);
    println!("config: {}", path.display());
    println!("workspace: {}", config.workspace_dir.display());
    println!("db: {}", store.db_path().display());
    println!("schema_version: {}", store.schema_version()?);
    println!("agent_id: {}", config.agent_id);
    println!("provider: {}", config.model.provider.as_str());
    println!("api_key_present: {}", api_key_status(&config));
    println!("created_config: {created}");

    Ok(())
}

fn run() -> Result<()> {
    let config = load_initialized_config()?;
    let store = SqliteStore::open(&config.db_path())?;
    let completion = HttpCompletionClient::from_config(&config.model)?;

    let pipeline = HeartbeatPipeline::new(&store, &completion, &config.agent_id, &config.pipeline);
    let report = pipeline.run();
    print_report(&report);

    let marker = NewEvent::new(PULSE_EVENT_KIND, report.summary())
        .with_agent(config.agent_id.as_str())
        .with_title(Some(format!("heartbeat {}", report.run_id)));
    if let Err(err) = store.record_event(&marker) {
        warn!(error = %err, "failed to record heartbeat marker");
    }

    if !report.succeeded() {
        bail!("heartbeat {} finished with failed stages", report.run_id);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("run_id: {}", report.run_id);
    for entry in &report.stages {
        println!(
            "{}: {} ({})",
            entry.stage,
            entry.outcome.label(),
            entry.outcome.detail()
        );
    }
    println!("succeeded: {}", report.succeeded());
}

fn event(command: EventCommand) -> Result<()> {
    let config = load_initialized_config()?;
    let store = SqliteStore::open(&config.db_path())?;

    match command {
        EventCommand::Add {
            summary,
            speaker,
            kind,
            title,
        } => {
            if summary.trim().is_empty() {
                bail!("event summary cannot be empty");
            }
            let kind = kind.unwrap_or_else(|| config.pipeline.conversation_kind.clone());
            let mut new_event = NewEvent::new(kind, summary).with_title(title);
            if let Some(speaker) = speaker {
                new_event = new_event.with_agent(speaker);
            }
            let recorded = store.record_event(&new_event)?;
            println!("event_id: {}", recorded.id);
            println!("kind: {}", recorded.kind);
            println!("created_at: {}", recorded.created_at);
        }
    }
    Ok(())
}

fn goal(command: GoalCommand) -> Result<()> {
    let config = load_initialized_config()?;
    let store = SqliteStore::open(&config.db_path())?;

    match command {
        GoalCommand::Add { title, priority } => {
            if title.trim().is_empty() {
                bail!("goal title cannot be empty");
            }
            let goal = Goal::new(title.trim(), priority);
            store.add_goal(&goal)?;
            println!("goal_id: {}", goal.id);
            println!("status: {}", goal.status);
            println!("priority: {}", goal.priority);
        }
        GoalCommand::List { limit } => {
            let goals = store.list_goals(limit)?;
            println!("goals: {}", goals.len());
            for goal in goals {
                println!(
                    "- {} | p{} | {} | {}",
                    goal.id, goal.priority, goal.status, goal.title
                );
            }
        }
        GoalCommand::Status { goal_id, status } => {
            if store.set_goal_status(&goal_id, status.trim())? {
                println!("goal_id: {goal_id}");
                println!("status: {}", status.trim());
            } else {
                println!("goal not found: {goal_id}");
            }
        }
    }
    Ok(())
}

fn memory(command: MemoryCommand) -> Result<()> {
    let config = load_initialized_config()?;
    let store = SqliteStore::open(&config.db_path())?;

    match command {
        MemoryCommand::List { limit, agent } => {
            let agent = agent.unwrap_or_else(|| config.agent_id.clone());
            let records = store.recent_memories(&agent, limit)?;
            println!("memories: {}", records.len());
            for record in records {
                println!(
                    "- {} | {} | {:.2} | {}",
                    record.id,
                    record.kind.as_str(),
                    record.confidence,
                    record.content
                );
            }
        }
    }
    Ok(())
}

fn proposal(command: ProposalCommand) -> Result<()> {
    let config = load_initialized_config()?;
    let store = SqliteStore::open(&config.db_path())?;

    match command {
        ProposalCommand::List { limit } => {
            let proposals = store.list_proposals(limit)?;
            println!("proposals: {}", proposals.len());
            for proposal in proposals {
                let origin = if proposal.is_initiative {
                    "initiative"
                } else {
                    "requested"
                };
                println!(
                    "- {} | {} | {} | {}",
                    proposal.id, proposal.status, origin, proposal.title
                );
            }
        }
        ProposalCommand::Submit {
            title,
            summary,
            steps,
            agent,
        } => {
            if title.trim().is_empty() {
                bail!("proposal title cannot be empty");
            }
            if let Some(blank) = steps.iter().position(|step| step.trim().is_empty()) {
                bail!("step {} has an empty title", blank + 1);
            }
            let agent = agent.unwrap_or_else(|| config.agent_id.clone());
            let created = store
                .insert_proposal(&NewProposal::requested(agent, title.trim()).with_summary(summary))?;
            let new_steps: Vec<NewStep> = steps
                .iter()
                .enumerate()
                .map(|(idx, step)| {
                    NewStep::new(idx as i64 + 1, step.trim()).with_status(StepStatus::Queued)
                })
                .collect();
            let inserted = if new_steps.is_empty() {
                Vec::new()
            } else {
                store.insert_steps(&created.id, &new_steps)?
            };
            println!("proposal_id: {}", created.id);
            println!("status: {}", created.status);
            println!("steps: {}", inserted.len());
        }
    }
    Ok(())
}

fn step(command: StepCommand) -> Result<()> {
    let config = load_initialized_config()?;
    let store = SqliteStore::open(&config.db_path())?;

    match command {
        StepCommand::List { proposal } => {
            let steps = store.list_steps(proposal.as_deref())?;
            println!("steps: {}", steps.len());
            for step in steps {
                println!(
                    "- {} | {} #{} | {} | {}",
                    step.id,
                    step.proposal_id,
                    step.step_order,
                    step.status.as_str(),
                    step.title
                );
                if let Some(note) = step.technical_note {
                    println!("  note: {}", note.replace('\n', "\n        "));
                }
            }
        }
    }
    Ok(())
}

fn model(command: ModelCommand) -> Result<()> {
    let config = load_initialized_config()?;

    match command {
        ModelCommand::Show => {
            let model = &config.model;
            println!("provider: {}", model.provider.as_str());
            println!("model: {}", model.model_id);
            println!(
                "endpoint: {}",
                model
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| model.provider.default_endpoint().to_string())
            );
            println!(
                "api_key_env: {}",
                key_env_name(&config).unwrap_or_else(|| "<none>".to_string())
            );
            println!("max_output_tokens: {}", model.max_output_tokens);
            println!("timeout_ms: {}", model.timeout_ms);
        }
    }
    Ok(())
}

fn key_env_name(config: &PulseConfig) -> Option<String> {
    config
        .model
        .api_key_env
        .clone()
        .or_else(|| config.model.provider.default_api_key_env().map(str::to_string))
}

fn api_key_status(config: &PulseConfig) -> String {
    match key_env_name(config) {
        Some(name) => match std::env::var(&name) {
            Ok(value) if !value.trim().is_empty() => format!("true ({name})"),
            _ => format!("false ({name} unset)"),
        },
        None => "not required".to_string(),
    }
}
