//! Command-line front end for the toolsmith agent.
//!
//! Keeps its state under `.toolsmith/` in the current directory: the config
//! (`config.toml`) and the record of the last run (`last_run.json`). The tool
//! library and generated scripts live where the config points.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use toolsmith::agent::{Agent, AgentDeps, AgentSettings};
use toolsmith::batch::run_batch;
use toolsmith::core::types::{RunOutcome, TerminalState};
use toolsmith::exit_codes;
use toolsmith::io::STATE_DIR;
use toolsmith::io::config::{AgentConfig, load_config, write_config};
use toolsmith::io::generator::CommandGenerator;
use toolsmith::io::run_record::{LAST_RUN_FILE, LastRun, load_last_run, write_last_run};
use toolsmith::io::sandbox::SandboxRunner;
use toolsmith::io::tool_store::ToolStore;
use toolsmith::logging;
use toolsmith::retry::ThreadSleeper;

const CONFIG_FILE: &str = "config.toml";

#[derive(Parser)]
#[command(
    name = "toolsmith",
    version,
    about = "Autonomous task agent that plans, writes and reuses its own tools"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.toolsmith/config.toml` with default settings.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run a goal; without one, read goals line by line until `exit`.
    Run {
        goal: Option<String>,
        /// Append a verification step to the plan.
        #[arg(long)]
        verify: bool,
    },
    /// Change the result of the last run.
    Iterate {
        /// What to change about the last result.
        #[arg(long)]
        request: String,
        #[arg(long)]
        verify: bool,
    },
    /// Run several goals concurrently.
    Batch {
        #[arg(required = true)]
        goals: Vec<String>,
    },
    /// Inspect the tool library.
    Tools {
        #[command(subcommand)]
        command: ToolsCommand,
    },
}

#[derive(Subcommand)]
enum ToolsCommand {
    /// List stored tools by name.
    List,
    /// Print the code of one tool.
    Show { name: String },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let root = PathBuf::from(".");
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Run { goal, verify } => {
            let ws = Workspace::load(&root, verify)?;
            match goal {
                Some(goal) => Ok(ws.run_goal(&goal)),
                None => ws.run_interactive(io::stdin().lock()),
            }
        }
        Command::Iterate { request, verify } => Workspace::load(&root, verify)?.iterate(&request),
        Command::Batch { goals } => Ok(Workspace::load(&root, false)?.run_batch(&goals)),
        Command::Tools { command } => {
            let ws = Workspace::load(&root, false)?;
            match command {
                ToolsCommand::List => ws.list_tools(),
                ToolsCommand::Show { name } => ws.show_tool(&name),
            }
        }
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let path = root.join(STATE_DIR).join(CONFIG_FILE);
    if path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(&path, &AgentConfig::default()).context("write default config")?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

/// Resolved configuration and the collaborators built from it.
struct Workspace {
    state_dir: PathBuf,
    settings: AgentSettings,
    store: ToolStore,
    generator: CommandGenerator,
    runner: SandboxRunner,
}

impl Workspace {
    fn load(root: &Path, verify: bool) -> Result<Self> {
        let state_dir = root.join(STATE_DIR);
        let mut cfg = load_config(&state_dir.join(CONFIG_FILE))?;
        cfg.apply_env_overrides();
        if verify {
            cfg.verify = true;
        }
        cfg.validate()?;
        Ok(Self {
            settings: AgentSettings::from_config(&cfg),
            store: ToolStore::new(root.join(&cfg.tool_library_path)),
            generator: CommandGenerator::from_config(&cfg),
            runner: SandboxRunner::from_config(root, &cfg),
            state_dir,
        })
    }

    fn with_deps<T>(&self, f: impl FnOnce(AgentDeps<'_>) -> T) -> T {
        let sink = |line: &str| println!("{line}");
        f(AgentDeps {
            generator: &self.generator,
            runner: &self.runner,
            store: &self.store,
            sleeper: &ThreadSleeper,
            sink: &sink,
        })
    }

    fn run_goal(&self, goal: &str) -> i32 {
        let outcome = self.with_deps(|deps| Agent::new(deps, self.settings.clone()).run(goal, None));
        self.record(goal, &outcome);
        report(&outcome)
    }

    fn run_interactive(&self, input: impl BufRead) -> Result<i32> {
        println!("Enter a goal (or `exit` to quit):");
        let mut code = exit_codes::OK;
        for line in input.lines() {
            let line = line.context("read goal from stdin")?;
            let goal = line.trim();
            if goal.eq_ignore_ascii_case("exit") {
                break;
            }
            if goal.is_empty() {
                continue;
            }
            code = self.run_goal(goal);
            println!("Enter a goal (or `exit` to quit):");
        }
        Ok(code)
    }

    fn iterate(&self, request: &str) -> Result<i32> {
        let path = self.state_dir.join(LAST_RUN_FILE);
        if !path.exists() {
            bail!("no previous run recorded at {}; use `toolsmith run` first", path.display());
        }
        let last = load_last_run(&path)?;
        let context = last.to_iteration_context(request);
        let outcome = self.with_deps(|deps| {
            Agent::new(deps, self.settings.clone()).run(request, Some(&context))
        });
        self.record(&context.original_goal, &outcome);
        Ok(report(&outcome))
    }

    fn run_batch(&self, goals: &[String]) -> i32 {
        let outcomes = self.with_deps(|deps| run_batch(deps, &self.settings, goals));
        for (idx, (goal, outcome)) in goals.iter().zip(&outcomes).enumerate() {
            println!("[goal-{}] {}: {}", idx + 1, outcome.state.as_str(), goal);
        }
        if outcomes.iter().any(|o| o.state == TerminalState::Failed) {
            exit_codes::FAILED
        } else if outcomes.iter().all(RunOutcome::success) {
            exit_codes::OK
        } else {
            exit_codes::NEEDS_HUMAN
        }
    }

    fn list_tools(&self) -> Result<i32> {
        let tools = self.store.list()?;
        if tools.is_empty() {
            println!("(no tools)");
        }
        for tool in tools {
            println!("{}: {}", tool.name, tool.description);
        }
        Ok(exit_codes::OK)
    }

    fn show_tool(&self, name: &str) -> Result<i32> {
        match self.store.get(name)? {
            Some(code) => {
                println!("{code}");
                Ok(exit_codes::OK)
            }
            None => bail!("no tool named '{name}' in {}", self.store.path().display()),
        }
    }

    fn record(&self, goal: &str, outcome: &RunOutcome) {
        let path = self.state_dir.join(LAST_RUN_FILE);
        if let Err(err) = write_last_run(&path, &LastRun::from_outcome(goal, outcome)) {
            eprintln!("warning: could not record run: {err:#}");
        }
    }
}

fn report(outcome: &RunOutcome) -> i32 {
    match &outcome.state {
        TerminalState::Done => println!("Task finished."),
        TerminalState::Failed => println!(
            "Task failed: {}",
            outcome.reason.as_deref().unwrap_or("unknown reason")
        ),
        TerminalState::NeedsHumanAction { .. } => {
            println!("Operator action required; see the instructions above.");
        }
    }
    exit_codes::for_state(&outcome.state)
}
