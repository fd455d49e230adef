mod debug_repl;
mod report;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use planweave_core::config::AppConfig;
use planweave_core::event::EventBus;
use planweave_core::types::{ExecutionEvent, FileEntry, Namespace};

use planweave_agent::{
    DagExecutor, GraphDebugger, PlanLoop, PlanRequest, RunOutcome, SessionStore, StepRunner,
};
use planweave_skills::{CapabilityRegistry, CommandCodeExecutor};

#[derive(Parser)]
#[command(name = "planweave", version, about = "Plan-graph executor for agent capabilities")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "planweave.toml", env = "PLANWEAVE_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan and execute a query
    Run {
        /// The query to plan for
        #[arg(trailing_var_arg = true, required = true)]
        query: Vec<String>,
        /// File to profile and attach to the manifest (repeatable)
        #[arg(short, long = "file")]
        files: Vec<PathBuf>,
        /// Seed a namespace value, KEY=VALUE (VALUE parsed as JSON when possible)
        #[arg(short, long = "global", value_parser = parse_global)]
        globals: Vec<(String, serde_json::Value)>,
        /// Session ID (auto-generated if not provided)
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Summarize a saved session, or list saved sessions
    Inspect {
        /// Session file; omit to list sessions under the session directory
        path: Option<PathBuf>,
        /// Print the raw summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Re-run one step of a saved session
    Replay {
        /// Session file
        path: PathBuf,
        /// Step ID to replay
        step: String,
        /// Save the resulting debug session
        #[arg(long)]
        save: bool,
        /// Write the replay's turns to this file
        #[arg(long)]
        trace: Option<PathBuf>,
    },
    /// Interactive debugger
    Debug {
        /// Session file to load on start
        path: Option<PathBuf>,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PLANWEAVE_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("planweave=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "planweave", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Run {
            query,
            files,
            globals,
            session,
        } => {
            let mut request = PlanRequest::new(query.join(" "));
            request.session_id = session;
            request.globals = globals.into_iter().collect::<Namespace>();
            for file in &files {
                request.file_manifest.push(FileEntry::from_path(file)?);
                request.uploaded_files.push(file.display().to_string());
            }
            run(&config, request).await?;
        }
        Commands::Inspect { path: None, .. } => {
            let store = SessionStore::new(config.session_dir());
            let sessions = store.list().await?;
            if sessions.is_empty() {
                println!("No sessions under {}", store.base_dir().display());
            }
            for path in sessions {
                println!("{}", path.display());
            }
        }
        Commands::Inspect {
            path: Some(path),
            json,
        } => {
            let ctx = SessionStore::load(&path, true).await?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.get_execution_summary())?
                );
            } else {
                print!("{}", report::render(&ctx, None));
            }
        }
        Commands::Replay {
            path,
            step,
            save,
            trace,
        } => {
            let mut debugger = build_debugger(&config);
            if debugger.is_read_only() {
                anyhow::bail!(
                    "no capabilities configured; replay needs [capabilities] or capabilities_dir"
                );
            }
            debugger.load(&path).await?;
            let result = debugger.replay(&step).await?;
            debug_repl::print_replay(&result);
            if let Some(trace) = trace {
                debugger.write_trace(&trace).await?;
                println!("Trace written to {}", trace.display());
            }
            if save {
                let saved = debugger.save(None).await?;
                println!("Saved to {}", saved.display());
            }
        }
        Commands::Debug { path } => {
            debug_repl::run(build_debugger(&config), path).await?;
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    let home_config = std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".planweave").join("config.toml"));
    match home_config {
        Some(p) if p.exists() => Ok(AppConfig::load(&p)?),
        _ => {
            warn!(path = %path.display(), "No config file found, using defaults");
            Ok(AppConfig::default())
        }
    }
}

fn build_runner(config: &AppConfig) -> StepRunner {
    let registry = Arc::new(CapabilityRegistry::from_config(config));
    let mut runner = StepRunner::new(registry);
    if let Some(code) = &config.code_executor {
        runner = runner.with_code_executor(Arc::new(CommandCodeExecutor::from_config(code)));
    }
    runner
}

fn build_debugger(config: &AppConfig) -> GraphDebugger {
    let session_dir = config.session_dir();
    let output_dir = session_dir
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| session_dir.clone());
    let mut debugger =
        GraphDebugger::new(output_dir).with_formatter_agent(config.planner.formatter_agent.clone());
    let runner = build_runner(config);
    if !runner.backend().capabilities().is_empty() {
        debugger = debugger.with_runner(runner);
    }
    debugger
}

async fn run(config: &AppConfig, request: PlanRequest) -> anyhow::Result<()> {
    let runner = build_runner(config);
    let backend = runner.backend().clone();
    if backend.capabilities().is_empty() {
        anyhow::bail!(
            "no capabilities configured; add [capabilities.<Name>] entries or capabilities_dir"
        );
    }

    let event_bus = Arc::new(EventBus::default());
    let mut executor = DagExecutor::new(runner, config.executor.clone())
        .with_formatter_agent(config.planner.formatter_agent.clone())
        .with_event_bus(event_bus.clone());
    if config.session.auto_save {
        executor = executor.with_session_store(SessionStore::new(config.session_dir()));
    }

    let mut rx = event_bus.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                ExecutionEvent::BatchStarted { iteration, steps } => {
                    eprintln!("[{}] running {}", iteration, steps.join(", "));
                }
                ExecutionEvent::StepCompleted {
                    step_id,
                    call_self_used,
                } => {
                    let suffix = if call_self_used { " (2 turns)" } else { "" };
                    eprintln!("  {}: ok{}", step_id, suffix);
                }
                ExecutionEvent::StepFailed { step_id, error } => {
                    eprintln!("  {}: FAILED {}", step_id, report::truncate(&error, 200));
                }
                ExecutionEvent::RunFinished { .. } => break,
                _ => {}
            }
        }
    });

    let plan_loop = PlanLoop::new(backend, executor, config.planner.clone());
    let (ctx, run_report) = plan_loop.run(request).await?;
    drop(plan_loop);
    printer.await.ok();

    println!();
    print!("{}", report::render(&ctx, Some(&run_report)));

    if config.session.auto_save {
        let path = SessionStore::new(config.session_dir()).path_for(ctx.attrs());
        println!("\nSession file: {}", path.display());
    }

    if run_report.outcome != RunOutcome::Completed {
        anyhow::bail!("run ended with outcome {}", run_report.outcome);
    }
    info!(session_id = %ctx.session_id(), "Run completed");
    Ok(())
}

fn parse_global(s: &str) -> Result<(String, serde_json::Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.is_empty() {
        return Err("empty key".to_string());
    }
    let value = serde_json::from_str(raw)
        .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}
