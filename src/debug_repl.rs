use std::path::PathBuf;

use planweave_agent::{GraphDebugger, ReplayReport};

const HELP: &str = "\
Commands:
  load <path>        Load a session file
  status             List steps with status
  node <id>          Show a step's inputs, output and error
  replay <id>        Re-run a step against the current namespace
  globals [key]      Show the namespace (or one key)
  save [path]        Save the debug session (never the original file)
  trace <path>       Write the last replay's turns as JSON
  help               Show this help
  exit               Leave the debugger";

/// Interactive shell around a [`GraphDebugger`].
pub async fn run(mut debugger: GraphDebugger, initial: Option<PathBuf>) -> anyhow::Result<()> {
    println!("planweave debugger v{}", env!("CARGO_PKG_VERSION"));
    if debugger.is_read_only() {
        println!("No capabilities configured: replay is disabled.");
    }
    println!("Type 'help' for commands.\n");

    if let Some(path) = initial {
        load(&mut debugger, &path).await;
    }

    loop {
        let line = match read_line().await? {
            Some(line) => line,
            None => break,
        };
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(&command) = parts.first() else {
            continue;
        };
        let arg = parts.get(1).copied();

        match (command, arg) {
            ("exit" | "quit" | "q", _) => break,
            ("help" | "?", _) => println!("{}", HELP),
            ("load", Some(path)) => load(&mut debugger, &PathBuf::from(path)).await,
            ("status", _) => match debugger.steps() {
                Ok(steps) => {
                    for node in steps {
                        println!(
                            "  {:<8} {:<20} {:<10} {}",
                            node.id,
                            node.agent,
                            node.status.to_string(),
                            crate::report::truncate(&node.description, 60)
                        );
                    }
                }
                Err(e) => eprintln!("{}", e),
            },
            ("node", Some(id)) => match debugger.node_details(id) {
                Ok(details) => println!("{}", serde_json::to_string_pretty(&details)?),
                Err(e) => eprintln!("{}", e),
            },
            ("replay", Some(id)) => match debugger.replay(id).await {
                Ok(report) => print_replay(&report),
                Err(e) => eprintln!("Replay failed: {}", e),
            },
            ("globals", key) => match debugger.globals(key) {
                Ok(values) => println!("{}", serde_json::to_string_pretty(&values)?),
                Err(e) => eprintln!("{}", e),
            },
            ("save", path) => match debugger.save(path.map(std::path::Path::new)).await {
                Ok(saved) => println!("Saved to {}", saved.display()),
                Err(e) => eprintln!("Save failed: {}", e),
            },
            ("trace", Some(path)) => match debugger.write_trace(std::path::Path::new(path)).await {
                Ok(()) => println!("Trace written to {}", path),
                Err(e) => eprintln!("{}", e),
            },
            ("load" | "node" | "replay" | "trace", None) => {
                eprintln!("'{}' needs an argument. Type 'help' for usage.", command)
            }
            (other, _) => eprintln!("Unknown command: {}. Type 'help' for commands.", other),
        }
    }

    Ok(())
}

async fn load(debugger: &mut GraphDebugger, path: &std::path::Path) {
    match debugger.load(path).await {
        Ok(ctx) => println!(
            "Loaded {} ({} steps) as {}",
            path.display(),
            ctx.graph().len(),
            ctx.session_id()
        ),
        Err(e) => eprintln!("Load failed: {}", e),
    }
}

/// Prompt on a blocking thread. `None` on EOF or interrupt.
async fn read_line() -> anyhow::Result<Option<String>> {
    let line = tokio::task::spawn_blocking(|| {
        dialoguer::Input::<String>::new()
            .with_prompt("debug")
            .allow_empty(true)
            .interact_text()
    })
    .await?;
    Ok(line.ok().map(|l| l.trim().to_string()))
}

pub fn print_replay(report: &ReplayReport) {
    match &report.error {
        None => println!(
            "Step {} replayed in {:.2}s",
            report.step_id, report.elapsed_secs
        ),
        Some(error) => println!(
            "Step {} failed after {:.2}s: {}",
            report.step_id, report.elapsed_secs, error
        ),
    }
    println!(
        "  inputs: {}",
        report.inputs_used.keys().cloned().collect::<Vec<_>>().join(", ")
    );
    if !report.iterations.is_empty() {
        println!("  turns: {}", report.iterations.len());
    }
    if report.diff.is_empty() {
        println!("  output unchanged");
    } else {
        for key in &report.diff.added {
            println!("  + {}", key);
        }
        for key in &report.diff.removed {
            println!("  - {}", key);
        }
        for key in &report.diff.changed {
            println!("  ~ {}", key);
        }
    }
}
