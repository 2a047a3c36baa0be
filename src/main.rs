//=====================================================
// File: main.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Loopscope command line
// Objective: Run scripts through the harness and fold, step, or list traces
//            from the terminal
//=====================================================

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use loopscope::config::LoopscopeConfig;
use loopscope::event::{encode_event, parse_events, write_events, Event, EventDecoder};
use loopscope::harness::{Controller, RunRequest};
use loopscope::reducer::{create_initial_state, normalize_console_stack_flow, reduce_events};
use loopscope::runtime::ClockMode;
use loopscope::{samples, stepper};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "loopscope", version, about = "Watch a script's event loop one scheduling step at a time")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a script and print its event stream as NDJSON
    Run {
        script: PathBuf,
        #[arg(long)]
        max_events: Option<usize>,
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// virtual | wall
        #[arg(long)]
        clock: Option<ClockMode>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Fold a trace and print the final visualizer state as JSON
    Reduce {
        trace: PathBuf,
        /// Backfill console sources and frames missing from older traces
        #[arg(long)]
        normalize: bool,
    },
    /// Fold a trace, then print the stepper's next synthetic events
    Step {
        trace: PathBuf,
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// List the bundled example traces
    Examples,
    /// Print one bundled example trace as NDJSON
    Example { id: String },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    install_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            script,
            max_events,
            timeout_ms,
            clock,
            config,
        } => {
            let mut config = LoopscopeConfig::load(config.as_deref())?;
            if let Some(clock) = clock {
                config.clock.mode = clock;
            }
            let code = fs::read_to_string(&script)
                .with_context(|| format!("reading script {}", script.display()))?;
            run_script(config, RunRequest {
                code,
                max_events,
                timeout_ms,
            })
            .await
        }
        Command::Reduce { trace, normalize } => {
            let mut events = read_trace(&trace)?;
            if normalize {
                events = normalize_console_stack_flow(&events);
            }
            let state = reduce_events(&events, create_initial_state());
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        Command::Step { trace, count } => {
            let events = read_trace(&trace)?;
            let mut state = reduce_events(&events, create_initial_state());
            let synthetic = stepper::advance(&mut state, count);
            write_events(io::stdout().lock(), &synthetic)?;
            Ok(())
        }
        Command::Examples => {
            let mut out = io::stdout().lock();
            for sample in samples::all() {
                writeln!(out, "{:<20} {}", sample.id, sample.title)?;
            }
            Ok(())
        }
        Command::Example { id } => {
            let Some(sample) = samples::get(&id) else {
                bail!("unknown example '{id}' (see `loopscope examples`)");
            };
            write_events(io::stdout().lock(), &sample.events()?)?;
            Ok(())
        }
    }
}

async fn run_script(config: LoopscopeConfig, request: RunRequest) -> Result<()> {
    let controller = Controller::new(config);
    let mut handle = controller.start(request)?;
    let mut out = io::stdout().lock();
    while let Some(event) = handle.next_event().await {
        writeln!(out, "{}", encode_event(&event)?)?;
    }
    out.flush()?;
    let outcome = handle.join()?;
    tracing::debug!(
        termination = outcome.termination.as_str(),
        events = outcome.events_emitted,
        "script finished"
    );
    Ok(())
}

/// NDJSON by default; a file starting with `[` is read as a JSON array.
fn read_trace(path: &Path) -> Result<Vec<Event>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading trace {}", path.display()))?;
    let events = if text.trim_start().starts_with('[') {
        parse_events(&text)?
    } else {
        EventDecoder::new(text.as_bytes()).decode_all()?
    };
    Ok(events)
}

fn install_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}
