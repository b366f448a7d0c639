//! maestro: generative band in the terminal

mod command;
mod config;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use command::Command;
use crossbeam_channel::{Receiver, select, tick, unbounded};
use maestro_core::{ConductorHandle, OutroPhase};
use maestro_services::{AudioEngine, CpalSink, EngineConfig, EngineError, OutputSink, RunOutcome};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "maestro", about = "Generative band that plays until you call the outro")]
struct Args {
    /// Config file (default: <config dir>/maestro/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Samples per render block, rounded up to a power of two
    #[arg(long)]
    block_size: Option<usize>,
    #[arg(long)]
    style: Option<String>,
    #[arg(long)]
    bpm: Option<f32>,
    /// e.g. "A min" or "F# dorian"
    #[arg(long)]
    key: Option<String>,
    #[arg(long)]
    seed: Option<u64>,
    /// Skip setup silence and start playing immediately
    #[arg(long)]
    autostart: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("maestro=info")),
        )
        .init();

    let args = Args::parse();
    let mut app_config = config::load_config(args.config.as_deref());

    if let Some(block_size) = args.block_size {
        app_config.engine.block_size = block_size;
    }
    if let Some(seed) = args.seed {
        app_config.engine.seed = seed;
    }
    let session = &mut app_config.session;
    if let Some(style) = args.style {
        session.style = style;
    }
    if let Some(bpm) = args.bpm {
        session.bpm = bpm;
    }
    if let Some(key) = args.key {
        session.key = key;
    }

    let handle = ConductorHandle::new(app_config.session.to_settings());
    if args.autostart {
        handle.start();
    }

    info!("Starting maestro");
    let stop = Arc::new(AtomicBool::new(false));
    let engine_thread = spawn_engine(app_config.engine, handle.clone(), stop.clone())?;
    let (done_tx, done_rx) = unbounded();
    thread::Builder::new()
        .name("maestro-wait".into())
        .spawn(move || {
            let result = engine_thread
                .join()
                .unwrap_or_else(|_| Err(EngineError::InvalidConfig("engine thread panicked".into())));
            let _ = done_tx.send(result);
        })
        .context("Failed to spawn engine watcher")?;

    println!("{}", command::HELP);
    let outcome = control_loop(&handle, &stop, spawn_stdin(), done_rx)?;
    match outcome {
        RunOutcome::Finished => info!("Session finished"),
        RunOutcome::Stopped => info!("Session stopped"),
    }
    Ok(())
}

/// The output stream must be opened on the thread that keeps it
fn spawn_engine(
    config: EngineConfig,
    handle: ConductorHandle,
    stop: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<Result<RunOutcome, EngineError>>> {
    config.validate()?;
    thread::Builder::new()
        .name("maestro-render".into())
        .spawn(move || {
            let mut sink = CpalSink::open(config.effective_block_size(), config.queue_blocks, config.stall_timeout())?;
            let mut engine = AudioEngine::new(&handle, &config, sink.sample_rate())?;
            engine.run(&mut sink, &stop)
        })
        .context("Failed to spawn render thread")
}

fn spawn_stdin() -> Receiver<String> {
    let (tx, rx) = unbounded();
    let spawned = thread::Builder::new().name("maestro-stdin".into()).spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    if let Err(e) = spawned {
        warn!("No command input: {}", e);
    }
    rx
}

fn control_loop(
    handle: &ConductorHandle,
    stop: &AtomicBool,
    lines: Receiver<String>,
    done: Receiver<Result<RunOutcome, EngineError>>,
) -> Result<RunOutcome> {
    let ticker = tick(Duration::from_millis(250));
    let mut phase = OutroPhase::Inactive;
    let mut input_open = true;

    loop {
        let input = if input_open { lines.clone() } else { crossbeam_channel::never() };
        select! {
            recv(done) -> result => {
                let result = result.context("Engine thread vanished")?;
                return result.context("Audio engine failed");
            }
            recv(input) -> line => match line {
                Ok(line) => handle_line(handle, stop, &line),
                Err(_) => {
                    info!("Command input closed");
                    input_open = false;
                }
            },
            recv(ticker) -> _ => {
                if let Some(state) = handle.status().snapshot {
                    if state.outro.phase != phase {
                        phase = state.outro.phase;
                        info!("Outro: {}", phase.name());
                    }
                }
            }
        }
    }
}

fn handle_line(handle: &ConductorHandle, stop: &AtomicBool, line: &str) {
    match Command::parse(line) {
        Ok(None) => {}
        Ok(Some(Command::Quit)) => stop.store(true, Ordering::Release),
        Ok(Some(cmd)) => match cmd.apply(handle) {
            Ok(reply) => println!("{}", reply),
            Err(e) => {
                warn!("Rejected '{}': {}", line.trim(), e);
                println!("error: {}", e);
            }
        },
        Err(e) => println!("{}", e),
    }
}
