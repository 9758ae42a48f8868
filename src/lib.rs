pub mod ac;
pub mod classifier;
pub mod config;
pub mod console;
pub mod engine;
pub mod error;
pub mod identity;
pub mod output;
pub mod parser;
pub mod state;
pub mod tailer;
pub mod window;

use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing_appender::non_blocking::WorkerGuard;

// ---------------------------------------------------------------------------
// Logging: a daily rolling file under the config directory.
// stdout is reserved for snapshots, so nothing is logged there.
// ---------------------------------------------------------------------------

/// Keep the returned guard alive for the process lifetime; dropping it flushes.
pub fn init_logging(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "tracker.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nwn_tracker_lib=debug".parse()?),
        )
        .with_writer(non_blocking)
        .with_ansi(false) // log files should not contain ANSI colour codes
        .init();

    // Panic hook: log panics through tracing before the process dies.
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());
        let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        tracing::error!("PANIC at {}: {}", location, message);
        eprintln!("panic at {}: {}", location, message);
    }));

    tracing::info!("NWN combat tracker starting, logs -> {}", log_dir.display());
    Ok(guard)
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Run the tracker until the operator quits or presses Ctrl-C.
///
/// Pipeline: tailer -> parser -> engine -> output, with the console feeding
/// commands into the engine.
pub async fn run(cfg: config::AppConfig) -> Result<()> {
    // Fails on an empty player name before anything is spawned.
    let mut tracker = engine::Tracker::new(&cfg.player_name, cfg.ab_window_ms())?;
    if !cfg.target.trim().is_empty() {
        tracker.set_target(&cfg.resolve_alias(&cfg.target), cfg.match_mode);
    }
    let source = cfg.log_source()?;

    let (raw_tx,   raw_rx)    = mpsc::channel::<String>(2048);
    let (event_tx, event_rx)  = mpsc::channel::<parser::CombatEvent>(1024);
    let (cmd_tx,   cmd_rx)    = mpsc::channel::<engine::Command>(16);
    let (snap_tx,  snap_rx)   = watch::channel(state::FightSnapshot::default());
    let (status_tx, status_rx) = watch::channel(tailer::StreamStatus::default());

    tokio::spawn(tailer::run(
        source,
        Duration::from_millis(cfg.poll_interval_ms.max(10)),
        raw_tx,
        status_tx,
    ));
    tokio::spawn(parser::run(raw_rx, event_tx));
    tokio::spawn(engine::run(
        tracker,
        event_rx,
        cmd_rx,
        snap_tx,
        Duration::from_millis(cfg.refresh_ms.max(50)),
    ));
    let output = tokio::spawn(output::run(snap_rx, status_rx, cfg.output, std::io::stdout()));

    let handle = engine::TrackerHandle::new(cmd_tx);
    tokio::select! {
        quit = console::run(cfg, handle) => {
            if !quit? {
                // No interactive input (stdin redirected); keep tracking.
                tokio::signal::ctrl_c().await?;
            }
        }
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
        res = output => res??,
    }
    tracing::info!("Tracker stopped");
    Ok(())
}
