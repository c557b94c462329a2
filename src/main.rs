//! Control-channel entry point: reads line-delimited JSON requests from
//! stdin, writes line-delimited JSON events to stdout, logs to stderr via
//! `tracing` (grounded on `deskmic`'s `tracing_subscriber::fmt()` +
//! `EnvFilter` setup — the teacher's own binary only ever `println!`s).

use std::io::{self, BufRead};
use std::sync::Arc;

use asr_orchestrator::backend::factory;
use asr_orchestrator::config::AppConfig;
use asr_orchestrator::control;
use asr_orchestrator::events::{Event, EventEmitter};
use asr_orchestrator::session::SessionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("asr_orchestrator=info".parse()?),
        )
        .init();

    let config = AppConfig::from_env();
    let events = Arc::new(EventEmitter::new(io::stdout()));

    let engine = match factory::create_engine(&config).await {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            tracing::error!(error = %e, "failed to construct transcription backend");
            let _ = events.emit(&Event::Fatal {
                status: "fatal",
                error: e.to_string(),
            });
            std::process::exit(1);
        }
    };

    let manager = SessionManager::new(config, events.clone());
    let _reaper = manager.spawn_reaper();

    tracing::info!("asr-orchestrator ready, reading control channel from stdin");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "error reading control channel line");
                continue;
            }
        };

        match control::parse_line(&line) {
            Ok(None) => continue,
            Ok(Some(request)) => {
                if let Err(e) = manager.dispatch(request, engine.clone()).await {
                    tracing::warn!(error = %e, "failed to dispatch control request");
                    manager.emit_error(None, e.to_string());
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, line = %line, "malformed control request");
                manager.handle_control_error(None, e);
            }
        }
    }

    Ok(())
}
