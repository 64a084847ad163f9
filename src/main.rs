use anyhow::Context;
use std::io::{self, BufRead, Write};

use recordsd::config::Config;
use recordsd::{db, ipc};

/// Logs go to stderr; stdout carries only IPC responses.
fn init_logging(filter: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(filter)
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
        .context("failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .with_target(false)
        .compact()
        .init();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;
    init_logging(&cfg.log_filter)?;

    let mut state = ipc::AppState::new(cfg.busy_timeout);
    if let Some(ws) = &cfg.workspace {
        let conn = db::open_db_with_timeout(ws, cfg.busy_timeout)
            .with_context(|| format!("failed to open workspace {}", ws.display()))?;
        state.workspace = Some(ws.clone());
        state.db = Some(conn);
        tracing::info!(workspace = %ws.display(), "workspace opened from environment");
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "recordsd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                tracing::warn!(error = %e, "unparseable request line");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    tracing::info!("stdin closed, shutting down");
    Ok(())
}
