mod calc;
mod config;
mod db;
mod grading;
mod ipc;
mod logging;
mod scales;

use clap::Parser;
use std::io::{self, BufRead, Write};

fn main() {
    let cfg = config::Config::parse();
    if let Err(e) = logging::init_tracing(&cfg.log_level) {
        eprintln!("gradebookd: logging disabled: {e}");
    }

    let mut state = ipc::AppState::default();
    if let Some(path) = cfg.workspace.as_deref() {
        // A bad startup workspace is not fatal; the client can still select one.
        if let Err(e) = ipc::select_workspace(&mut state, path) {
            tracing::error!(workspace = %path.display(), error = %e, "startup workspace open failed");
        }
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gradebookd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
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
    tracing::info!("stdin closed, exiting");
}
