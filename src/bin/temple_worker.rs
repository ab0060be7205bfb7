//! temple-worker: the subprocess entry point for one solve.
//!
//! Protocol (spoken with the orchestration layer over stdio):
//! - stdin, line 1: the `SolveRequest` as JSON
//! - stdin, later lines: `abort` requests a cooperative stop; EOF does too
//! - stdout: one JSON `WorkerMsg` per line, a `best` for every accepted
//!   improving solution and then exactly one `final`
//!
//! Logs go to stderr so stdout stays a clean protocol stream. The parent
//! holds the kill switch; this process only needs to honor the abort flag
//! opportunistically.

use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

use temple_solver::jobs::WorkerMsg;
use temple_solver::solve::{self, SolveOptions};
use temple_solver::SolveRequest;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "temple_worker=info".into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let stdin = std::io::stdin();
    let mut first_line = String::new();
    stdin
        .lock()
        .read_line(&mut first_line)
        .context("read solve request from stdin")?;
    let request: SolveRequest =
        serde_json::from_str(first_line.trim()).context("parse solve request")?;

    // Watch the rest of stdin for a cooperative abort; the pipe closing
    // counts as one.
    let abort = Arc::new(AtomicBool::new(false));
    {
        let abort = Arc::clone(&abort);
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(l) if l.trim() == "abort" => break,
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
            abort.store(true, Ordering::Relaxed);
        });
    }

    let stdout = Mutex::new(std::io::stdout());
    let emit = |msg: &WorkerMsg| {
        if let Ok(line) = serde_json::to_string(msg) {
            let mut out = stdout.lock().expect("stdout poisoned");
            let _ = writeln!(out, "{line}");
            let _ = out.flush();
        }
    };

    let opts = SolveOptions {
        abort: Some(Arc::clone(&abort)),
        ..SolveOptions::default()
    };
    let result = solve::run(&request, &opts, |solution| {
        emit(&WorkerMsg::Best {
            solution: solution.clone(),
        });
    });
    emit(&WorkerMsg::Final {
        result: Box::new(result),
    });
    Ok(())
}
