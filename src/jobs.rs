//! Job orchestration: a bounded FIFO queue, a fixed pool of worker
//! threads, a subprocess-isolated solve runner with streamed best-so-far
//! solutions, per-client rate limiting, and a TTL'd in-memory result
//! store.
//!
//! ## Concurrency model
//!
//! All bookkeeping lives behind a single mutex; every operation under it
//! is O(1)-ish and solving happens off-lock. Workers block on a condvar
//! while the queue is empty and poll the running solve's channels every
//! [`OrchestratorConfig::poll_period`]. Solves execute in a separate OS
//! process: the process boundary is what makes abort a bounded-latency
//! guarantee (graceful signal, then kill after a short grace) and isolates
//! the service from solver crashes.

use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, unbounded, Receiver, TryRecvError};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::request::{Solution, SolveRequest, SolveResult, SolveStats};
use crate::solve::{self, SolveOptions};
use crate::validate;

// ============================================================================
// Configuration
// ============================================================================

/// Tunables of the orchestration layer, all environment-driven in the API
/// binary.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub max_concurrent_solves: usize,
    pub max_queue_size: usize,
    /// Minimum spacing between accepted submissions per client.
    pub rate_limit: Duration,
    /// Server-side cap on a request's `max_time_seconds`.
    pub max_solve_time: f64,
    /// Completed and errored jobs are evicted after this long.
    pub result_ttl: Duration,
    /// Channel poll period while a solve runs; trades abort latency
    /// against idle wakeups.
    pub poll_period: Duration,
    /// How long an aborted subprocess gets to exit before the hard kill.
    pub abort_grace: Duration,
    /// Ring-buffer capacity of recent completions for `/admin`.
    pub recent_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            max_concurrent_solves: 1,
            max_queue_size: 8,
            rate_limit: Duration::from_secs(5),
            max_solve_time: 120.0,
            result_ttl: Duration::from_secs(300),
            poll_period: Duration::from_millis(100),
            abort_grace: Duration::from_secs(2),
            recent_capacity: 32,
        }
    }
}

// ============================================================================
// Job records
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Solving,
    Complete,
    Error,
    Aborted,
}

impl JobStatus {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error | JobStatus::Aborted)
    }
}

/// The config summary echoed while a job is queued or solving.
#[derive(Clone, Debug, Serialize)]
pub struct ConfigSummary {
    pub architect: [u8; 2],
    pub min_spymasters: u32,
    pub min_corruption_chambers: u32,
    pub max_time_seconds: f64,
}

impl ConfigSummary {
    fn of(req: &SolveRequest) -> ConfigSummary {
        ConfigSummary {
            architect: req.architect,
            min_spymasters: req.min_spymasters,
            min_corruption_chambers: req.min_corruption_chambers,
            max_time_seconds: req.max_time_seconds,
        }
    }
}

struct Job {
    id: String,
    status: JobStatus,
    client: String,
    request: SolveRequest,
    queued_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    started_mono: Option<Instant>,
    completed_mono: Option<Instant>,
    best: Option<Solution>,
    result: Option<SolveResult>,
    error: Option<String>,
}

/// What `GET /job/{id}` returns.
#[derive(Clone, Debug, Serialize)]
pub struct JobView {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<f64>,
    pub config: ConfigSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_so_far: Option<Solution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SolveResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CompletionRecord {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    pub wall_time_seconds: f64,
    pub completed_at: DateTime<Utc>,
}

/// The `/admin` snapshot.
#[derive(Clone, Debug, Serialize)]
pub struct AdminView {
    pub queued: Vec<QueuedJobView>,
    pub active: Vec<ActiveJobView>,
    pub recent: Vec<CompletionRecord>,
}

#[derive(Clone, Debug, Serialize)]
pub struct QueuedJobView {
    pub job_id: String,
    pub client: String,
    pub queue_position: usize,
    pub queued_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ActiveJobView {
    pub job_id: String,
    pub client: String,
    pub elapsed_seconds: f64,
}

/// Successful admission receipt.
#[derive(Clone, Debug, Serialize)]
pub struct SubmitReceipt {
    pub job_id: String,
    pub queue_position: usize,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("rate limited; retry in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },
    #[error("solve queue is full")]
    QueueFull,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("server is shutting down")]
    ShuttingDown,
}

// ============================================================================
// Solve runners
// ============================================================================

/// Wire protocol between the worker subprocess and the orchestrator: one
/// JSON object per stdout line.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerMsg {
    Best { solution: Solution },
    Final { result: Box<SolveResult> },
}

/// State of a running solve as seen through its channels.
pub enum FinalState {
    Pending,
    Done(Box<SolveResult>),
    Crashed(String),
}

/// A solve in flight. `try_best` drains the bounded best-so-far stream
/// (newest wins); `try_final` checks the unbounded final channel.
pub trait RunningSolve: Send {
    fn try_best(&mut self) -> Option<Solution>;
    fn try_final(&mut self) -> FinalState;
    /// Cooperative stop, then hard termination after `grace`.
    fn abort(&mut self, grace: Duration);
}

/// Strategy for launching solves; the production implementation forks a
/// subprocess, tests substitute in-process doubles.
pub trait SolveRunner: Send + Sync {
    fn spawn(&self, req: &SolveRequest) -> anyhow::Result<Box<dyn RunningSolve>>;
}

/// Production runner: one OS process per solve, speaking the
/// [`WorkerMsg`] line protocol over stdio.
pub struct SubprocessRunner {
    program: PathBuf,
}

impl SubprocessRunner {
    pub fn new(program: PathBuf) -> SubprocessRunner {
        SubprocessRunner { program }
    }

    /// The worker binary expected next to the current executable.
    pub fn sibling_worker() -> anyhow::Result<PathBuf> {
        let exe = std::env::current_exe().context("locate current executable")?;
        let dir = exe.parent().context("executable has no parent dir")?;
        Ok(dir.join("temple-worker"))
    }
}

struct SubprocessSolve {
    child: Child,
    stdin: Option<ChildStdin>,
    best_rx: Receiver<Solution>,
    final_rx: Receiver<Box<SolveResult>>,
    exited_polls: u32,
}

impl SolveRunner for SubprocessRunner {
    fn spawn(&self, req: &SolveRequest) -> anyhow::Result<Box<dyn RunningSolve>> {
        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawn solver worker {}", self.program.display()))?;
        let mut stdin = child.stdin.take().context("worker stdin unavailable")?;
        let mut line = serde_json::to_string(req).context("encode solve request")?;
        line.push('\n');
        stdin.write_all(line.as_bytes()).context("send solve request")?;
        stdin.flush().context("flush solve request")?;

        let stdout = child.stdout.take().context("worker stdout unavailable")?;
        let (best_tx, best_rx) = bounded::<Solution>(8);
        let drain = best_rx.clone();
        let (final_tx, final_rx) = unbounded::<Box<SolveResult>>();
        std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<WorkerMsg>(&line) {
                    Ok(WorkerMsg::Best { solution }) => {
                        if let Err(full) = best_tx.try_send(solution) {
                            let _ = drain.try_recv(); // drop-oldest
                            let _ = best_tx.try_send(full.into_inner());
                        }
                    }
                    Ok(WorkerMsg::Final { result }) => {
                        let _ = final_tx.send(result);
                    }
                    Err(err) => {
                        warn!(%err, "unparseable line from solver worker");
                    }
                }
            }
        });

        Ok(Box::new(SubprocessSolve {
            child,
            stdin: Some(stdin),
            best_rx,
            final_rx,
            exited_polls: 0,
        }))
    }
}

impl RunningSolve for SubprocessSolve {
    fn try_best(&mut self) -> Option<Solution> {
        let mut latest = None;
        while let Ok(s) = self.best_rx.try_recv() {
            latest = Some(s);
        }
        latest
    }

    fn try_final(&mut self) -> FinalState {
        if let Ok(result) = self.final_rx.try_recv() {
            return FinalState::Done(result);
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                // Give the reader thread one extra poll to flush a final
                // line that raced the exit.
                self.exited_polls += 1;
                if self.exited_polls < 2 {
                    return FinalState::Pending;
                }
                if let Ok(result) = self.final_rx.try_recv() {
                    FinalState::Done(result)
                } else {
                    warn!(%status, "solver subprocess died without a final message");
                    FinalState::Crashed("solver subprocess terminated unexpectedly".into())
                }
            }
            Ok(None) => FinalState::Pending,
            Err(e) => FinalState::Crashed(format!("solver subprocess unreachable: {e}")),
        }
    }

    fn abort(&mut self, grace: Duration) {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.write_all(b"abort\n");
            let _ = stdin.flush();
            // Dropping stdin closes the pipe; EOF doubles as the signal.
        }
        let deadline = Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(_) => break,
            }
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for SubprocessSolve {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// In-process fallback runner (cooperative abort only); used when the
/// worker binary is missing and by tests.
pub struct ThreadRunner {
    pub workers: usize,
}

struct ThreadSolve {
    abort: Arc<AtomicBool>,
    best_rx: Receiver<Solution>,
    final_rx: Receiver<Box<SolveResult>>,
}

impl SolveRunner for ThreadRunner {
    fn spawn(&self, req: &SolveRequest) -> anyhow::Result<Box<dyn RunningSolve>> {
        let abort = Arc::new(AtomicBool::new(false));
        let (best_tx, best_rx) = bounded::<Solution>(8);
        let drain = best_rx.clone();
        let (final_tx, final_rx) = unbounded::<Box<SolveResult>>();
        let req = req.clone();
        let flag = Arc::clone(&abort);
        let workers = self.workers;
        std::thread::spawn(move || {
            let opts = SolveOptions {
                workers,
                abort: Some(flag),
            };
            let result = solve::run(&req, &opts, |s| {
                if let Err(full) = best_tx.try_send(s.clone()) {
                    let _ = drain.try_recv();
                    let _ = best_tx.try_send(full.into_inner());
                }
            });
            let _ = final_tx.send(Box::new(result));
        });
        Ok(Box::new(ThreadSolve {
            abort,
            best_rx,
            final_rx,
        }))
    }
}

impl RunningSolve for ThreadSolve {
    fn try_best(&mut self) -> Option<Solution> {
        let mut latest = None;
        while let Ok(s) = self.best_rx.try_recv() {
            latest = Some(s);
        }
        latest
    }

    fn try_final(&mut self) -> FinalState {
        match self.final_rx.try_recv() {
            Ok(result) => FinalState::Done(result),
            Err(TryRecvError::Empty) => FinalState::Pending,
            Err(TryRecvError::Disconnected) => {
                FinalState::Crashed("solver thread terminated unexpectedly".into())
            }
        }
    }

    fn abort(&mut self, grace: Duration) {
        self.abort.store(true, Ordering::Relaxed);
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if !matches!(self.try_final(), FinalState::Pending) {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

// ============================================================================
// The job server
// ============================================================================

struct Inner {
    jobs: HashMap<String, Job>,
    queue: VecDeque<String>,
    rate: HashMap<String, Instant>,
    recent: VecDeque<CompletionRecord>,
    shutdown: bool,
}

/// The orchestration core shared between the HTTP façade and the worker
/// pool.
pub struct JobServer {
    cfg: OrchestratorConfig,
    runner: Arc<dyn SolveRunner>,
    inner: Mutex<Inner>,
    wake: Condvar,
}

fn new_job_id() -> String {
    let mut raw = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut raw);
    let digest = blake3::hash(&raw).to_hex();
    format!("tj_{}", &digest.as_str()[..12])
}

impl JobServer {
    /// Build the server and spawn its worker pool.
    pub fn start(cfg: OrchestratorConfig, runner: Arc<dyn SolveRunner>) -> Arc<JobServer> {
        let server = Arc::new(JobServer {
            cfg: cfg.clone(),
            runner,
            inner: Mutex::new(Inner {
                jobs: HashMap::new(),
                queue: VecDeque::new(),
                rate: HashMap::new(),
                recent: VecDeque::new(),
                shutdown: false,
            }),
            wake: Condvar::new(),
        });
        for w in 0..cfg.max_concurrent_solves {
            let s = Arc::clone(&server);
            std::thread::Builder::new()
                .name(format!("solve-worker-{w}"))
                .spawn(move || s.worker_loop())
                .expect("spawn solve worker thread");
        }
        server
    }

    /// Admit a request. Rate-limit rejections never consume a queue slot
    /// and only *accepted* submissions advance the client's window.
    pub fn submit(&self, mut req: SolveRequest, client: &str) -> Result<SubmitReceipt, SubmitError> {
        req.validate().map_err(SubmitError::BadRequest)?;
        if req.max_time_seconds > self.cfg.max_solve_time {
            req.max_time_seconds = self.cfg.max_solve_time;
        }
        let mut inner = self.inner.lock().expect("job state poisoned");
        self.evict_expired(&mut inner);
        if inner.shutdown {
            return Err(SubmitError::ShuttingDown);
        }
        if let Some(last) = inner.rate.get(client) {
            let elapsed = last.elapsed();
            if elapsed < self.cfg.rate_limit {
                let retry = (self.cfg.rate_limit - elapsed).as_secs_f64().ceil() as u64;
                return Err(SubmitError::RateLimited {
                    retry_after_seconds: retry.max(1),
                });
            }
        }
        if inner.queue.len() >= self.cfg.max_queue_size {
            return Err(SubmitError::QueueFull);
        }
        let id = new_job_id();
        inner.jobs.insert(
            id.clone(),
            Job {
                id: id.clone(),
                status: JobStatus::Queued,
                client: client.to_string(),
                request: req,
                queued_at: Utc::now(),
                started_at: None,
                completed_at: None,
                started_mono: None,
                completed_mono: None,
                best: None,
                result: None,
                error: None,
            },
        );
        inner.queue.push_back(id.clone());
        inner.rate.insert(client.to_string(), Instant::now());
        let queue_position = inner.queue.len() - 1;
        info!(job_id = %id, client, queue_position, "job admitted");
        self.wake.notify_one();
        Ok(SubmitReceipt {
            job_id: id,
            queue_position,
        })
    }

    /// Current state of one job, or `None` for unknown/expired ids.
    pub fn status(&self, id: &str) -> Option<JobView> {
        let mut inner = self.inner.lock().expect("job state poisoned");
        self.evict_expired(&mut inner);
        let queue_position = inner.queue.iter().position(|j| j == id);
        let job = inner.jobs.get(id)?;
        let elapsed = job.started_mono.map(|s| match job.completed_mono {
            Some(done) => done.duration_since(s).as_secs_f64(),
            None => s.elapsed().as_secs_f64(),
        });
        Some(JobView {
            job_id: job.id.clone(),
            status: job.status,
            queue_position: (job.status == JobStatus::Queued).then(|| queue_position.unwrap_or(0)),
            elapsed_seconds: elapsed,
            config: ConfigSummary::of(&job.request),
            best_so_far: if job.result.is_none() {
                job.best.clone()
            } else {
                None
            },
            result: job.result.clone(),
            error: job.error.clone(),
        })
    }

    /// Cooperatively terminate a job. Returns `None` for unknown ids,
    /// `Some(false)` when the job was already terminal.
    pub fn abort(&self, id: &str) -> Option<bool> {
        let mut inner = self.inner.lock().expect("job state poisoned");
        let status = inner.jobs.get(id)?.status;
        match status {
            JobStatus::Queued => {
                let record = {
                    let job = inner.jobs.get_mut(id)?;
                    job.status = JobStatus::Aborted;
                    job.completed_at = Some(Utc::now());
                    job.completed_mono = Some(Instant::now());
                    CompletionRecord {
                        job_id: job.id.clone(),
                        status: JobStatus::Aborted,
                        score: None,
                        wall_time_seconds: 0.0,
                        completed_at: Utc::now(),
                    }
                };
                inner.queue.retain(|j| j != id);
                push_recent(&mut inner.recent, record, self.cfg.recent_capacity);
                info!(job_id = %id, "queued job aborted");
                Some(true)
            }
            JobStatus::Solving => {
                // The worker notices on its next poll and terminates the
                // subprocess.
                if let Some(job) = inner.jobs.get_mut(id) {
                    job.status = JobStatus::Aborted;
                }
                info!(job_id = %id, "abort requested for running job");
                Some(true)
            }
            _ => Some(false),
        }
    }

    /// `(active, queued)` counts for `/health`.
    pub fn counts(&self) -> (usize, usize) {
        let inner = self.inner.lock().expect("job state poisoned");
        let active = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Solving)
            .count();
        (active, inner.queue.len())
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.cfg
    }

    /// Admin snapshot: queued and active jobs plus recent completions.
    pub fn admin_view(&self) -> AdminView {
        let inner = self.inner.lock().expect("job state poisoned");
        let queued = inner
            .queue
            .iter()
            .enumerate()
            .filter_map(|(pos, id)| {
                inner.jobs.get(id).map(|j| QueuedJobView {
                    job_id: j.id.clone(),
                    client: j.client.clone(),
                    queue_position: pos,
                    queued_at: j.queued_at,
                })
            })
            .collect();
        let active = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Solving)
            .map(|j| ActiveJobView {
                job_id: j.id.clone(),
                client: j.client.clone(),
                elapsed_seconds: j
                    .started_mono
                    .map(|s| s.elapsed().as_secs_f64())
                    .unwrap_or(0.0),
            })
            .collect();
        AdminView {
            queued,
            active,
            recent: inner.recent.iter().cloned().collect(),
        }
    }

    /// Stop accepting work and wake idle workers so they can exit. Running
    /// solves finish or get aborted by their owners; used by tests.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().expect("job state poisoned");
        inner.shutdown = true;
        self.wake.notify_all();
    }

    fn evict_expired(&self, inner: &mut Inner) {
        let ttl = self.cfg.result_ttl;
        inner.jobs.retain(|_, job| {
            let expired = job.status.is_terminal()
                && job
                    .completed_mono
                    .map(|done| done.elapsed() >= ttl)
                    .unwrap_or(false);
            !expired
        });
    }

    // ------------------------------------------------------------------
    // Worker side
    // ------------------------------------------------------------------

    fn worker_loop(&self) {
        loop {
            let mut inner = self.inner.lock().expect("job state poisoned");
            let job_id = loop {
                if inner.shutdown {
                    return;
                }
                self.evict_expired(&mut inner);
                if let Some(id) = inner.queue.pop_front() {
                    break id;
                }
                let (guard, _) = self
                    .wake
                    .wait_timeout(inner, Duration::from_millis(500))
                    .expect("job state poisoned");
                inner = guard;
            };
            let request = match inner.jobs.get_mut(&job_id) {
                Some(job) if job.status == JobStatus::Queued => {
                    job.status = JobStatus::Solving;
                    job.started_at = Some(Utc::now());
                    job.started_mono = Some(Instant::now());
                    job.request.clone()
                }
                _ => continue, // aborted while queued, or evicted
            };
            drop(inner);
            info!(job_id = %job_id, "solve started");
            self.run_job(&job_id, &request);
        }
    }

    fn run_job(&self, job_id: &str, request: &SolveRequest) {
        let mut running = match self.runner.spawn(request) {
            Ok(r) => r,
            Err(e) => {
                warn!(job_id, error = %e, "failed to launch solver");
                self.finalize(job_id, JobStatus::Error, None, Some(e.to_string()));
                return;
            }
        };
        loop {
            std::thread::sleep(self.cfg.poll_period);
            let latest = running.try_best();
            let aborted = {
                let mut inner = self.inner.lock().expect("job state poisoned");
                if let Some(job) = inner.jobs.get_mut(job_id) {
                    if let Some(best) = latest {
                        job.best = Some(best);
                    }
                    job.status == JobStatus::Aborted
                } else {
                    true // evicted underneath us: stop the subprocess
                }
            };
            if aborted {
                running.abort(self.cfg.abort_grace);
                let best = {
                    let inner = self.inner.lock().expect("job state poisoned");
                    inner.jobs.get(job_id).and_then(|j| j.best.clone())
                };
                let result = best.map(|b| aborted_result(request, &b));
                self.finalize(job_id, JobStatus::Aborted, result, None);
                info!(job_id, "solve aborted");
                return;
            }
            match running.try_final() {
                FinalState::Pending => continue,
                FinalState::Done(result) => {
                    self.finalize(job_id, JobStatus::Complete, Some(*result), None);
                    info!(job_id, "solve complete");
                    return;
                }
                FinalState::Crashed(msg) => {
                    warn!(job_id, error = %msg, "solver died");
                    self.finalize(job_id, JobStatus::Error, None, Some(msg));
                    return;
                }
            }
        }
    }

    fn finalize(
        &self,
        job_id: &str,
        status: JobStatus,
        result: Option<SolveResult>,
        error: Option<String>,
    ) {
        let mut inner = self.inner.lock().expect("job state poisoned");
        let Some(job) = inner.jobs.get_mut(job_id) else {
            return;
        };
        job.status = status;
        job.completed_at = Some(Utc::now());
        job.completed_mono = Some(Instant::now());
        job.result = result;
        job.error = error;
        let record = CompletionRecord {
            job_id: job.id.clone(),
            status,
            score: job.result.as_ref().filter(|r| r.success).map(|r| r.score),
            wall_time_seconds: job
                .started_mono
                .map(|s| s.elapsed().as_secs_f64())
                .unwrap_or(0.0),
            completed_at: Utc::now(),
        };
        let cap = self.cfg.recent_capacity;
        push_recent(&mut inner.recent, record, cap);
    }
}

fn push_recent(recent: &mut VecDeque<CompletionRecord>, record: CompletionRecord, cap: usize) {
    recent.push_back(record);
    while recent.len() > cap {
        recent.pop_front();
    }
}

/// The result stored for a job aborted mid-solve: the last observed
/// best-so-far, marked non-optimal.
fn aborted_result(request: &SolveRequest, best: &Solution) -> SolveResult {
    let cells = validate::cells_of(&best.rooms, &best.paths, request.architect_pos());
    let directional = if validate::directional_violation(&cells).is_some() {
        "violated"
    } else {
        "passed"
    };
    SolveResult {
        success: true,
        optimal: false,
        score: best.score,
        rooms: best.rooms.clone(),
        paths: best.paths.clone(),
        edges: best.edges.clone(),
        stats: SolveStats {
            status: "aborted".into(),
            solutions_reported: best.solution_count,
            directional_check: directional.into(),
            ..SolveStats::default()
        },
        chain_names: best.chain_names.clone(),
        excluded_rooms: None,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Pos;

    fn tiny_request() -> SolveRequest {
        let mut req = SolveRequest::new(Pos::new(4, 1));
        req.min_spymasters = 0;
        req.min_corruption_chambers = 0;
        req.max_time_seconds = 2.0;
        req
    }

    fn canned_solution(score: i64) -> Solution {
        Solution {
            score,
            rooms: vec![],
            paths: vec![],
            edges: vec![],
            chain_names: None,
            solution_count: 1,
        }
    }

    fn canned_result() -> SolveResult {
        SolveResult {
            success: true,
            optimal: true,
            score: 7,
            rooms: vec![],
            paths: vec![],
            edges: vec![],
            stats: SolveStats::default(),
            chain_names: None,
            excluded_rooms: None,
            error: None,
        }
    }

    /// Scripted runner: an optional best after a delay, an optional final
    /// after another delay, or neither (runs until aborted).
    struct StubRunner {
        best_after: Option<Duration>,
        final_after: Option<Duration>,
    }

    impl SolveRunner for StubRunner {
        fn spawn(&self, _req: &SolveRequest) -> anyhow::Result<Box<dyn RunningSolve>> {
            let abort = Arc::new(AtomicBool::new(false));
            let (best_tx, best_rx) = bounded::<Solution>(8);
            let (final_tx, final_rx) = unbounded::<Box<SolveResult>>();
            let best_after = self.best_after;
            let final_after = self.final_after;
            let flag = Arc::clone(&abort);
            std::thread::spawn(move || {
                if let Some(delay) = best_after {
                    std::thread::sleep(delay);
                    let _ = best_tx.try_send(canned_solution(3));
                }
                match final_after {
                    Some(delay) => {
                        std::thread::sleep(delay);
                        let _ = final_tx.send(Box::new(canned_result()));
                    }
                    None => {
                        while !flag.load(Ordering::Relaxed) {
                            std::thread::sleep(Duration::from_millis(10));
                        }
                    }
                }
            });
            Ok(Box::new(ThreadSolve {
                abort,
                best_rx,
                final_rx,
            }))
        }
    }

    fn fast_cfg(workers: usize) -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrent_solves: workers,
            max_queue_size: 4,
            rate_limit: Duration::from_secs(30),
            max_solve_time: 10.0,
            result_ttl: Duration::from_secs(60),
            poll_period: Duration::from_millis(10),
            abort_grace: Duration::from_millis(200),
            recent_capacity: 8,
        }
    }

    fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("timed out waiting for {what}");
    }

    #[test]
    fn rate_limit_rejects_back_to_back_submissions() {
        let server = JobServer::start(
            fast_cfg(1),
            Arc::new(StubRunner {
                best_after: None,
                final_after: Some(Duration::from_millis(20)),
            }),
        );
        let first = server.submit(tiny_request(), "1.2.3.4");
        assert!(first.is_ok());
        let second = server.submit(tiny_request(), "1.2.3.4");
        match second {
            Err(SubmitError::RateLimited {
                retry_after_seconds,
            }) => assert!(retry_after_seconds >= 1),
            other => panic!("expected rate limit, got {other:?}"),
        }
        // A different client is unaffected.
        assert!(server.submit(tiny_request(), "5.6.7.8").is_ok());
        server.shutdown();
    }

    #[test]
    fn queue_fills_and_positions_are_reported() {
        // No workers: admissions stay queued deterministically.
        let mut cfg = fast_cfg(0);
        cfg.max_queue_size = 2;
        let server = JobServer::start(
            cfg,
            Arc::new(StubRunner {
                best_after: None,
                final_after: None,
            }),
        );
        let a = server.submit(tiny_request(), "a").expect("first admitted");
        let b = server.submit(tiny_request(), "b").expect("second admitted");
        assert_eq!(a.queue_position, 0);
        assert_eq!(b.queue_position, 1);
        match server.submit(tiny_request(), "c") {
            Err(SubmitError::QueueFull) => {}
            other => panic!("expected queue full, got {other:?}"),
        }
        let view = server.status(&b.job_id).expect("known job");
        assert_eq!(view.status, JobStatus::Queued);
        assert_eq!(view.queue_position, Some(1));
        server.shutdown();
    }

    #[test]
    fn jobs_complete_and_store_results() {
        let server = JobServer::start(
            fast_cfg(1),
            Arc::new(StubRunner {
                best_after: Some(Duration::from_millis(20)),
                final_after: Some(Duration::from_millis(60)),
            }),
        );
        let receipt = server.submit(tiny_request(), "client").expect("admitted");
        wait_for("completion", || {
            server
                .status(&receipt.job_id)
                .map(|v| v.status == JobStatus::Complete)
                .unwrap_or(false)
        });
        let view = server.status(&receipt.job_id).expect("known job");
        let result = view.result.expect("result stored");
        assert!(result.success);
        assert_eq!(result.score, 7);
        assert!(view.best_so_far.is_none(), "best folds into the result");
        let admin = server.admin_view();
        assert_eq!(admin.recent.len(), 1);
        assert_eq!(admin.recent[0].status, JobStatus::Complete);
        server.shutdown();
    }

    #[test]
    fn aborting_a_running_job_terminates_it() {
        let server = JobServer::start(
            fast_cfg(1),
            Arc::new(StubRunner {
                best_after: Some(Duration::from_millis(10)),
                final_after: None, // runs until aborted
            }),
        );
        let receipt = server.submit(tiny_request(), "client").expect("admitted");
        wait_for("solving", || {
            server
                .status(&receipt.job_id)
                .map(|v| v.status == JobStatus::Solving)
                .unwrap_or(false)
        });
        assert_eq!(server.abort(&receipt.job_id), Some(true));
        wait_for("terminal state", || {
            server
                .status(&receipt.job_id)
                .map(|v| v.status == JobStatus::Aborted)
                .unwrap_or(false)
        });
        let view = server.status(&receipt.job_id).expect("known job");
        if let Some(result) = view.result {
            assert!(result.success);
            assert!(!result.optimal);
            assert_eq!(result.stats.status, "aborted");
        }
        // Aborting again is a no-op.
        assert_eq!(server.abort(&receipt.job_id), Some(false));
        assert_eq!(server.abort("tj_nonexistent"), None);
        server.shutdown();
    }

    #[test]
    fn aborting_a_queued_job_is_immediate() {
        let server = JobServer::start(
            fast_cfg(0),
            Arc::new(StubRunner {
                best_after: None,
                final_after: None,
            }),
        );
        let receipt = server.submit(tiny_request(), "client").expect("admitted");
        assert_eq!(server.abort(&receipt.job_id), Some(true));
        let view = server.status(&receipt.job_id).expect("known job");
        assert_eq!(view.status, JobStatus::Aborted);
        assert_eq!(view.queue_position, None);
        let (_, queued) = server.counts();
        assert_eq!(queued, 0);
        server.shutdown();
    }

    #[test]
    fn terminal_jobs_are_evicted_after_ttl() {
        let mut cfg = fast_cfg(0);
        cfg.result_ttl = Duration::from_millis(0);
        let server = JobServer::start(
            cfg,
            Arc::new(StubRunner {
                best_after: None,
                final_after: None,
            }),
        );
        let receipt = server.submit(tiny_request(), "client").expect("admitted");
        assert_eq!(server.abort(&receipt.job_id), Some(true));
        // The next lookup evicts the terminal record.
        assert!(server.status(&receipt.job_id).is_none());
        server.shutdown();
    }

    #[test]
    fn bad_requests_are_rejected_at_admission() {
        let server = JobServer::start(
            fast_cfg(0),
            Arc::new(StubRunner {
                best_after: None,
                final_after: None,
            }),
        );
        let mut req = tiny_request();
        req.max_time_seconds = -1.0;
        match server.submit(req, "client") {
            Err(SubmitError::BadRequest(_)) => {}
            other => panic!("expected bad request, got {other:?}"),
        }
        server.shutdown();
    }

    #[test]
    fn solve_time_is_clamped_to_server_cap() {
        let server = JobServer::start(
            fast_cfg(0),
            Arc::new(StubRunner {
                best_after: None,
                final_after: None,
            }),
        );
        let mut req = tiny_request();
        req.max_time_seconds = 9999.0;
        let receipt = server.submit(req, "client").expect("admitted");
        let view = server.status(&receipt.job_id).expect("known job");
        assert!(view.config.max_time_seconds <= 10.0);
        server.shutdown();
    }
}
