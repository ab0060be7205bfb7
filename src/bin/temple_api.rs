//! temple-api: the HTTP/JSON façade over the job orchestration layer.
//!
//! Endpoints:
//! - GET  /health      liveness; active/queued counts
//! - GET  /status      server capacity and policy constants
//! - POST /solve       admit a job -> { job_id, queue_position }
//! - GET  /job/:id     status / best-so-far / final result / error
//! - POST /abort/:id   cooperatively terminate a job
//! - GET  /admin       gated by X-Admin-Token; queued/active/recent jobs
//!
//! Status codes: 200 success (including application-level success=false),
//! 400 malformed body, 401 admin misauth, 404 unknown job, 429 rate
//! limited with retry_after seconds, 503 queue full.
//!
//! Configuration (environment): MAX_CONCURRENT_SOLVES, MAX_QUEUE_SIZE,
//! RATE_LIMIT_SECONDS, MAX_SOLVE_TIME, RESULT_TTL_SECONDS,
//! ALLOWED_ORIGINS, ADMIN_PASSWORD, TEMPLE_ADDR, TEMPLE_WORKER_BIN.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use temple_solver::jobs::{
    JobServer, OrchestratorConfig, SolveRunner, SubmitError, SubprocessRunner, ThreadRunner,
};
use temple_solver::SolveRequest;

#[derive(Clone)]
struct AppState {
    jobs: Arc<JobServer>,
    admin_token: String,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    active: usize,
    queued: usize,
}

#[derive(Serialize)]
struct ServerStatus {
    max_concurrent_solves: usize,
    max_queue_size: usize,
    rate_limit_seconds: u64,
    max_solve_time: f64,
    result_ttl_seconds: u64,
    active: usize,
    queued: usize,
}

fn client_id(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| addr.ip().to_string())
}

async fn health(State(st): State<AppState>) -> impl IntoResponse {
    let (active, queued) = st.jobs.counts();
    Json(Health {
        status: "ok",
        active,
        queued,
    })
}

async fn server_status(State(st): State<AppState>) -> impl IntoResponse {
    let cfg = st.jobs.config();
    let (active, queued) = st.jobs.counts();
    Json(ServerStatus {
        max_concurrent_solves: cfg.max_concurrent_solves,
        max_queue_size: cfg.max_queue_size,
        rate_limit_seconds: cfg.rate_limit.as_secs(),
        max_solve_time: cfg.max_solve_time,
        result_ttl_seconds: cfg.result_ttl.as_secs(),
        active,
        queued,
    })
}

async fn solve(
    State(st): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let request: SolveRequest = serde_json::from_slice(&body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": format!("invalid request body: {e}") })),
        )
    })?;
    let client = client_id(&headers, addr);
    match st.jobs.submit(request, &client) {
        Ok(receipt) => Ok(Json(receipt)),
        Err(SubmitError::RateLimited {
            retry_after_seconds,
        }) => Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "success": false,
                "error": "rate limited",
                "retry_after": retry_after_seconds,
            })),
        )),
        Err(SubmitError::QueueFull) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "success": false, "error": "solve queue is full" })),
        )),
        Err(e @ SubmitError::BadRequest(_)) => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": e.to_string() })),
        )),
        Err(e @ SubmitError::ShuttingDown) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "success": false, "error": e.to_string() })),
        )),
    }
}

async fn job_status(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    match st.jobs.status(&id) {
        Some(view) => Ok(Json(view)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unknown job" })),
        )),
    }
}

async fn abort_job(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    match st.jobs.abort(&id) {
        Some(flipped) => Ok(Json(json!({ "job_id": id, "aborted": flipped }))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unknown job" })),
        )),
    }
}

async fn admin(
    State(st): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let token = headers.get("x-admin-token").and_then(|v| v.to_str().ok());
    if token != Some(st.admin_token.as_str()) {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "bad admin token" })),
        ));
    }
    Ok(Json(st.jobs.admin_view()))
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn pick_runner() -> Arc<dyn SolveRunner> {
    let program = std::env::var("TEMPLE_WORKER_BIN")
        .map(std::path::PathBuf::from)
        .or_else(|_| SubprocessRunner::sibling_worker());
    match program {
        Ok(path) if path.exists() => {
            info!("solver subprocess: {}", path.display());
            Arc::new(SubprocessRunner::new(path))
        }
        other => {
            if let Ok(path) = other {
                warn!(
                    "worker binary {} not found; falling back to in-process solves \
                     (abort is cooperative only)",
                    path.display()
                );
            }
            Arc::new(ThreadRunner {
                workers: std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1),
            })
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "temple_api=info,tower_http=info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    info!("starting temple solver API");

    let addr: SocketAddr = std::env::var("TEMPLE_ADDR")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 5000)));

    let cfg = OrchestratorConfig {
        max_concurrent_solves: env_parse("MAX_CONCURRENT_SOLVES", 1usize).max(1),
        max_queue_size: env_parse("MAX_QUEUE_SIZE", 8usize),
        rate_limit: Duration::from_secs(env_parse("RATE_LIMIT_SECONDS", 5u64)),
        max_solve_time: env_parse("MAX_SOLVE_TIME", 120.0f64),
        result_ttl: Duration::from_secs(env_parse("RESULT_TTL_SECONDS", 300u64)),
        ..OrchestratorConfig::default()
    };
    let admin_token =
        std::env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "changeme-admin".into());

    let jobs = JobServer::start(cfg, pick_runner());

    let allowed_origins =
        std::env::var("ALLOWED_ORIGINS").unwrap_or_else(|_| "http://localhost:3000".into());
    let cors = if allowed_origins == "*" {
        warn!("CORS set to permissive mode (*); not for production");
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = allowed_origins
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        info!("CORS configured for origins: {origins:?}");
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderName::from_static("x-admin-token"),
            ])
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/status", get(server_status))
        .route("/solve", post(solve))
        .route("/job/:id", get(job_status))
        .route("/abort/:id", post(abort_job))
        .route("/admin", get(admin))
        .with_state(AppState {
            jobs,
            admin_token,
        })
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    info!("temple solver API listening on http://{addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
