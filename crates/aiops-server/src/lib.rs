pub mod api;
pub mod audit;
pub mod error;
pub mod scheduler;
pub mod state;
pub mod webhook;
pub mod worker;
pub mod yaml;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use aiops_config::Settings;
use aiops_llm::LlmAnalyzer;
use aiops_orchestrator::ExecutorSet;
use aiops_persistence::Store;

pub use state::AppState;

/// Assembles `AppState` from its already-constructed parts. The
/// `ExecutionQueueReceiver` and `AuditSinkReceiver` are returned alongside
/// so [`serve`] can hand them to the worker pool and audit writer.
pub fn build_state(
    store: Store,
    settings: Settings,
    executors: ExecutorSet,
    analyzer: Arc<dyn LlmAnalyzer>,
) -> (AppState, state::ExecutionQueueReceiver, state::AuditSinkReceiver) {
    let (execution_queue, queue_receiver) = state::ExecutionQueue::new(1024);
    let (audit, audit_receiver) = state::AuditSink::new(settings.audit_backlog_capacity);

    let app_state = AppState {
        store,
        settings: Arc::new(settings),
        executors,
        analyzer,
        execution_queue,
        cancellations: state::CancellationRegistry::default(),
        audit,
        fingerprint_locks: state::FingerprintLocks::default(),
    };

    (app_state, queue_receiver, audit_receiver)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/webhook/alerts", post(webhook::ingest))
        .route("/api/alerts", get(api::alerts::list))
        .route("/api/alerts/{id}", get(api::alerts::get))
        .route("/api/alerts/{id}/analyze", post(api::alerts::analyze))
        .route("/api/rules", get(api::rules::list).post(api::rules::create))
        .route(
            "/api/rules/{id}",
            put(api::rules::update).delete(api::rules::delete),
        )
        .route(
            "/api/remediation/runbooks",
            get(api::runbooks::list).post(api::runbooks::create),
        )
        .route(
            "/api/remediation/runbooks/{id}",
            get(api::runbooks::get).put(api::runbooks::update).delete(api::runbooks::delete),
        )
        .route("/api/remediation/runbooks/{id}/export", get(api::runbooks::export_yaml))
        .route("/api/remediation/runbooks/import", post(api::runbooks::import_yaml))
        .route("/api/remediation/runbooks/{id}/execute", post(api::executions::execute))
        .route("/api/remediation/executions", get(api::executions::list))
        .route("/api/remediation/executions/{id}", get(api::executions::get))
        .route("/api/remediation/executions/{id}/approve", post(api::executions::approve))
        .route("/api/remediation/executions/{id}/cancel", post(api::executions::cancel))
        .route("/api/remediation/circuit-breaker/{runbook_id}", get(api::breakers::get))
        .route(
            "/api/remediation/circuit-breaker/{runbook_id}/override",
            post(api::breakers::override_state),
        )
        .route(
            "/api/schedules",
            get(api::schedules::list).post(api::schedules::create),
        )
        .route(
            "/api/schedules/{id}",
            get(api::schedules::get).put(api::schedules::update).delete(api::schedules::delete),
        )
        .route(
            "/api/servers",
            get(api::servers::list).post(api::servers::create),
        )
        .route(
            "/api/servers/{id}",
            get(api::servers::get).delete(api::servers::delete),
        )
        .layer(cors)
        .with_state(state)
}

/// Binds the listener, starts the worker pool, scheduler, and audit writer
/// as background tasks, and serves until `ctrl_c` (spec.md §4.9-§4.10).
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    queue_receiver: state::ExecutionQueueReceiver,
    audit_receiver: state::AuditSinkReceiver,
) -> anyhow::Result<()> {
    let worker_pool_size = state.settings.worker_pool_size;
    let scheduler_tick = Duration::from_secs(state.settings.scheduler_tick_seconds);

    let workers = worker::spawn_pool(state.clone(), queue_receiver, worker_pool_size);
    let scheduler_handle = tokio::spawn(scheduler::run(state.clone(), scheduler_tick));
    let audit_handle = tokio::spawn(audit::run(state.store.clone(), audit_receiver));

    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await;

    for worker in workers {
        worker.abort();
    }
    scheduler_handle.abort();
    audit_handle.abort();

    result?;
    Ok(())
}
