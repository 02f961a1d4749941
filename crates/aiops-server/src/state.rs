use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use aiops_config::Settings;
use aiops_llm::LlmAnalyzer;
use aiops_orchestrator::ExecutorSet;
use aiops_persistence::models::AuditEvent;
use aiops_persistence::Store;

/// Everything a handler or background task needs, cloned cheaply per
/// request the way the teacher's `AppState` is (every field behind an
/// `Arc` or already `Clone`).
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub settings: Arc<Settings>,
    pub executors: ExecutorSet,
    pub analyzer: Arc<dyn LlmAnalyzer>,
    pub execution_queue: ExecutionQueue,
    pub cancellations: CancellationRegistry,
    pub audit: AuditSink,
    pub fingerprint_locks: FingerprintLocks,
}

/// The bounded queue new/claimed executions are pushed onto; the worker
/// pool (spec.md §4.9) drains it. Producers block on a full queue rather
/// than drop work, matching §5's backpressure rule.
#[derive(Clone)]
pub struct ExecutionQueue {
    sender: mpsc::Sender<String>,
}

pub struct ExecutionQueueReceiver {
    pub receiver: mpsc::Receiver<String>,
}

impl ExecutionQueue {
    pub fn new(capacity: usize) -> (Self, ExecutionQueueReceiver) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, ExecutionQueueReceiver { receiver })
    }

    pub async fn push(&self, execution_id: String) {
        if self.sender.send(execution_id).await.is_err() {
            tracing::error!("execution queue receiver dropped; worker pool is not running");
        }
    }
}

/// One cancellation token per in-flight execution, so an operator's
/// `cancel` call can be located and tripped (spec.md §4.9).
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl CancellationRegistry {
    pub async fn register(&self, execution_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.write().await.insert(execution_id.to_string(), token.clone());
        token
    }

    pub async fn cancel(&self, execution_id: &str) -> bool {
        if let Some(token) = self.tokens.read().await.get(execution_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub async fn forget(&self, execution_id: &str) {
        self.tokens.write().await.remove(execution_id);
    }
}

/// Best-effort non-blocking audit writes (spec.md §4.10): an enqueue to a
/// dedicated worker; once the backlog fills, callers block rather than
/// drop the event.
#[derive(Clone)]
pub struct AuditSink {
    sender: mpsc::Sender<AuditEvent>,
}

pub struct AuditSinkReceiver {
    pub receiver: mpsc::Receiver<AuditEvent>,
}

impl AuditSink {
    pub fn new(capacity: usize) -> (Self, AuditSinkReceiver) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, AuditSinkReceiver { receiver })
    }

    pub async fn record(&self, event: AuditEvent) {
        if self.sender.send(event).await.is_err() {
            tracing::error!("audit sink receiver dropped; audit worker is not running");
        }
    }
}

/// Serializes alert ingestion per fingerprint (spec.md §4.8 step 3) so two
/// concurrent webhook deliveries for the same fingerprint can't race the
/// occurrence counter or double-fire a trigger.
#[derive(Clone, Default)]
pub struct FingerprintLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl FingerprintLocks {
    pub async fn acquire(&self, fingerprint: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(fingerprint.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}
