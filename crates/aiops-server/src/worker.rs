use std::sync::Arc;

use tokio::sync::Mutex;

use aiops_orchestrator::run_execution;

use crate::state::{AppState, ExecutionQueueReceiver};

/// Spawns `pool_size` workers sharing one execution queue (spec.md §4.9).
/// `mpsc::Receiver` has a single owner, so the workers take turns behind a
/// mutex rather than each holding their own receiver.
pub fn spawn_pool(state: AppState, queue: ExecutionQueueReceiver, pool_size: usize) -> Vec<tokio::task::JoinHandle<()>> {
    let receiver = Arc::new(Mutex::new(queue.receiver));
    (0..pool_size.max(1))
        .map(|worker_index| {
            let state = state.clone();
            let receiver = receiver.clone();
            tokio::spawn(run_worker(state, receiver, worker_index))
        })
        .collect()
}

async fn run_worker(state: AppState, receiver: Arc<Mutex<tokio::sync::mpsc::Receiver<String>>>, worker_index: usize) {
    loop {
        let execution_id = {
            let mut guard = receiver.lock().await;
            guard.recv().await
        };
        let Some(execution_id) = execution_id else {
            break;
        };

        let cancel = state.cancellations.register(&execution_id).await;
        tracing::info!(worker = worker_index, execution_id = %execution_id, "claimed execution");

        if let Err(err) = run_execution(&state.store, &state.executors, &execution_id, &cancel).await {
            tracing::error!(worker = worker_index, execution_id = %execution_id, error = %err, "execution run failed");
        }

        state.cancellations.forget(&execution_id).await;
    }
}
