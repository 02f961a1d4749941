use aiops_persistence::Store;

use crate::state::AuditSinkReceiver;

/// Drains [`crate::state::AuditSink`], writing each event with
/// `Store::append_audit_event` so handlers never block on disk I/O
/// (spec.md §4.10).
pub async fn run(store: Store, mut receiver: AuditSinkReceiver) {
    while let Some(event) = receiver.receiver.recv().await {
        if let Err(err) = store.append_audit_event(&event).await {
            tracing::error!(error = %err, action = %event.action, "failed to persist audit event");
        }
    }
}
