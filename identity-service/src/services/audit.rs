//! Audit trail for authentication and administration events.
//!
//! Emission is fire-and-forget: a failing sink is logged and never fails the
//! operation that produced the event.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::models::AuditEvent;

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<(), anyhow::Error>;
}

/// Hand an event to the sink on a background task.
pub fn emit(sink: &Arc<dyn AuditSink>, event: AuditEvent) {
    let sink = sink.clone();
    tokio::spawn(async move {
        let action = event.action.as_str();
        if let Err(e) = sink.record(event).await {
            tracing::warn!(error = %e, action, "Failed to record audit event");
        }
    });
}

/// Writes each event as a structured `tracing` record under the `audit` target.
#[derive(Clone, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), anyhow::Error> {
        tracing::info!(
            target: "audit",
            event_id = %event.event_id,
            action = event.action.as_str(),
            success = event.success,
            tenant_id = ?event.tenant_id,
            actor_user_id = ?event.actor_user_id,
            details = %event.details,
            "audit event"
        );
        Ok(())
    }
}

#[derive(Default)]
pub struct MockAuditSink {
    pub events: Mutex<Vec<AuditEvent>>,
}

impl MockAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for MockAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), anyhow::Error> {
        self.events
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock audit mutex poisoned: {}", e))?
            .push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuditAction;

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn record(&self, _event: AuditEvent) -> Result<(), anyhow::Error> {
            Err(anyhow::anyhow!("collector down"))
        }
    }

    #[tokio::test]
    async fn emit_delivers_to_sink() {
        let mock = Arc::new(MockAuditSink::new());
        let sink: Arc<dyn AuditSink> = mock.clone();

        emit(&sink, AuditEvent::new(AuditAction::LoginSucceeded, true));
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let events = mock.recorded();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::LoginSucceeded);
    }

    #[tokio::test]
    async fn failing_sink_is_swallowed() {
        let sink: Arc<dyn AuditSink> = Arc::new(FailingSink);
        emit(&sink, AuditEvent::new(AuditAction::LoginFailed, false));
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
