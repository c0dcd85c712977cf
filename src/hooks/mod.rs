use crate::events::{AuditEvent, EventId};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

pub trait AuditObserver: Send + Sync {
    fn on_scope_created(&self, _event: &AuditEvent) {}

    fn on_event_saving(&self, _event: &mut AuditEvent) {}

    fn on_event_saved(&self, _id: &EventId, _event: &AuditEvent) {}
}

impl<F> AuditObserver for F
where
    F: Fn(&EventId, &AuditEvent) + Send + Sync,
{
    fn on_event_saved(&self, id: &EventId, event: &AuditEvent) {
        self(id, event)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionEventData {
    pub connection_id: Uuid,
    pub database: String,
    pub opened_at: DateTime<Utc>,
}

pub trait ConnectionInterceptor: Send + Sync {
    // an error aborts the operation before the connection opens
    fn connection_opening(&self, data: &ConnectionEventData) -> anyhow::Result<()>;

    fn connection_opened(&self, _data: &ConnectionEventData) {}

    fn connection_closed(&self, _data: &ConnectionEventData) {}
}

#[derive(Debug, Default)]
pub struct CountingInterceptor {
    opening: AtomicUsize,
    closed: AtomicUsize,
}

impl CountingInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> usize {
        self.opening.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ConnectionInterceptor for CountingInterceptor {
    fn connection_opening(&self, _data: &ConnectionEventData) -> anyhow::Result<()> {
        self.opening.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn connection_closed(&self, _data: &ConnectionEventData) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
