use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainEventKind {
    EnrollmentRequested,
    EnrollmentActivated,
    EnrollmentFailed,
}

impl DomainEventKind {
    /// Redis channel the gateway publishes this kind on.
    pub fn channel(self) -> &'static str {
        match self {
            DomainEventKind::EnrollmentRequested => "enrollments.requested",
            DomainEventKind::EnrollmentActivated => "enrollments.activated",
            DomainEventKind::EnrollmentFailed => "enrollments.failed",
        }
    }

    pub fn all_channels() -> [&'static str; 3] {
        [
            DomainEventKind::EnrollmentRequested.channel(),
            DomainEventKind::EnrollmentActivated.channel(),
            DomainEventKind::EnrollmentFailed.channel(),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub kind: DomainEventKind,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl DomainEvent {
    pub fn new(aggregate_id: Uuid, kind: DomainEventKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_id,
            kind,
            occurred_at: Utc::now(),
            payload,
        }
    }
}
