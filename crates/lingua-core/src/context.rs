use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::models::UnknownValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorRole {
    Student,
    Institution,
    Admin,
}

impl ActorRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ActorRole::Student => "STUDENT",
            ActorRole::Institution => "INSTITUTION",
            ActorRole::Admin => "ADMIN",
        }
    }

    pub fn parse(value: &str) -> Result<Self, UnknownValue> {
        Ok(match value {
            "STUDENT" => ActorRole::Student,
            "INSTITUTION" => ActorRole::Institution,
            "ADMIN" => ActorRole::Admin,
            _ => return Err(UnknownValue::new("actor role", value)),
        })
    }
}

impl std::fmt::Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the caller for one request, resolved by the upstream identity
/// provider and handed down explicitly instead of through any ambient
/// session state.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    pub actor: Uuid,
    pub role: ActorRole,
    pub trace_id: Uuid,
}

impl RequestContext {
    pub fn new(actor: Uuid, role: ActorRole) -> Self {
        Self {
            actor,
            role,
            trace_id: Uuid::new_v4(),
        }
    }

    pub fn with_trace_id(mut self, trace_id: Uuid) -> Self {
        self.trace_id = trace_id;
        self
    }

    pub fn require_role(&self, role: ActorRole) -> Result<(), DomainError> {
        if self.role == role {
            Ok(())
        } else {
            Err(DomainError::RoleRequired(role))
        }
    }
}
