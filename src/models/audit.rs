//! Audit trail entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::enums::{ActorRole, AuditAction, EntityKind};

/// Caller on whose behalf an operation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Actor {
    pub id: Uuid,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: Uuid, role: ActorRole) -> Self {
        Self { id, role }
    }

    pub fn admin(id: Uuid) -> Self {
        Self::new(id, ActorRole::Admin)
    }

    /// Identity used by scheduled maintenance
    pub fn system() -> Self {
        Self::new(Uuid::nil(), ActorRole::System)
    }
}

/// One mutating action, recorded after commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuditEntry {
    pub actor_id: Uuid,
    pub actor_role: ActorRole,
    pub action: AuditAction,
    pub entity_kind: EntityKind,
    pub entity_ref: String,
    pub details: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        recorded_at: DateTime<Utc>,
        actor: Actor,
        action: AuditAction,
        entity_kind: EntityKind,
        entity_ref: impl ToString,
        details: serde_json::Value,
    ) -> Self {
        Self {
            actor_id: actor.id,
            actor_role: actor.role,
            action,
            entity_kind,
            entity_ref: entity_ref.to_string(),
            details,
            recorded_at,
        }
    }
}

/// Query parameters for the audit trail
#[derive(Debug, Clone, Default, Deserialize, IntoParams, ToSchema)]
pub struct AuditQuery {
    pub action: Option<AuditAction>,
    pub actor_role: Option<ActorRole>,
    pub entity_ref: Option<String>,
    /// Recorded at or after
    pub start_date: Option<DateTime<Utc>>,
    /// Recorded at or before
    pub end_date: Option<DateTime<Utc>>,
    /// Page number (1-based)
    pub page: Option<i64>,
    /// Items per page
    pub per_page: Option<i64>,
}

impl AuditQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> i64 {
        self.per_page.unwrap_or(10).clamp(1, 200)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.per_page()
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.action.map_or(true, |a| entry.action == a)
            && self.actor_role.map_or(true, |r| entry.actor_role == r)
            && self.entity_ref.as_ref().map_or(true, |r| &entry.entity_ref == r)
            && self.start_date.map_or(true, |d| entry.recorded_at >= d)
            && self.end_date.map_or(true, |d| entry.recorded_at <= d)
    }
}
