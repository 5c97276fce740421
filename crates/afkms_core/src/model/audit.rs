//! Append-only audit trail entries.

use super::change::ActorRef;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub occurred_at: i64,
    pub actor: ActorRef,
    pub tool: String,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub source_refs: Vec<String>,
    pub metadata: Map<String, Value>,
}

/// Audit event before it is assigned an id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEvent {
    pub actor: ActorRef,
    pub tool: String,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub source_refs: Vec<String>,
    pub metadata: Map<String, Value>,
}
