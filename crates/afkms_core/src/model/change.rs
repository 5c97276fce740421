//! Change-log records: change sets, their actions and commits.
//!
//! # Invariants
//! - `ChangeSet.summary`/`diff` are computed once at proposal time.
//! - `ChangeAction.apply_result` is written once, at commit, and never changed.
//! - A change set has at most one `Commit`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tool name recorded on change sets produced by undo.
pub const UNDO_TOOL: &str = "undo";

string_enum! {
    pub enum ActorKind {
        Agent => "agent",
        User => "user",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRef {
    #[serde(rename = "type")]
    pub kind: ActorKind,
    pub id: String,
}

impl ActorRef {
    pub fn new(kind: ActorKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

string_enum! {
    /// `proposed -> committed -> reverted`; `proposed` may also be deleted by reject.
    pub enum ChangeStatus {
        Proposed => "proposed",
        Committed => "committed",
        Reverted => "reverted",
    }
}

/// One rendered row of a change set preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffItem {
    pub entity: String,
    pub action: String,
    pub fields: Vec<String>,
    pub text: String,
}

/// Machine-readable summary. Counters for proposals, ids for undo sets.
pub type Summary = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub id: String,
    pub actor: ActorRef,
    pub tool: String,
    pub status: ChangeStatus,
    pub summary: Summary,
    pub diff: Vec<DiffItem>,
    pub created_at: i64,
    pub committed_at: Option<i64>,
}

impl ChangeSet {
    pub fn is_undo(&self) -> bool {
        self.tool == UNDO_TOOL
    }
}

/// Stored action row.
///
/// `action_type` stays a raw tag so rows written by other versions still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeAction {
    pub id: String,
    pub change_set_id: String,
    pub action_index: u32,
    pub action_type: String,
    pub payload: Map<String, Value>,
    pub apply_result: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: String,
    pub change_set_id: String,
    pub committed_by: ActorRef,
    pub committed_at: i64,
    pub client_request_id: Option<String>,
}
