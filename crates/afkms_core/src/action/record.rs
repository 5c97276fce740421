//! Apply results: the per-action record that drives undo.
//!
//! Stored as one JSON object per action:
//! `{"status": "applied", "entity": .., "entity_id": .., "action_type": .., ..}`
//! where the remaining keys depend on `action_type`.

use super::{ActionError, ActionType};
use crate::model::idea::IdeaPatch;
use crate::model::note::{KnowledgePatch, Link, Note, NotePatch, NoteSource, NoteStatus};
use crate::model::route::{NodeLog, RouteEdge, RouteEdgePatch, RouteNode, RouteNodePatch, RoutePatch};
use crate::model::string_enum;
use crate::model::task::{TaskPatch, TaskStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

string_enum! {
    pub enum ApplyStatus {
        Applied => "applied",
    }
}

/// Task status flip caused by activating a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskActivation {
    pub task_id: String,
    pub task_before_status: TaskStatus,
    pub task_after_status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum ApplyRecord {
    CreateTask {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_entry_id: Option<String>,
    },
    UpdateTask {
        before: TaskPatch,
        after: TaskPatch,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_entry_id: Option<String>,
    },
    AppendNote,
    PatchNote {
        before: NotePatch,
        after: NotePatch,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_entry_id: Option<String>,
    },
    UpsertJournalAppend {
        journal_date: String,
        created: bool,
        before_raw_content: Option<String>,
        after_raw_content: String,
        #[serde(default)]
        before_source: Option<String>,
        source: String,
    },
    LinkEntities,
    CreateLink,
    DeleteLink {
        before: Link,
    },
    CreateIdea,
    PatchIdea {
        before: IdeaPatch,
        after: IdeaPatch,
    },
    PromoteIdea {
        idea_id: String,
        route_id: String,
    },
    CreateRoute {
        #[serde(flatten)]
        activation: Option<TaskActivation>,
    },
    PatchRoute {
        before: RoutePatch,
        after: RoutePatch,
        #[serde(flatten)]
        activation: Option<TaskActivation>,
    },
    CreateRouteNode {
        route_id: String,
    },
    PatchRouteNode {
        before: RouteNodePatch,
        after: RouteNodePatch,
    },
    DeleteRouteNode {
        before: RouteNode,
        #[serde(default)]
        incoming_edges: Vec<RouteEdge>,
        #[serde(default)]
        node_logs: Vec<NodeLog>,
        #[serde(default)]
        child_node_ids: Vec<String>,
    },
    CreateRouteEdge {
        route_id: String,
    },
    PatchRouteEdge {
        before: RouteEdgePatch,
        after: RouteEdgePatch,
    },
    DeleteRouteEdge {
        before: RouteEdge,
    },
    AppendRouteNodeLog {
        node_id: String,
    },
    CreateKnowledge,
    PatchKnowledge {
        before: KnowledgePatch,
        after: KnowledgePatch,
    },
    ArchiveKnowledge {
        before_status: NoteStatus,
        after_status: NoteStatus,
        changed: bool,
    },
    DeleteKnowledge {
        before_note: Note,
        #[serde(default)]
        before_sources: Vec<NoteSource>,
        #[serde(default)]
        before_links: Vec<Link>,
    },
    CaptureInbox {
        source: String,
    },
}

impl ApplyRecord {
    pub fn action_type(&self) -> ActionType {
        match self {
            Self::CreateTask { .. } => ActionType::CreateTask,
            Self::UpdateTask { .. } => ActionType::UpdateTask,
            Self::AppendNote => ActionType::AppendNote,
            Self::PatchNote { .. } => ActionType::PatchNote,
            Self::UpsertJournalAppend { .. } => ActionType::UpsertJournalAppend,
            Self::LinkEntities => ActionType::LinkEntities,
            Self::CreateLink => ActionType::CreateLink,
            Self::DeleteLink { .. } => ActionType::DeleteLink,
            Self::CreateIdea => ActionType::CreateIdea,
            Self::PatchIdea { .. } => ActionType::PatchIdea,
            Self::PromoteIdea { .. } => ActionType::PromoteIdea,
            Self::CreateRoute { .. } => ActionType::CreateRoute,
            Self::PatchRoute { .. } => ActionType::PatchRoute,
            Self::CreateRouteNode { .. } => ActionType::CreateRouteNode,
            Self::PatchRouteNode { .. } => ActionType::PatchRouteNode,
            Self::DeleteRouteNode { .. } => ActionType::DeleteRouteNode,
            Self::CreateRouteEdge { .. } => ActionType::CreateRouteEdge,
            Self::PatchRouteEdge { .. } => ActionType::PatchRouteEdge,
            Self::DeleteRouteEdge { .. } => ActionType::DeleteRouteEdge,
            Self::AppendRouteNodeLog { .. } => ActionType::AppendRouteNodeLog,
            Self::CreateKnowledge => ActionType::CreateKnowledge,
            Self::PatchKnowledge { .. } => ActionType::PatchKnowledge,
            Self::ArchiveKnowledge { .. } => ActionType::ArchiveKnowledge,
            Self::DeleteKnowledge { .. } => ActionType::DeleteKnowledge,
            Self::CaptureInbox { .. } => ActionType::CaptureInbox,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub status: ApplyStatus,
    pub entity: String,
    pub entity_id: String,
    #[serde(flatten)]
    pub record: ApplyRecord,
}

impl ApplyResult {
    pub fn new(entity_id: impl Into<String>, record: ApplyRecord) -> Self {
        Self {
            status: ApplyStatus::Applied,
            entity: record.action_type().entity().to_string(),
            entity_id: entity_id.into(),
            record,
        }
    }

    pub fn action_type(&self) -> ActionType {
        self.record.action_type()
    }

    pub fn to_value(&self) -> Result<Value, ActionError> {
        serde_json::to_value(self)
            .map_err(|err| ActionError::Corrupt(format!("apply result not encodable: {err}")))
    }

    /// Decodes a stored apply result.
    ///
    /// An unknown `action_type` is [`ActionError::Unsupported`]; any other
    /// decoding failure (missing snapshot, wrong shape) is [`ActionError::Corrupt`].
    pub fn from_value(value: &Value) -> Result<Self, ActionError> {
        let tag = value
            .get("action_type")
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::Corrupt("missing action_type".to_string()))?;
        if ActionType::parse(tag).is_none() {
            return Err(ActionError::Unsupported(tag.to_string()));
        }
        let result: Self = serde_json::from_value(value.clone())
            .map_err(|err| ActionError::Corrupt(err.to_string()))?;
        if result.entity_id.trim().is_empty() {
            return Err(ActionError::Corrupt("missing entity_id".to_string()));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::TaskPriority;
    use serde_json::json;

    #[test]
    fn update_record_flattens_into_stored_shape() {
        let result = ApplyResult::new(
            "tsk_1",
            ApplyRecord::UpdateTask {
                before: TaskPatch {
                    priority: Some(Some(TaskPriority::P3)),
                    ..TaskPatch::default()
                },
                after: TaskPatch {
                    priority: Some(Some(TaskPriority::P1)),
                    ..TaskPatch::default()
                },
                source_entry_id: None,
            },
        );
        let value = result.to_value().unwrap();
        assert_eq!(
            value,
            json!({
                "status": "applied",
                "entity": "task",
                "entity_id": "tsk_1",
                "action_type": "update_task",
                "before": {"priority": "P3"},
                "after": {"priority": "P1"}
            })
        );
        assert_eq!(ApplyResult::from_value(&value).unwrap(), result);
    }

    #[test]
    fn route_activation_is_optional() {
        let plain = ApplyResult::new("rte_1", ApplyRecord::CreateRoute { activation: None });
        let value = plain.to_value().unwrap();
        assert!(value.get("task_id").is_none());
        assert_eq!(ApplyResult::from_value(&value).unwrap(), plain);

        let activated = ApplyResult::new(
            "rte_1",
            ApplyRecord::CreateRoute {
                activation: Some(TaskActivation {
                    task_id: "tsk_1".to_string(),
                    task_before_status: TaskStatus::Todo,
                    task_after_status: TaskStatus::InProgress,
                }),
            },
        );
        let value = activated.to_value().unwrap();
        assert_eq!(value["task_before_status"], json!("todo"));
        assert_eq!(ApplyResult::from_value(&value).unwrap(), activated);
    }

    #[test]
    fn missing_before_is_corrupt() {
        let value = json!({
            "status": "applied",
            "entity": "task",
            "entity_id": "tsk_1",
            "action_type": "update_task",
            "after": {"priority": "P1"}
        });
        assert!(matches!(
            ApplyResult::from_value(&value),
            Err(ActionError::Corrupt(_))
        ));
    }

    #[test]
    fn unknown_tag_is_unsupported() {
        let value = json!({
            "status": "applied",
            "entity": "widget",
            "entity_id": "w_1",
            "action_type": "explode_widget"
        });
        assert!(matches!(
            ApplyResult::from_value(&value),
            Err(ActionError::Unsupported(tag)) if tag == "explode_widget"
        ));
    }
}
