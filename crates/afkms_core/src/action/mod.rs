//! Action registry: typed actions and their validate/apply/rollback handlers.
//!
//! # Responsibility
//! - Turn a stored `(action_type, payload)` pair into a typed [`Action`].
//! - Dispatch validate/apply/rollback through one exhaustive match.
//!
//! # Invariants
//! - `Action::parse` performs every check that needs no stored state;
//!   `validate` and `apply` add the referential checks.
//! - `apply` returns an [`ApplyResult`] that alone is enough to reverse it.
//! - `rollback` never re-derives state from current rows beyond existence
//!   checks, and fails with [`ActionError::Corrupt`] on a malformed record.

mod idea;
mod inbox;
mod journal;
mod note;
pub mod record;
mod registry;
mod route;
mod task;

pub use record::{ApplyRecord, ApplyResult};
pub use registry::{apply, rollback, validate};

use crate::model::idea::{IdeaPatch, IdeaPromotion, NewIdea};
use crate::model::inbox::NewInboxItem;
use crate::model::journal::JournalAppend;
use crate::model::note::{KnowledgePatch, NewKnowledge, NewLink, NewNote, NotePatch};
use crate::model::route::{
    NewNodeLog, NewRoute, NewRouteEdge, NewRouteNode, RouteEdgePatch, RouteNodePatch, RoutePatch,
};
use crate::model::string_enum;
use crate::model::task::{NewTask, TaskPatch};
use crate::model::{is_blank, ValidationError};
use crate::repo::RepoError;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

string_enum! {
    /// Closed vocabulary of change actions.
    pub enum ActionType {
        CreateTask => "create_task",
        UpdateTask => "update_task",
        AppendNote => "append_note",
        PatchNote => "patch_note",
        UpsertJournalAppend => "upsert_journal_append",
        LinkEntities => "link_entities",
        CreateLink => "create_link",
        DeleteLink => "delete_link",
        CreateIdea => "create_idea",
        PatchIdea => "patch_idea",
        PromoteIdea => "promote_idea",
        CreateRoute => "create_route",
        PatchRoute => "patch_route",
        CreateRouteNode => "create_route_node",
        PatchRouteNode => "patch_route_node",
        DeleteRouteNode => "delete_route_node",
        CreateRouteEdge => "create_route_edge",
        PatchRouteEdge => "patch_route_edge",
        DeleteRouteEdge => "delete_route_edge",
        AppendRouteNodeLog => "append_route_node_log",
        CreateKnowledge => "create_knowledge",
        PatchKnowledge => "patch_knowledge",
        ArchiveKnowledge => "archive_knowledge",
        DeleteKnowledge => "delete_knowledge",
        CaptureInbox => "capture_inbox",
    }
}

/// Whether an action counts towards a summary's `creates` or `updates`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionClass {
    Create,
    Update,
    Other,
}

impl ActionType {
    /// `(entity, diff verb, summary key)`.
    fn descriptor(self) -> (&'static str, &'static str, &'static str) {
        use ActionType::*;
        match self {
            CreateTask => ("task", "create", "task_create"),
            UpdateTask => ("task", "update", "task_update"),
            AppendNote => ("note", "append", "note_append"),
            PatchNote => ("note", "update", "note_patch"),
            UpsertJournalAppend => ("journal", "upsert", "journal_upsert"),
            LinkEntities => ("link", "link", "link_create"),
            CreateLink => ("link", "create", "link_create"),
            DeleteLink => ("link", "delete", "link_delete"),
            CreateIdea => ("idea", "create", "idea_create"),
            PatchIdea => ("idea", "update", "idea_patch"),
            PromoteIdea => ("route_node", "create", "idea_promote"),
            CreateRoute => ("route", "create", "route_create"),
            PatchRoute => ("route", "update", "route_patch"),
            CreateRouteNode => ("route_node", "create", "route_node_create"),
            PatchRouteNode => ("route_node", "update", "route_node_patch"),
            DeleteRouteNode => ("route_node", "delete", "route_node_delete"),
            CreateRouteEdge => ("route_edge", "create", "route_edge_create"),
            PatchRouteEdge => ("route_edge", "update", "route_edge_patch"),
            DeleteRouteEdge => ("route_edge", "delete", "route_edge_delete"),
            AppendRouteNodeLog => ("node_log", "append", "route_node_log_append"),
            CreateKnowledge => ("knowledge", "create", "knowledge_create"),
            PatchKnowledge => ("knowledge", "update", "knowledge_patch"),
            ArchiveKnowledge => ("knowledge", "archive", "knowledge_archive"),
            DeleteKnowledge => ("knowledge", "delete", "knowledge_delete"),
            CaptureInbox => ("inbox", "create", "inbox_capture"),
        }
    }

    /// Entity kind touched, also the audit target type.
    pub fn entity(self) -> &'static str {
        self.descriptor().0
    }

    pub fn verb(self) -> &'static str {
        self.descriptor().1
    }

    pub fn summary_key(self) -> &'static str {
        self.descriptor().2
    }

    pub fn class(self) -> ActionClass {
        use ActionType::*;
        match self {
            CreateTask | AppendNote | LinkEntities | CreateLink | CreateIdea | PromoteIdea
            | CreateRoute | CreateRouteNode | CreateRouteEdge | AppendRouteNodeLog
            | CreateKnowledge | CaptureInbox => ActionClass::Create,
            UpdateTask | PatchNote | UpsertJournalAppend | PatchIdea | PatchRoute
            | PatchRouteNode | PatchRouteEdge | PatchKnowledge | ArchiveKnowledge => {
                ActionClass::Update
            }
            DeleteLink | DeleteRouteNode | DeleteRouteEdge | DeleteKnowledge => ActionClass::Other,
        }
    }
}

/// Payload keys that identify a target rather than describe a change.
pub const IDENTIFIER_KEYS: &[&str] = &[
    "id", "task_id", "note_id", "idea_id", "route_id", "node_id", "edge_id", "item_id", "link_id",
];

/// A parsed action with its strongly-typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    CreateTask(NewTask),
    UpdateTask {
        task_id: String,
        patch: TaskPatch,
    },
    AppendNote(NewNote),
    PatchNote {
        note_id: String,
        patch: NotePatch,
        body_append: Option<String>,
        source: Option<String>,
    },
    UpsertJournalAppend(JournalAppend),
    LinkEntities(NewLink),
    CreateLink(NewLink),
    DeleteLink {
        link_id: String,
    },
    CreateIdea(NewIdea),
    PatchIdea {
        idea_id: String,
        patch: IdeaPatch,
    },
    PromoteIdea {
        idea_id: String,
        promotion: IdeaPromotion,
    },
    CreateRoute(NewRoute),
    PatchRoute {
        route_id: String,
        patch: RoutePatch,
    },
    CreateRouteNode {
        route_id: String,
        node: NewRouteNode,
    },
    PatchRouteNode {
        route_id: String,
        node_id: String,
        patch: RouteNodePatch,
    },
    DeleteRouteNode {
        route_id: String,
        node_id: String,
    },
    CreateRouteEdge {
        route_id: String,
        edge: NewRouteEdge,
    },
    PatchRouteEdge {
        route_id: String,
        edge_id: String,
        patch: RouteEdgePatch,
    },
    DeleteRouteEdge {
        route_id: String,
        edge_id: String,
    },
    AppendRouteNodeLog {
        route_id: String,
        node_id: String,
        log: NewNodeLog,
    },
    CreateKnowledge(NewKnowledge),
    PatchKnowledge {
        item_id: String,
        patch: KnowledgePatch,
    },
    ArchiveKnowledge {
        item_id: String,
    },
    DeleteKnowledge {
        item_id: String,
    },
    CaptureInbox(NewInboxItem),
}

impl Action {
    /// Parses and shape-checks a raw payload for `action_type`.
    pub fn parse(action_type: ActionType, payload: &Map<String, Value>) -> Result<Self, ValidationError> {
        let mut fields = payload.clone();
        let action = match action_type {
            ActionType::CreateTask => {
                let new_task: NewTask = decode(fields)?;
                new_task.validate()?;
                Self::CreateTask(new_task)
            }
            ActionType::UpdateTask => {
                let task_id = take_id(&mut fields, "task_id", "TASK_ID_REQUIRED")?;
                let patch: TaskPatch = decode(fields)?;
                require_fields(patch.is_empty())?;
                patch.validate()?;
                Self::UpdateTask { task_id, patch }
            }
            ActionType::AppendNote => {
                let note: NewNote = decode(fields)?;
                note.validate()?;
                Self::AppendNote(note)
            }
            ActionType::PatchNote => {
                let note_id = take_id(&mut fields, "note_id", "NOTE_ID_REQUIRED")?;
                let body_append = take_text(&mut fields, "body_append")?;
                let source = take_text(&mut fields, "source")?.filter(|value| !is_blank(value));
                let patch: NotePatch = decode(fields)?;
                require_fields(patch.is_empty() && body_append.is_none())?;
                if body_append.as_deref().is_some_and(is_blank) {
                    return Err(ValidationError::code("NOTE_BODY_APPEND_REQUIRED"));
                }
                patch.validate()?;
                Self::PatchNote {
                    note_id,
                    patch,
                    body_append,
                    source,
                }
            }
            ActionType::UpsertJournalAppend => {
                let append: JournalAppend = decode(fields)?;
                append.validate()?;
                Self::UpsertJournalAppend(append)
            }
            ActionType::LinkEntities | ActionType::CreateLink => {
                let link: NewLink = decode(fields)?;
                link.validate()?;
                if action_type == ActionType::LinkEntities {
                    Self::LinkEntities(link)
                } else {
                    Self::CreateLink(link)
                }
            }
            ActionType::DeleteLink => {
                let link_id = take_id(&mut fields, "link_id", "LINK_ID_REQUIRED")?;
                expect_no_fields(fields)?;
                Self::DeleteLink { link_id }
            }
            ActionType::CreateIdea => {
                let idea: NewIdea = decode(fields)?;
                idea.validate()?;
                Self::CreateIdea(idea)
            }
            ActionType::PatchIdea => {
                let idea_id = take_id(&mut fields, "idea_id", "IDEA_ID_REQUIRED")?;
                let patch: IdeaPatch = decode(fields)?;
                require_fields(patch.is_empty())?;
                patch.validate()?;
                Self::PatchIdea { idea_id, patch }
            }
            ActionType::PromoteIdea => {
                let idea_id = take_id(&mut fields, "idea_id", "IDEA_ID_REQUIRED")?;
                let promotion: IdeaPromotion = decode(fields)?;
                if is_blank(&promotion.route_id) {
                    return Err(ValidationError::code("ROUTE_ID_REQUIRED"));
                }
                Self::PromoteIdea { idea_id, promotion }
            }
            ActionType::CreateRoute => {
                let route: NewRoute = decode(fields)?;
                route.validate()?;
                Self::CreateRoute(route)
            }
            ActionType::PatchRoute => {
                let route_id = take_id(&mut fields, "route_id", "ROUTE_ID_REQUIRED")?;
                let patch: RoutePatch = decode(fields)?;
                require_fields(patch.is_empty())?;
                patch.validate()?;
                Self::PatchRoute { route_id, patch }
            }
            ActionType::CreateRouteNode => {
                let route_id = take_id(&mut fields, "route_id", "ROUTE_ID_REQUIRED")?;
                let node: NewRouteNode = decode(fields)?;
                node.validate()?;
                Self::CreateRouteNode { route_id, node }
            }
            ActionType::PatchRouteNode => {
                let route_id = take_id(&mut fields, "route_id", "ROUTE_ID_REQUIRED")?;
                let node_id = take_id(&mut fields, "node_id", "ROUTE_NODE_ID_REQUIRED")?;
                let patch: RouteNodePatch = decode(fields)?;
                require_fields(patch.is_empty())?;
                patch.validate()?;
                Self::PatchRouteNode {
                    route_id,
                    node_id,
                    patch,
                }
            }
            ActionType::DeleteRouteNode => {
                let route_id = take_id(&mut fields, "route_id", "ROUTE_ID_REQUIRED")?;
                let node_id = take_id(&mut fields, "node_id", "ROUTE_NODE_ID_REQUIRED")?;
                expect_no_fields(fields)?;
                Self::DeleteRouteNode { route_id, node_id }
            }
            ActionType::CreateRouteEdge => {
                let route_id = take_id(&mut fields, "route_id", "ROUTE_ID_REQUIRED")?;
                let edge: NewRouteEdge = decode(fields)?;
                Self::CreateRouteEdge { route_id, edge }
            }
            ActionType::PatchRouteEdge => {
                let route_id = take_id(&mut fields, "route_id", "ROUTE_ID_REQUIRED")?;
                let edge_id = take_id(&mut fields, "edge_id", "ROUTE_EDGE_ID_REQUIRED")?;
                let patch: RouteEdgePatch = decode(fields)?;
                require_fields(patch.is_empty())?;
                Self::PatchRouteEdge {
                    route_id,
                    edge_id,
                    patch,
                }
            }
            ActionType::DeleteRouteEdge => {
                let route_id = take_id(&mut fields, "route_id", "ROUTE_ID_REQUIRED")?;
                let edge_id = take_id(&mut fields, "edge_id", "ROUTE_EDGE_ID_REQUIRED")?;
                expect_no_fields(fields)?;
                Self::DeleteRouteEdge { route_id, edge_id }
            }
            ActionType::AppendRouteNodeLog => {
                let route_id = take_id(&mut fields, "route_id", "ROUTE_ID_REQUIRED")?;
                let node_id = take_id(&mut fields, "node_id", "ROUTE_NODE_ID_REQUIRED")?;
                let log: NewNodeLog = decode(fields)?;
                log.validate()?;
                Self::AppendRouteNodeLog {
                    route_id,
                    node_id,
                    log,
                }
            }
            ActionType::CreateKnowledge => {
                let knowledge: NewKnowledge = decode(fields)?;
                knowledge.validate()?;
                Self::CreateKnowledge(knowledge)
            }
            ActionType::PatchKnowledge => {
                let item_id = take_knowledge_id(&mut fields)?;
                let patch: KnowledgePatch = decode(fields)?;
                require_fields(patch.is_empty())?;
                patch.validate()?;
                Self::PatchKnowledge { item_id, patch }
            }
            ActionType::ArchiveKnowledge => {
                let item_id = take_knowledge_id(&mut fields)?;
                expect_no_fields(fields)?;
                Self::ArchiveKnowledge { item_id }
            }
            ActionType::DeleteKnowledge => {
                let item_id = take_knowledge_id(&mut fields)?;
                expect_no_fields(fields)?;
                Self::DeleteKnowledge { item_id }
            }
            ActionType::CaptureInbox => {
                let item: NewInboxItem = decode(fields)?;
                item.validate()?;
                Self::CaptureInbox(item)
            }
        };
        Ok(action)
    }

    pub fn action_type(&self) -> ActionType {
        match self {
            Self::CreateTask(_) => ActionType::CreateTask,
            Self::UpdateTask { .. } => ActionType::UpdateTask,
            Self::AppendNote(_) => ActionType::AppendNote,
            Self::PatchNote { .. } => ActionType::PatchNote,
            Self::UpsertJournalAppend(_) => ActionType::UpsertJournalAppend,
            Self::LinkEntities(_) => ActionType::LinkEntities,
            Self::CreateLink(_) => ActionType::CreateLink,
            Self::DeleteLink { .. } => ActionType::DeleteLink,
            Self::CreateIdea(_) => ActionType::CreateIdea,
            Self::PatchIdea { .. } => ActionType::PatchIdea,
            Self::PromoteIdea { .. } => ActionType::PromoteIdea,
            Self::CreateRoute(_) => ActionType::CreateRoute,
            Self::PatchRoute { .. } => ActionType::PatchRoute,
            Self::CreateRouteNode { .. } => ActionType::CreateRouteNode,
            Self::PatchRouteNode { .. } => ActionType::PatchRouteNode,
            Self::DeleteRouteNode { .. } => ActionType::DeleteRouteNode,
            Self::CreateRouteEdge { .. } => ActionType::CreateRouteEdge,
            Self::PatchRouteEdge { .. } => ActionType::PatchRouteEdge,
            Self::DeleteRouteEdge { .. } => ActionType::DeleteRouteEdge,
            Self::AppendRouteNodeLog { .. } => ActionType::AppendRouteNodeLog,
            Self::CreateKnowledge(_) => ActionType::CreateKnowledge,
            Self::PatchKnowledge { .. } => ActionType::PatchKnowledge,
            Self::ArchiveKnowledge { .. } => ActionType::ArchiveKnowledge,
            Self::DeleteKnowledge { .. } => ActionType::DeleteKnowledge,
            Self::CaptureInbox(_) => ActionType::CaptureInbox,
        }
    }

    /// Provenance references recorded on the action's audit event.
    pub fn source_refs(&self) -> Vec<String> {
        let single = |value: &str| {
            if is_blank(value) {
                Vec::new()
            } else {
                vec![value.to_string()]
            }
        };
        match self {
            Self::CreateTask(task) => task.source.as_deref().map(single).unwrap_or_default(),
            Self::UpdateTask { patch, .. } => {
                patch.source.as_deref().map(single).unwrap_or_default()
            }
            Self::AppendNote(note) => note
                .sources
                .iter()
                .filter(|source| !is_blank(&source.value))
                .map(|source| source.value.clone())
                .collect(),
            Self::PatchNote { source, .. } => source.as_deref().map(single).unwrap_or_default(),
            Self::UpsertJournalAppend(append) => single(&append.source),
            Self::CreateIdea(idea) => single(&idea.source),
            Self::PatchIdea { patch, .. } => {
                patch.source.as_deref().map(single).unwrap_or_default()
            }
            Self::AppendRouteNodeLog { log, .. } => {
                log.source_ref.as_deref().map(single).unwrap_or_default()
            }
            Self::CaptureInbox(item) => single(&item.source),
            _ => Vec::new(),
        }
    }
}

/// Failure of a single action's validate/apply/rollback.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Stored apply result cannot drive a rollback.
    #[error("corrupt apply result: {0}")]
    Corrupt(String),
    #[error("unsupported action type `{0}`")]
    Unsupported(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl From<rusqlite::Error> for ActionError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(RepoError::from(value))
    }
}

impl ActionError {
    /// Stable validation code, if this is a validation failure.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::Validation(err) => Some(err.code),
            _ => None,
        }
    }
}

pub type ActionResult<T> = Result<T, ActionError>;

pub(crate) fn not_found(code: &'static str, id: &str) -> ActionError {
    ActionError::Validation(ValidationError::new(code, format!("`{id}` does not exist")))
}

fn decode<T: DeserializeOwned>(fields: Map<String, Value>) -> Result<T, ValidationError> {
    serde_json::from_value(Value::Object(fields))
        .map_err(|err| ValidationError::new("PAYLOAD_INVALID", err.to_string()))
}

fn take_id(
    fields: &mut Map<String, Value>,
    key: &str,
    code: &'static str,
) -> Result<String, ValidationError> {
    match fields.remove(key) {
        Some(Value::String(id)) if !is_blank(&id) => Ok(id),
        _ => Err(ValidationError::code(code)),
    }
}

fn take_knowledge_id(fields: &mut Map<String, Value>) -> Result<String, ValidationError> {
    let item_id = take_id(fields, "item_id", "KNOWLEDGE_ID_REQUIRED");
    let note_id = take_id(fields, "note_id", "KNOWLEDGE_ID_REQUIRED");
    item_id.or(note_id)
}

fn take_text(fields: &mut Map<String, Value>, key: &str) -> Result<Option<String>, ValidationError> {
    match fields.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text)),
        Some(_) => Err(ValidationError::new(
            "PAYLOAD_INVALID",
            format!("`{key}` must be a string"),
        )),
    }
}

fn require_fields(empty: bool) -> Result<(), ValidationError> {
    if empty {
        return Err(ValidationError::code("NO_PATCH_FIELDS"));
    }
    Ok(())
}

fn expect_no_fields(fields: Map<String, Value>) -> Result<(), ValidationError> {
    match fields.keys().next() {
        Some(key) => Err(ValidationError::new(
            "PAYLOAD_INVALID",
            format!("unknown field `{key}`"),
        )),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn every_action_type_has_a_descriptor() {
        for action_type in ActionType::ALL {
            assert!(!action_type.entity().is_empty());
            assert!(!action_type.verb().is_empty());
            assert!(action_type.summary_key().starts_with(match action_type {
                ActionType::PromoteIdea => "idea",
                ActionType::AppendRouteNodeLog => "route_node_log",
                _ => action_type.entity(),
            }));
        }
        assert_eq!(ActionType::ALL.len(), 25);
    }

    #[test]
    fn link_aliases_share_summary_key() {
        assert_eq!(ActionType::LinkEntities.summary_key(), "link_create");
        assert_eq!(ActionType::CreateLink.summary_key(), "link_create");
        assert_eq!(ActionType::LinkEntities.verb(), "link");
    }

    #[test]
    fn update_task_requires_id_and_fields() {
        let err = Action::parse(ActionType::UpdateTask, &payload(json!({"priority": "P1"})))
            .unwrap_err();
        assert_eq!(err.code, "TASK_ID_REQUIRED");

        let err = Action::parse(ActionType::UpdateTask, &payload(json!({"task_id": "tsk_1"})))
            .unwrap_err();
        assert_eq!(err.code, "NO_PATCH_FIELDS");

        let action = Action::parse(
            ActionType::UpdateTask,
            &payload(json!({"task_id": "tsk_1", "priority": "P1"})),
        )
        .unwrap();
        assert_eq!(action.action_type(), ActionType::UpdateTask);
    }

    #[test]
    fn unknown_payload_keys_are_rejected() {
        let err = Action::parse(
            ActionType::CreateTask,
            &payload(json!({"title": "x", "status": "todo", "colour": "red"})),
        )
        .unwrap_err();
        assert_eq!(err.code, "PAYLOAD_INVALID");

        let err = Action::parse(
            ActionType::DeleteLink,
            &payload(json!({"link_id": "lnk_1", "force": true})),
        )
        .unwrap_err();
        assert_eq!(err.code, "PAYLOAD_INVALID");
    }

    #[test]
    fn knowledge_accepts_item_or_note_id() {
        let by_item = Action::parse(
            ActionType::ArchiveKnowledge,
            &payload(json!({"item_id": "nte_1"})),
        )
        .unwrap();
        let by_note = Action::parse(
            ActionType::ArchiveKnowledge,
            &payload(json!({"note_id": "nte_1"})),
        )
        .unwrap();
        assert_eq!(by_item, by_note);

        let err = Action::parse(ActionType::DeleteKnowledge, &Map::new()).unwrap_err();
        assert_eq!(err.code, "KNOWLEDGE_ID_REQUIRED");
    }

    #[test]
    fn patch_note_body_append_rules() {
        let err = Action::parse(
            ActionType::PatchNote,
            &payload(json!({"note_id": "nte_1", "body_append": "  "})),
        )
        .unwrap_err();
        assert_eq!(err.code, "NOTE_BODY_APPEND_REQUIRED");

        let err = Action::parse(
            ActionType::PatchNote,
            &payload(json!({"note_id": "nte_1", "source": "chat://1"})),
        )
        .unwrap_err();
        assert_eq!(err.code, "NO_PATCH_FIELDS");

        let action = Action::parse(
            ActionType::PatchNote,
            &payload(json!({"note_id": "nte_1", "body_append": "more", "source": "chat://1"})),
        )
        .unwrap();
        assert_eq!(action.source_refs(), vec!["chat://1".to_string()]);
    }

    #[test]
    fn append_note_collects_every_source_ref() {
        let action = Action::parse(
            ActionType::AppendNote,
            &payload(json!({
                "title": "t",
                "body": "b",
                "sources": [
                    {"type": "url", "value": "https://a"},
                    {"type": "text", "value": "b"}
                ]
            })),
        )
        .unwrap();
        assert_eq!(action.source_refs(), vec!["https://a".to_string(), "b".to_string()]);
    }
}
