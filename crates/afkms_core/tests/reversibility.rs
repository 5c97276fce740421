//! Every action type, committed then undone, leaves the store as it found it.

use afkms_core::model::note::{KnowledgeCategory, LinkEndpoint, NoteStatus};
use afkms_core::model::route::RouteStatus;
use afkms_core::repo::idea_repo::IdeaRepo;
use afkms_core::repo::inbox_repo::InboxRepo;
use afkms_core::repo::journal_repo::JournalRepo;
use afkms_core::repo::note_repo::{LinkRepo, NoteRepo};
use afkms_core::repo::route_repo::RouteRepo;
use afkms_core::repo::task_repo::TaskRepo;
use afkms_core::{
    open_db_in_memory, ActionInput, ActorKind, ActorRef, ChangeService, CommitRequest,
    DryRunRequest, UndoOutcome, UndoRequest,
};
use rusqlite::Connection;
use serde_json::{json, Value};

/// Commits one action and returns the `entity_id` it recorded.
fn apply(conn: &mut Connection, action_type: &str, payload: Value) -> String {
    let Value::Object(payload) = payload else {
        panic!("payload must be an object");
    };
    let mut service = ChangeService::new(conn);
    let proposal = service
        .dry_run(DryRunRequest {
            actions: vec![ActionInput::new(action_type, payload)],
            actor: ActorRef::new(ActorKind::Agent, "planner"),
            tool: "chat".to_string(),
        })
        .unwrap_or_else(|err| panic!("dry run of {action_type} failed: {err}"));
    service
        .commit(
            &proposal.change_set.id,
            CommitRequest {
                approved_by: ActorRef::new(ActorKind::User, "owner"),
                client_request_id: None,
            },
        )
        .unwrap_or_else(|err| panic!("commit of {action_type} failed: {err}"));
    let detail = service
        .get_change(&proposal.change_set.id)
        .unwrap()
        .unwrap();
    detail.actions[0].apply_result.as_ref().unwrap()["entity_id"]
        .as_str()
        .unwrap()
        .to_string()
}

fn undo(conn: &mut Connection) {
    let outcome = ChangeService::new(conn)
        .undo_last(UndoRequest {
            requested_by: ActorRef::new(ActorKind::User, "owner"),
            reason: "revert".to_string(),
            client_request_id: None,
        })
        .unwrap();
    assert!(matches!(outcome, UndoOutcome::Reverted { .. }));
}

fn seed_task(conn: &mut Connection, title: &str) -> String {
    apply(conn, "create_task", json!({"title": title, "status": "todo"}))
}

#[test]
fn task_update_with_source_is_reversed() {
    let mut conn = open_db_in_memory().unwrap();
    let task_id = seed_task(&mut conn, "ship");

    apply(
        &mut conn,
        "update_task",
        json!({
            "task_id": task_id,
            "status": "cancelled",
            "cancelled_reason": "superseded",
            "due": "2026-12-01",
            "source": "chat://thread/1",
        }),
    );
    let tasks = TaskRepo::new(&conn);
    let updated = tasks.get(&task_id).unwrap().unwrap();
    assert_eq!(updated.status.as_str(), "cancelled");
    assert_eq!(tasks.list_sources(&task_id).unwrap().len(), 1);

    undo(&mut conn);
    let tasks = TaskRepo::new(&conn);
    let restored = tasks.get(&task_id).unwrap().unwrap();
    assert_eq!(restored.status.as_str(), "todo");
    assert_eq!(restored.cancelled_reason, None);
    assert_eq!(restored.due, None);
    assert!(tasks.list_sources(&task_id).unwrap().is_empty());
}

#[test]
fn note_append_and_patch_are_reversed() {
    let mut conn = open_db_in_memory().unwrap();
    let note_id = apply(
        &mut conn,
        "append_note",
        json!({
            "title": "Cache notes",
            "body": "first paragraph",
            "sources": [{"type": "url", "value": "https://example.org/cache"}],
        }),
    );
    assert_eq!(NoteRepo::new(&conn).list_sources(&note_id).unwrap().len(), 1);

    apply(
        &mut conn,
        "patch_note",
        json!({"note_id": note_id, "body_append": "second paragraph", "source": "chat://thread/2"}),
    );
    let patched = NoteRepo::new(&conn).get(&note_id).unwrap().unwrap();
    assert!(patched.body.starts_with("first paragraph"));
    assert!(patched.body.ends_with("second paragraph"));
    assert_eq!(NoteRepo::new(&conn).list_sources(&note_id).unwrap().len(), 2);

    undo(&mut conn);
    let notes = NoteRepo::new(&conn);
    assert_eq!(notes.get(&note_id).unwrap().unwrap().body, "first paragraph");
    assert_eq!(notes.list_sources(&note_id).unwrap().len(), 1);

    undo(&mut conn);
    let notes = NoteRepo::new(&conn);
    assert!(notes.get(&note_id).unwrap().is_none());
    assert!(notes.list_sources(&note_id).unwrap().is_empty());
}

#[test]
fn journal_create_and_append_are_reversed() {
    let mut conn = open_db_in_memory().unwrap();
    let journal_id = apply(
        &mut conn,
        "upsert_journal_append",
        json!({"journal_date": "2026-03-01", "append_text": "morning", "source": "chat"}),
    );
    let appended_id = apply(
        &mut conn,
        "upsert_journal_append",
        json!({"journal_date": "2026-03-01", "append_text": "evening"}),
    );
    assert_eq!(journal_id, appended_id);
    let journal = JournalRepo::new(&conn)
        .find_by_date("2026-03-01")
        .unwrap()
        .unwrap();
    assert!(journal.raw_content.contains("evening"));

    undo(&mut conn);
    let journal = JournalRepo::new(&conn).get(&journal_id).unwrap().unwrap();
    assert_eq!(journal.raw_content, "morning");
    assert_eq!(journal.source, "chat");

    undo(&mut conn);
    assert!(JournalRepo::new(&conn).get(&journal_id).unwrap().is_none());
}

#[test]
fn link_create_and_delete_are_reversed() {
    let mut conn = open_db_in_memory().unwrap();
    let task_id = seed_task(&mut conn, "ship");
    let note_id = apply(
        &mut conn,
        "append_note",
        json!({
            "title": "Why",
            "body": "context",
            "sources": [{"type": "text", "value": "meeting"}],
        }),
    );
    let link_id = apply(
        &mut conn,
        "create_link",
        json!({"from_type": "note", "from_id": note_id, "to_type": "task", "to_id": task_id, "relation": "explains"}),
    );
    apply(&mut conn, "delete_link", json!({"link_id": link_id}));
    assert!(LinkRepo::new(&conn).get(&link_id).unwrap().is_none());

    undo(&mut conn);
    let restored = LinkRepo::new(&conn).get(&link_id).unwrap().unwrap();
    assert_eq!(restored.relation, "explains");
    assert_eq!(restored.from_type, LinkEndpoint::Note);

    undo(&mut conn);
    assert!(LinkRepo::new(&conn).get(&link_id).unwrap().is_none());
    assert!(NoteRepo::new(&conn).get(&note_id).unwrap().is_some());
}

#[test]
fn link_entities_is_reversed_before_its_task() {
    let mut conn = open_db_in_memory().unwrap();
    let note_id = apply(
        &mut conn,
        "append_note",
        json!({
            "title": "Spec",
            "body": "details",
            "sources": [{"type": "doc_id", "value": "doc-7"}],
        }),
    );
    let task_id = seed_task(&mut conn, "implement");
    let link_id = apply(
        &mut conn,
        "link_entities",
        json!({"from_type": "note", "from_id": note_id, "to_type": "task", "to_id": task_id, "relation": "specifies"}),
    );

    undo(&mut conn);
    assert!(LinkRepo::new(&conn).get(&link_id).unwrap().is_none());
    undo(&mut conn);
    assert!(TaskRepo::new(&conn).get(&task_id).unwrap().is_none());
    assert!(LinkRepo::new(&conn)
        .touching(LinkEndpoint::Note, &note_id)
        .unwrap()
        .is_empty());
}

#[test]
fn idea_lifecycle_and_promotion_are_reversed() {
    let mut conn = open_db_in_memory().unwrap();
    let task_id = seed_task(&mut conn, "explore");
    let route_id = apply(
        &mut conn,
        "create_route",
        json!({"task_id": task_id, "name": "plan"}),
    );
    let idea_id = apply(
        &mut conn,
        "create_idea",
        json!({"task_id": task_id, "title": "try caching", "problem": "slow reads"}),
    );
    for status in ["triage", "discovery", "ready"] {
        apply(&mut conn, "patch_idea", json!({"idea_id": idea_id, "status": status}));
    }
    let node_id = apply(
        &mut conn,
        "promote_idea",
        json!({"idea_id": idea_id, "route_id": route_id}),
    );
    let node = RouteRepo::new(&conn).get_node(&node_id).unwrap().unwrap();
    assert_eq!(node.route_id, route_id);
    assert_eq!(node.status.as_str(), "waiting");

    undo(&mut conn);
    assert!(RouteRepo::new(&conn).get_node(&node_id).unwrap().is_none());

    undo(&mut conn);
    let idea = IdeaRepo::new(&conn).get(&idea_id).unwrap().unwrap();
    assert_eq!(idea.status.as_str(), "discovery");
}

#[test]
fn idea_status_machine_is_enforced() {
    let mut conn = open_db_in_memory().unwrap();
    let task_id = seed_task(&mut conn, "explore");
    let idea_id = apply(
        &mut conn,
        "create_idea",
        json!({"task_id": task_id, "title": "try caching"}),
    );
    let Value::Object(payload) = json!({"idea_id": idea_id, "status": "ready"}) else {
        unreachable!()
    };
    let err = ChangeService::new(&mut conn)
        .dry_run(DryRunRequest {
            actions: vec![ActionInput::new("patch_idea", payload)],
            actor: ActorRef::new(ActorKind::Agent, "planner"),
            tool: "chat".to_string(),
        })
        .unwrap_err();
    assert_eq!(err.code(), "IDEA_INVALID_STATUS_TRANSITION");
}

#[test]
fn route_activation_by_patch_is_reversed_with_task_status() {
    let mut conn = open_db_in_memory().unwrap();
    let task_id = seed_task(&mut conn, "launch");
    let route_id = apply(
        &mut conn,
        "create_route",
        json!({"task_id": task_id, "name": "plan a"}),
    );
    apply(
        &mut conn,
        "patch_route",
        json!({"route_id": route_id, "status": "active", "goal": "ship it"}),
    );
    assert_eq!(
        TaskRepo::new(&conn).get(&task_id).unwrap().unwrap().status.as_str(),
        "in_progress"
    );

    undo(&mut conn);
    let route = RouteRepo::new(&conn).get_route(&route_id).unwrap().unwrap();
    assert_eq!(route.status, RouteStatus::Candidate);
    assert_eq!(route.goal, "");
    assert_eq!(
        TaskRepo::new(&conn).get(&task_id).unwrap().unwrap().status.as_str(),
        "todo"
    );
}

#[test]
fn route_graph_edits_are_reversed() {
    let mut conn = open_db_in_memory().unwrap();
    let task_id = seed_task(&mut conn, "graph");
    let route_id = apply(
        &mut conn,
        "create_route",
        json!({"task_id": task_id, "name": "plan"}),
    );
    let start = apply(
        &mut conn,
        "create_route_node",
        json!({"route_id": route_id, "node_type": "start", "title": "begin"}),
    );
    let next = apply(
        &mut conn,
        "create_route_node",
        json!({"route_id": route_id, "node_type": "milestone", "title": "halfway"}),
    );
    let edge_id = apply(
        &mut conn,
        "create_route_edge",
        json!({"route_id": route_id, "from_node_id": start, "to_node_id": next}),
    );
    apply(
        &mut conn,
        "patch_route_edge",
        json!({"route_id": route_id, "edge_id": edge_id, "description": "kick off"}),
    );
    apply(
        &mut conn,
        "patch_route_node",
        json!({"route_id": route_id, "node_id": next, "title": "renamed", "status": "execute"}),
    );
    apply(
        &mut conn,
        "delete_route_edge",
        json!({"route_id": route_id, "edge_id": edge_id}),
    );
    assert!(!RouteRepo::new(&conn).edge_exists(&edge_id).unwrap());

    undo(&mut conn);
    let routes = RouteRepo::new(&conn);
    let edge = routes.get_edge(&route_id, &edge_id).unwrap().unwrap();
    assert_eq!(edge.description, "kick off");

    undo(&mut conn);
    let node = RouteRepo::new(&conn).get_node(&next).unwrap().unwrap();
    assert_eq!(node.title, "halfway");
    assert_eq!(node.status.as_str(), "waiting");

    undo(&mut conn);
    let edge = RouteRepo::new(&conn)
        .get_edge(&route_id, &edge_id)
        .unwrap()
        .unwrap();
    assert_eq!(edge.description, "");

    undo(&mut conn);
    assert!(!RouteRepo::new(&conn).edge_exists(&edge_id).unwrap());
}

#[test]
fn node_log_append_is_reversed() {
    let mut conn = open_db_in_memory().unwrap();
    let task_id = seed_task(&mut conn, "logbook");
    let route_id = apply(
        &mut conn,
        "create_route",
        json!({"task_id": task_id, "name": "plan"}),
    );
    let node_id = apply(
        &mut conn,
        "create_route_node",
        json!({"route_id": route_id, "node_type": "task", "title": "do it"}),
    );
    let log_id = apply(
        &mut conn,
        "append_route_node_log",
        json!({"route_id": route_id, "node_id": node_id, "content": "started"}),
    );
    assert!(RouteRepo::new(&conn).log_exists(&log_id).unwrap());

    undo(&mut conn);
    assert!(!RouteRepo::new(&conn).log_exists(&log_id).unwrap());
    assert!(RouteRepo::new(&conn).get_node(&node_id).unwrap().is_some());
}

#[test]
fn knowledge_lifecycle_is_reversed() {
    let mut conn = open_db_in_memory().unwrap();
    let task_id = seed_task(&mut conn, "operate");
    let item_id = apply(
        &mut conn,
        "create_knowledge",
        json!({"title": "Restart runbook", "body": "step one: drain"}),
    );
    let notes = NoteRepo::new(&conn);
    assert_eq!(
        notes.get(&item_id).unwrap().unwrap().category,
        KnowledgeCategory::OpsManual
    );

    apply(
        &mut conn,
        "patch_knowledge",
        json!({"item_id": item_id, "title": "Restart guide"}),
    );
    apply(&mut conn, "archive_knowledge", json!({"item_id": item_id}));
    // Archiving twice is accepted and records no change.
    apply(&mut conn, "archive_knowledge", json!({"item_id": item_id}));
    let link_id = apply(
        &mut conn,
        "create_link",
        json!({"from_type": "note", "from_id": item_id, "to_type": "task", "to_id": task_id, "relation": "documents"}),
    );
    apply(&mut conn, "delete_knowledge", json!({"item_id": item_id}));
    assert!(NoteRepo::new(&conn).get(&item_id).unwrap().is_none());
    assert!(LinkRepo::new(&conn).get(&link_id).unwrap().is_none());

    undo(&mut conn);
    let restored = NoteRepo::new(&conn).get(&item_id).unwrap().unwrap();
    assert_eq!(restored.title, "Restart guide");
    assert_eq!(restored.status, NoteStatus::Archived);
    assert!(LinkRepo::new(&conn).get(&link_id).unwrap().is_some());

    undo(&mut conn); // create_link
    undo(&mut conn); // second archive, unchanged
    assert_eq!(
        NoteRepo::new(&conn).get(&item_id).unwrap().unwrap().status,
        NoteStatus::Archived
    );
    undo(&mut conn); // first archive
    assert_eq!(
        NoteRepo::new(&conn).get(&item_id).unwrap().unwrap().status,
        NoteStatus::Active
    );
    undo(&mut conn); // patch
    assert_eq!(
        NoteRepo::new(&conn).get(&item_id).unwrap().unwrap().title,
        "Restart runbook"
    );
    undo(&mut conn); // create
    assert!(NoteRepo::new(&conn).get(&item_id).unwrap().is_none());
}

#[test]
fn inbox_capture_is_reversed() {
    let mut conn = open_db_in_memory().unwrap();
    let item_id = apply(
        &mut conn,
        "capture_inbox",
        json!({"content": "buy milk", "source": "chat://thread/3"}),
    );
    assert!(InboxRepo::new(&conn).get(&item_id).unwrap().is_some());

    undo(&mut conn);
    assert!(InboxRepo::new(&conn).get(&item_id).unwrap().is_none());
}
