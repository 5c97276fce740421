//! Validate/apply/rollback dispatch over the action vocabulary.

use super::record::{ApplyRecord, ApplyResult};
use super::{idea, inbox, journal, note, route, task, Action, ActionResult};
use rusqlite::Connection;

/// Referential checks run at dry-run time, before anything is written.
pub fn validate(conn: &Connection, action: &Action) -> ActionResult<()> {
    match action {
        Action::CreateTask(new_task) => task::validate_create(conn, new_task),
        Action::UpdateTask { patch, .. } => task::validate_update(conn, patch),
        Action::AppendNote(new_note) => note::validate_append(conn, new_note),
        Action::PatchNote { note_id, patch, .. } => {
            note::validate_patch(conn, note_id, patch).map(drop)
        }
        Action::DeleteLink { link_id } => note::validate_delete_link(conn, link_id).map(drop),
        Action::CreateIdea(new_idea) => idea::validate_create(conn, new_idea),
        Action::PatchIdea { idea_id, patch } => idea::validate_patch(conn, idea_id, patch).map(drop),
        Action::PromoteIdea { idea_id, promotion } => {
            idea::validate_promote(conn, idea_id, promotion).map(drop)
        }
        Action::CreateRoute(new_route) => route::validate_create_route(conn, new_route),
        Action::PatchRoute { route_id, patch } => {
            route::validate_patch_route(conn, route_id, patch).map(drop)
        }
        Action::CreateRouteNode { route_id, node } => {
            route::validate_create_node(conn, route_id, node)
        }
        Action::PatchRouteNode {
            route_id,
            node_id,
            patch,
        } => route::validate_patch_node(conn, route_id, node_id, patch).map(drop),
        Action::DeleteRouteNode { route_id, node_id } => {
            route::validate_delete_node(conn, route_id, node_id).map(drop)
        }
        Action::CreateRouteEdge { route_id, edge } => {
            route::validate_create_edge(conn, route_id, edge).map(drop)
        }
        Action::PatchRouteEdge {
            route_id, edge_id, ..
        }
        | Action::DeleteRouteEdge { route_id, edge_id } => {
            route::validate_edge(conn, route_id, edge_id).map(drop)
        }
        Action::AppendRouteNodeLog {
            route_id, node_id, ..
        } => route::validate_append_log(conn, route_id, node_id),
        Action::PatchKnowledge { item_id, .. }
        | Action::ArchiveKnowledge { item_id }
        | Action::DeleteKnowledge { item_id } => note::validate_knowledge(conn, item_id).map(drop),
        Action::UpsertJournalAppend(_)
        | Action::LinkEntities(_)
        | Action::CreateLink(_)
        | Action::CreateKnowledge(_)
        | Action::CaptureInbox(_) => Ok(()),
    }
}

/// Applies one action. The caller owns the surrounding transaction.
pub fn apply(conn: &Connection, action: &Action) -> ActionResult<ApplyResult> {
    match action {
        Action::CreateTask(new_task) => task::apply_create(conn, new_task),
        Action::UpdateTask { task_id, patch } => task::apply_update(conn, task_id, patch),
        Action::AppendNote(new_note) => note::apply_append(conn, new_note),
        Action::PatchNote {
            note_id,
            patch,
            body_append,
            source,
        } => note::apply_patch(
            conn,
            note_id,
            patch,
            body_append.as_deref(),
            source.as_deref(),
        ),
        Action::UpsertJournalAppend(append) => journal::apply_upsert(conn, append),
        Action::LinkEntities(link) => note::apply_link(conn, link, ApplyRecord::LinkEntities),
        Action::CreateLink(link) => note::apply_link(conn, link, ApplyRecord::CreateLink),
        Action::DeleteLink { link_id } => note::apply_delete_link(conn, link_id),
        Action::CreateIdea(new_idea) => idea::apply_create(conn, new_idea),
        Action::PatchIdea { idea_id, patch } => idea::apply_patch(conn, idea_id, patch),
        Action::PromoteIdea { idea_id, promotion } => {
            idea::apply_promote(conn, idea_id, promotion)
        }
        Action::CreateRoute(new_route) => route::apply_create_route(conn, new_route),
        Action::PatchRoute { route_id, patch } => route::apply_patch_route(conn, route_id, patch),
        Action::CreateRouteNode { route_id, node } => route::apply_create_node(conn, route_id, node),
        Action::PatchRouteNode {
            route_id,
            node_id,
            patch,
        } => route::apply_patch_node(conn, route_id, node_id, patch),
        Action::DeleteRouteNode { route_id, node_id } => {
            route::apply_delete_node(conn, route_id, node_id)
        }
        Action::CreateRouteEdge { route_id, edge } => route::apply_create_edge(conn, route_id, edge),
        Action::PatchRouteEdge {
            route_id,
            edge_id,
            patch,
        } => route::apply_patch_edge(conn, route_id, edge_id, patch),
        Action::DeleteRouteEdge { route_id, edge_id } => {
            route::apply_delete_edge(conn, route_id, edge_id)
        }
        Action::AppendRouteNodeLog {
            route_id,
            node_id,
            log,
        } => route::apply_append_log(conn, route_id, node_id, log),
        Action::CreateKnowledge(knowledge) => note::apply_create_knowledge(conn, knowledge),
        Action::PatchKnowledge { item_id, patch } => {
            note::apply_patch_knowledge(conn, item_id, patch)
        }
        Action::ArchiveKnowledge { item_id } => note::apply_archive_knowledge(conn, item_id),
        Action::DeleteKnowledge { item_id } => note::apply_delete_knowledge(conn, item_id),
        Action::CaptureInbox(item) => inbox::apply_capture(conn, item),
    }
}

/// Reverses one applied action using only its stored record.
pub fn rollback(conn: &Connection, result: &ApplyResult) -> ActionResult<()> {
    let id = result.entity_id.as_str();
    match &result.record {
        ApplyRecord::CreateTask { .. } => task::rollback_create(conn, id),
        ApplyRecord::UpdateTask {
            before,
            source_entry_id,
            ..
        } => task::rollback_update(conn, id, before, source_entry_id.as_deref()),
        ApplyRecord::AppendNote | ApplyRecord::CreateKnowledge => note::rollback_create(conn, id),
        ApplyRecord::PatchNote {
            before,
            source_entry_id,
            ..
        } => note::rollback_patch(conn, id, before, source_entry_id.as_deref()),
        ApplyRecord::UpsertJournalAppend {
            created,
            before_raw_content,
            before_source,
            ..
        } => journal::rollback_upsert(
            conn,
            id,
            *created,
            before_raw_content.as_deref(),
            before_source.as_deref(),
        ),
        ApplyRecord::LinkEntities | ApplyRecord::CreateLink => note::rollback_link(conn, id),
        ApplyRecord::DeleteLink { before } => note::rollback_delete_link(conn, before),
        ApplyRecord::CreateIdea => idea::rollback_create(conn, id),
        ApplyRecord::PatchIdea { before, .. } => idea::rollback_patch(conn, id, before),
        ApplyRecord::PromoteIdea { .. } | ApplyRecord::CreateRouteNode { .. } => {
            route::rollback_create_node(conn, id)
        }
        ApplyRecord::CreateRoute { activation } => {
            route::rollback_create_route(conn, id, activation.as_ref())
        }
        ApplyRecord::PatchRoute {
            before, activation, ..
        } => route::rollback_patch_route(conn, id, before, activation.as_ref()),
        ApplyRecord::PatchRouteNode { before, .. } => route::rollback_patch_node(conn, id, before),
        ApplyRecord::DeleteRouteNode {
            before,
            incoming_edges,
            node_logs,
            child_node_ids,
        } => route::rollback_delete_node(conn, before, incoming_edges, node_logs, child_node_ids),
        ApplyRecord::CreateRouteEdge { .. } => route::rollback_create_edge(conn, id),
        ApplyRecord::PatchRouteEdge { before, .. } => route::rollback_patch_edge(conn, id, before),
        ApplyRecord::DeleteRouteEdge { before } => route::rollback_delete_edge(conn, before),
        ApplyRecord::AppendRouteNodeLog { .. } => route::rollback_append_log(conn, id),
        ApplyRecord::PatchKnowledge { before, .. } => {
            note::rollback_patch_knowledge(conn, id, before)
        }
        ApplyRecord::ArchiveKnowledge {
            before_status,
            changed,
            ..
        } => note::rollback_archive_knowledge(conn, id, *before_status, *changed),
        ApplyRecord::DeleteKnowledge {
            before_note,
            before_sources,
            before_links,
        } => note::rollback_delete_knowledge(conn, before_note, before_sources, before_links),
        ApplyRecord::CaptureInbox { .. } => inbox::rollback_capture(conn, id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionType;
    use crate::db::open_db_in_memory;
    use crate::model::route::NodeType;
    use crate::repo::route_repo::RouteRepo;
    use crate::repo::task_repo::TaskRepo;
    use serde_json::{json, Value};

    fn parse(action_type: ActionType, payload: Value) -> Action {
        let Value::Object(map) = payload else {
            panic!("payload must be an object");
        };
        Action::parse(action_type, &map).expect("valid payload")
    }

    fn run(conn: &Connection, action_type: ActionType, payload: Value) -> ApplyResult {
        let action = parse(action_type, payload);
        validate(conn, &action).expect("validate");
        apply(conn, &action).expect("apply")
    }

    #[test]
    fn create_task_rolls_back_to_nothing() {
        let conn = open_db_in_memory().expect("open db");
        let result = run(
            &conn,
            ActionType::CreateTask,
            json!({"title": "write docs", "status": "todo", "source": "chat"}),
        );
        assert!(TaskRepo::new(&conn).get(&result.entity_id).unwrap().is_some());

        rollback(&conn, &result).unwrap();
        assert!(TaskRepo::new(&conn).get(&result.entity_id).unwrap().is_none());
        assert!(TaskRepo::new(&conn)
            .list_sources(&result.entity_id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn activating_route_moves_todo_task_and_rollback_restores_it() {
        let conn = open_db_in_memory().expect("open db");
        let task = run(
            &conn,
            ActionType::CreateTask,
            json!({"title": "ship", "status": "todo"}),
        );
        let route = run(
            &conn,
            ActionType::CreateRoute,
            json!({"task_id": task.entity_id, "name": "plan a", "status": "active"}),
        );
        let tasks = TaskRepo::new(&conn);
        assert_eq!(
            tasks.get(&task.entity_id).unwrap().unwrap().status.as_str(),
            "in_progress"
        );

        rollback(&conn, &route).unwrap();
        assert_eq!(tasks.get(&task.entity_id).unwrap().unwrap().status.as_str(), "todo");
        assert!(RouteRepo::new(&conn)
            .get_route(&route.entity_id)
            .unwrap()
            .is_none());
    }

    #[test]
    fn second_active_route_conflicts() {
        let conn = open_db_in_memory().expect("open db");
        let task = run(
            &conn,
            ActionType::CreateTask,
            json!({"title": "ship", "status": "todo"}),
        );
        run(
            &conn,
            ActionType::CreateRoute,
            json!({"task_id": task.entity_id, "name": "plan a", "status": "active"}),
        );
        let second = parse(
            ActionType::CreateRoute,
            json!({"task_id": task.entity_id, "name": "plan b", "status": "active"}),
        );
        let err = validate(&conn, &second).unwrap_err();
        assert_eq!(err.code(), Some("ROUTE_ACTIVE_CONFLICT"));
    }

    #[test]
    fn edge_relation_is_inferred_and_checked() {
        let conn = open_db_in_memory().expect("open db");
        let task = run(
            &conn,
            ActionType::CreateTask,
            json!({"title": "ship", "status": "todo"}),
        );
        let route = run(
            &conn,
            ActionType::CreateRoute,
            json!({"task_id": task.entity_id, "name": "plan"}),
        );
        let start = run(
            &conn,
            ActionType::CreateRouteNode,
            json!({"route_id": route.entity_id, "node_type": "start", "title": "begin"}),
        );
        let goal = run(
            &conn,
            ActionType::CreateRouteNode,
            json!({"route_id": route.entity_id, "node_type": "goal", "title": "end"}),
        );
        let routes = RouteRepo::new(&conn);
        assert_eq!(routes.get_node(&goal.entity_id).unwrap().unwrap().order_hint, 2);
        assert_eq!(
            routes.get_node(&start.entity_id).unwrap().unwrap().node_type,
            NodeType::Start
        );

        let mismatched = parse(
            ActionType::CreateRouteEdge,
            json!({
                "route_id": route.entity_id,
                "from_node_id": start.entity_id,
                "to_node_id": goal.entity_id,
                "relation": "refine",
            }),
        );
        let err = validate(&conn, &mismatched).unwrap_err();
        assert_eq!(err.code(), Some("ROUTE_EDGE_RELATION_MISMATCH"));

        let edge = run(
            &conn,
            ActionType::CreateRouteEdge,
            json!({
                "route_id": route.entity_id,
                "from_node_id": start.entity_id,
                "to_node_id": goal.entity_id,
            }),
        );
        let stored = routes
            .get_edge(&route.entity_id, &edge.entity_id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.relation.as_str(), "initiate");

        let has_successor = parse(
            ActionType::DeleteRouteNode,
            json!({"route_id": route.entity_id, "node_id": start.entity_id}),
        );
        let err = validate(&conn, &has_successor).unwrap_err();
        assert_eq!(err.code(), Some("ROUTE_NODE_HAS_SUCCESSORS"));
    }

    #[test]
    fn deleted_node_comes_back_with_incoming_edges_and_logs() {
        let conn = open_db_in_memory().expect("open db");
        let task = run(
            &conn,
            ActionType::CreateTask,
            json!({"title": "ship", "status": "todo"}),
        );
        let route = run(
            &conn,
            ActionType::CreateRoute,
            json!({"task_id": task.entity_id, "name": "plan"}),
        );
        let start = run(
            &conn,
            ActionType::CreateRouteNode,
            json!({"route_id": route.entity_id, "node_type": "start", "title": "begin"}),
        );
        let leaf = run(
            &conn,
            ActionType::CreateRouteNode,
            json!({"route_id": route.entity_id, "node_type": "idea", "title": "leaf"}),
        );
        let edge = run(
            &conn,
            ActionType::CreateRouteEdge,
            json!({
                "route_id": route.entity_id,
                "from_node_id": start.entity_id,
                "to_node_id": leaf.entity_id,
            }),
        );
        let log = run(
            &conn,
            ActionType::AppendRouteNodeLog,
            json!({"route_id": route.entity_id, "node_id": leaf.entity_id, "content": "tried it"}),
        );

        let deleted = run(
            &conn,
            ActionType::DeleteRouteNode,
            json!({"route_id": route.entity_id, "node_id": leaf.entity_id}),
        );
        let routes = RouteRepo::new(&conn);
        assert!(!routes.edge_exists(&edge.entity_id).unwrap());
        assert!(!routes.log_exists(&log.entity_id).unwrap());

        rollback(&conn, &deleted).unwrap();
        assert!(routes.get_node(&leaf.entity_id).unwrap().is_some());
        assert!(routes.edge_exists(&edge.entity_id).unwrap());
        assert!(routes.log_exists(&log.entity_id).unwrap());
    }
}
